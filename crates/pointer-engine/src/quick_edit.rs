//! One-shot edits of a code selection, outside any conversation.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument};

use pointer_core::context::LlmContext;
use pointer_core::provider::{LlmProvider, StreamOptions};

use crate::error::EngineError;
use crate::prompts::QUICK_EDIT_PROMPT;
use crate::tools::{extract_urls, PageFetcher};

/// Rewrites a code selection from an instruction, pulling in any pages the
/// instruction links to.
#[derive(Clone)]
pub struct QuickEditService {
    provider: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn PageFetcher>,
    options: StreamOptions,
}

impl QuickEditService {
    pub fn new(provider: Arc<dyn LlmProvider>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            provider,
            fetcher,
            options: StreamOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the edited selection.
    #[instrument(skip_all, fields(selected_len = selected_code.len(), full_len = full_code.len()))]
    pub async fn quick_edit(
        &self,
        selected_code: &str,
        full_code: &str,
        instruction: &str,
    ) -> Result<String, EngineError> {
        if selected_code.is_empty() {
            return Err(EngineError::MissingField("selectedCode"));
        }
        if instruction.trim().is_empty() {
            return Err(EngineError::MissingField("instruction"));
        }

        let documentation = self.documentation(instruction).await;
        let prompt = edit_request(selected_code, full_code, &documentation, instruction);
        let context = LlmContext::single_shot(QUICK_EDIT_PROMPT, prompt);
        let reply = self.provider.complete(&context, &self.options).await?;
        let edited = strip_fences(&reply.text_content());
        info!(edited_len = edited.len(), "quick edit finished");
        Ok(edited)
    }

    /// Pages linked from the instruction. Pages that cannot be fetched are left out.
    async fn documentation(&self, instruction: &str) -> String {
        let urls = extract_urls(instruction);
        if urls.is_empty() {
            return String::new();
        }
        let pages = join_all(urls.iter().map(|url| self.fetcher.fetch_page(url))).await;
        let docs: Vec<String> = urls
            .iter()
            .zip(pages)
            .filter_map(|(url, page)| page.map(|text| format!("<doc url=\"{url}\">\n{text}\n</doc>")))
            .collect();
        debug!(linked = urls.len(), fetched = docs.len(), "quick edit documentation");
        if docs.is_empty() {
            return String::new();
        }
        format!("<documentation>\n{}\n</documentation>", docs.join("\n"))
    }
}

fn edit_request(selected_code: &str, full_code: &str, documentation: &str, instruction: &str) -> String {
    format!(
        "<context>\n<selected_code>\n{selected_code}\n</selected_code>\n\
         <full_code_context>\n{full_code}\n</full_code_context>\n</context>\n\n\
         {documentation}\n\n<instruction>\n{instruction}\n</instruction>"
    )
}

/// Models sometimes wrap the code in a markdown fence anyway.
fn strip_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply.trim_end().to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return reply.trim_end().to_string();
    };
    match body.split_once('\n') {
        Some((_lang, code)) => code.trim_end_matches('\n').to_string(),
        None => body.to_string(),
    }
}
