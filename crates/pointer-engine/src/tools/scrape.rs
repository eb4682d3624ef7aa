use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use pointer_core::security::ApiKey;

/// Fetches an external page as readable text. `None` means the page could
/// not be retrieved; the caller reports that inline.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Option<String>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BYTES: usize = 512 * 1024;
const TEXT_WIDTH: usize = 100;

/// Plain HTTP GET, converting HTML to text.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Pointer/1.0")
            .build()
            .unwrap_or_default();
        Self { client, max_bytes }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "page fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url, status = response.status().as_u16(), "page fetch rejected");
            return None;
        }

        let declared_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        let body = response.bytes().await.ok()?;
        let body = &body[..body.len().min(self.max_bytes)];
        let is_html = declared_html || looks_like_html(body);
        debug!(url, bytes = body.len(), is_html, "page fetched");

        let text = if is_html {
            html2text::from_read(body, TEXT_WIDTH).ok()?
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Sniff markup served under a non-HTML content type.
fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Firecrawl scrape API, returning markdown.
pub struct FirecrawlFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: ApiKey,
}

impl FirecrawlFetcher {
    pub fn new(api_key: ApiKey, base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
}

#[derive(Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
}

#[async_trait]
impl PageFetcher for FirecrawlFetcher {
    async fn fetch_page(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&json!({"url": url, "formats": ["markdown"]}))
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url, status = r.status().as_u16(), "firecrawl rejected scrape");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "firecrawl request failed");
                return None;
            }
        };
        let parsed: ScrapeResponse = response.json().await.ok()?;
        if !parsed.success {
            return None;
        }
        parsed
            .data
            .and_then(|d| d.markdown)
            .filter(|m| !m.trim().is_empty())
    }
}

fn url_regex() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap_or_else(|_| unreachable!()))
}

/// URLs mentioned in free text, in order, without duplicates. Trailing
/// sentence punctuation is not part of the URL.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in url_regex().find_iter(text) {
        let url = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '>', '"', '\'']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

pub fn is_http_url(candidate: &str) -> bool {
    extract_urls(candidate).first().is_some_and(|u| u == candidate)
}

/// Wrap fetched pages (or their failures) as `<doc>` blocks.
pub fn render_docs(results: &[(String, Option<String>)]) -> String {
    results
        .iter()
        .map(|(url, body)| match body {
            Some(text) => format!("<doc url=\"{url}\">\n{text}\n</doc>"),
            None => format!("<doc url=\"{url}\">\nError: could not fetch {url}\n</doc>"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extracts_urls_in_order() {
        let urls = extract_urls(
            "Follow https://docs.rs/axum/latest/axum/. Also see http://example.com/a, and https://docs.rs/axum/latest/axum/",
        );
        assert_eq!(
            urls,
            vec!["https://docs.rs/axum/latest/axum/", "http://example.com/a"]
        );
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn http_url_check() {
        assert!(is_http_url("https://example.com/page"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("see https://example.com"));
    }

    #[test]
    fn docs_rendering() {
        let out = render_docs(&[
            ("https://a.dev".into(), Some("# A".into())),
            ("https://b.dev".into(), None),
        ]);
        assert!(out.starts_with("<doc url=\"https://a.dev\">\n# A\n</doc>"));
        assert!(out.contains("Error: could not fetch https://b.dev"));
    }

    #[tokio::test]
    async fn http_fetcher_converts_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "<html><body><h1>Routing</h1><p>Use Router::new.</p></body></html>",
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::default();
        let text = fetcher
            .fetch_page(&format!("{}/guide", server.uri()))
            .await
            .unwrap();
        assert!(text.contains("Routing"));
        assert!(text.contains("Use Router::new."));
        assert!(!text.contains("<p>"));

        assert!(fetcher
            .fetch_page(&format!("{}/missing", server.uri()))
            .await
            .is_none());
    }

    #[test]
    fn markup_is_sniffed() {
        assert!(looks_like_html(b"<!DOCTYPE html><html></html>"));
        assert!(looks_like_html(b"\n  <html lang=\"en\"><body>x</body></html>"));
        assert!(!looks_like_html(b"plain notes about <html> tags"));
        assert!(!looks_like_html(b""));
    }

    #[tokio::test]
    async fn http_fetcher_converts_mislabelled_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<!doctype html><html><body><p>Hooks run in order.</p></body></html>",
                "text/plain",
            ))
            .mount(&server)
            .await;

        let text = HttpPageFetcher::default()
            .fetch_page(&format!("{}/plain", server.uri()))
            .await
            .unwrap();
        assert!(text.contains("Hooks run in order."));
        assert!(!text.contains("<p>"));
        assert!(!text.to_ascii_lowercase().contains("doctype"));
    }

    #[tokio::test]
    async fn firecrawl_returns_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/scrape"))
            .and(header("authorization", "Bearer fc-key"))
            .and(body_json(json!({"url": "https://docs.example/x", "formats": ["markdown"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"markdown": "# Docs"}
            })))
            .mount(&server)
            .await;

        let fetcher = FirecrawlFetcher::new(ApiKey::new("fc-key"), server.uri(), DEFAULT_TIMEOUT);
        assert_eq!(
            fetcher.fetch_page("https://docs.example/x").await.as_deref(),
            Some("# Docs")
        );
        assert!(fetcher.fetch_page("https://docs.example/other").await.is_none());
    }
}
