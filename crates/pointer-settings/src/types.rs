use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub workflow: WorkflowSettings,
    pub scrape: ScrapeSettings,
    pub logging: LoggingSettings,
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Settings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_rounds == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.maxRounds must be at least 1".into(),
            ));
        }
        if self.workflow.step_max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "workflow.stepMaxAttempts must be at least 1".into(),
            ));
        }
        if self.workflow.step_base_delay_ms > self.workflow.step_max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "workflow.stepBaseDelayMs exceeds workflow.stepMaxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Relative paths resolve against `~/.pointer`.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "database/pointer.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub model: String,
    pub max_tokens: u32,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 16_000,
            max_retries: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Round ceiling for the agent network.
    pub max_rounds: u32,
    /// Prior messages loaded as context for a turn.
    pub context_messages: usize,
    /// Pause before a turn reads its own placeholder.
    pub read_after_write_delay_ms: u64,
    pub tool_timeout_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            context_messages: 10,
            read_after_write_delay_ms: 2_000,
            tool_timeout_ms: 120_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    pub step_max_attempts: u32,
    pub step_base_delay_ms: u64,
    pub step_max_delay_ms: u64,
    /// Re-drive turns left `processing` by a previous process.
    pub resume_on_start: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            step_max_attempts: 4,
            step_base_delay_ms: 200,
            step_max_delay_ms: 10_000,
            resume_on_start: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeSettings {
    pub timeout_ms: u64,
    pub max_bytes: usize,
    pub firecrawl_url: String,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_bytes: 512 * 1024,
            firecrawl_url: "https://api.firecrawl.dev".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// JSON lines when true, human-readable otherwise.
    pub json: bool,
    /// Extra `module=level` directives.
    pub modules: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: Vec::new(),
        }
    }
}

/// Credentials, filled from the environment only.
#[derive(Clone, Debug, Default)]
pub struct Secrets {
    pub anthropic_api_key: Option<SecretString>,
    pub firecrawl_api_key: Option<SecretString>,
}
