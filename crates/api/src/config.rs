use std::env;
use std::path::PathBuf;
use std::time::Duration;

use enquiry_agents::{AgentSettings, ProviderSettings};

const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub api_key: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    /// Directory overriding the bundled knowledge tables.
    pub knowledge_dir: Option<PathBuf>,
    pub agent: AgentSettings,
    pub providers: ProviderSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            api_key: "dev-enquiry-key".to_string(),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            knowledge_dir: None,
            agent: AgentSettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("ENQUIRY_BIND").unwrap_or(defaults.bind),
            api_key: env::var("ENQUIRY_API_KEY").unwrap_or(defaults.api_key),
            allowed_origins: env::var("ENQUIRY_ALLOWED_ORIGINS")
                .ok()
                .map(|value| parse_origins(&value))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.allowed_origins),
            rate_limit_window: Duration::from_secs(
                env::var("ENQUIRY_RATE_LIMIT_WINDOW_SECONDS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60),
            ),
            rate_limit_max: env::var("ENQUIRY_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            knowledge_dir: env::var("ENQUIRY_KNOWLEDGE_DIR")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            agent: AgentSettings::from_env(),
            providers: ProviderSettings::from_env(),
        }
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
