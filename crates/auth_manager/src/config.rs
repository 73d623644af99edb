use serde::{Deserialize, Serialize};

/// Access-token validity window: the backend's token lifetime minus a
/// safety margin, so the proactive refresh fires before any request can
/// hit an expired token.
const DEFAULT_TOKEN_VALIDITY_SECS: u64 = 55 * 60;

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_base: String,
    #[serde(default = "default_token_validity_secs")]
    pub token_validity_secs: u64,
}

fn default_token_validity_secs() -> u64 {
    DEFAULT_TOKEN_VALIDITY_SECS
}

fn parse_u64_env(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        let mut config = AuthConfig {
            api_base: "http://localhost:5000".to_string(),
            token_validity_secs: DEFAULT_TOKEN_VALIDITY_SECS,
        };

        if std::path::Path::new(CONFIG_FILE_PATH).exists() {
            if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_PATH) {
                if let Ok(file_config) = toml::from_str::<AuthConfig>(&content) {
                    config = file_config;
                }
            }
        }

        // Override with environment variables if they exist
        if let Ok(api_base) = std::env::var("API_BASE") {
            config.api_base = api_base;
        }
        if let Ok(validity) = std::env::var("TOKEN_VALIDITY_SECS") {
            if let Some(secs) = parse_u64_env(&validity) {
                config.token_validity_secs = secs;
            }
        }
        config
    }
}
