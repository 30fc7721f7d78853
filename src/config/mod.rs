//! Configuration management for quorum

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub council: CouncilConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub history: HistoryConfig,
}

/// Council composition: which models deliberate and who synthesizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Models queried in Stage 1 and asked to peer-rank in Stage 2, in
    /// presentation order
    pub models: Vec<String>,
    /// Model that synthesizes the final answer
    pub chairman: String,
    /// Fast model used for conversation titles
    pub title_model: String,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            models: vec![
                "openai/gpt-4o".to_string(),
                "anthropic/claude-sonnet-4".to_string(),
                "google/gemini-2.5-pro".to_string(),
                "x-ai/grok-3".to_string(),
            ],
            chairman: "google/gemini-2.5-pro".to_string(),
            title_model: "google/gemini-2.5-flash".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Total attempts per invocation (1 = no retry)
    pub max_attempts: u32,
    /// Optional HTTP-Referer header sent to the gateway endpoint
    pub referer: Option<String>,
    /// Optional X-Title header sent to the gateway endpoint
    pub app_name: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            max_attempts: 3,
            referer: None,
            app_name: Some("Quorum".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8010,
        }
    }
}

/// Context-window policy for the history summary fed to Stages 2 and 3
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Recent turns included in the summary
    pub summary_turns: usize,
    /// Per-entry character cap before truncation with an ellipsis marker
    pub summary_snippet_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            summary_turns: 3,
            summary_snippet_chars: 500,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "quorum") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_council_is_nonempty() {
        let config = Config::default();
        assert!(!config.council.models.is_empty());
        assert!(!config.council.chairman.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [council]
            chairman = "openai/gpt-4o"
            "#,
        )
        .unwrap();
        assert_eq!(config.council.chairman, "openai/gpt-4o");
        assert_eq!(config.council.models, CouncilConfig::default().models);
        assert_eq!(config.gateway.max_attempts, 3);
        assert_eq!(config.history.summary_turns, 3);
    }
}
