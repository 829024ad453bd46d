use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Which browser backend drives application attempts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserBackend {
    Webdriver,
    Gateway,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub backend: BrowserBackend,
    /// chromedriver / selenium endpoint for the local backend.
    pub webdriver_url: String,
    /// Remote browser-control gateway endpoint.
    pub gateway_url: String,
    pub gateway_token: String,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            backend: BrowserBackend::Webdriver,
            webdriver_url: "http://localhost:9515".to_string(),
            gateway_url: String::new(),
            gateway_token: String::new(),
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub server: String,
    pub port: Option<u16>,
    pub username: String,
    /// Path to an app-password file, "~/" expanded.
    pub password_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// "anthropic" or "ollama"; empty = anthropic when a key is present,
    /// ollama otherwise.
    pub provider: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// API key for the hosted job-search API adapter.
    pub jsearch_api_key: String,
    pub jsearch_host: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub mailbox: MailboxConfig,
    pub ai: AiConfig,
    pub sources: SourcesConfig,
    /// Resume file handed to ATS upload fields.
    pub resume_file: String,
}

impl Config {
    /// Load from the default location, falling back to built-in defaults if
    /// the file does not exist. Env vars override file values for secrets.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "pursuit") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("pursuit.toml")
        }
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.ai.anthropic_api_key = key;
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.ai.ollama_url = url;
        }
        if let Ok(key) = std::env::var("JSEARCH_API_KEY") {
            self.sources.jsearch_api_key = key;
        }
        if let Ok(token) = std::env::var("PURSUIT_GATEWAY_TOKEN") {
            self.browser.gateway_token = token;
        }
    }
}

/// Expand a leading "~/" against $HOME.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let raw = r#"
            resume_file = "/tmp/resume.pdf"

            [browser]
            backend = "gateway"
            gateway_url = "http://gateway:18789"

            [mailbox]
            server = "imap.gmail.com"
            username = "me@example.com"
            password_file = "~/.app_password"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.browser.backend, BrowserBackend::Gateway);
        assert_eq!(config.browser.gateway_url, "http://gateway:18789");
        // Unspecified sections fall back to defaults.
        assert_eq!(config.browser.webdriver_url, "http://localhost:9515");
        assert!(config.ai.provider.is_empty());
        assert_eq!(config.mailbox.username, "me@example.com");
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.browser.backend, BrowserBackend::Webdriver);
        assert!(config.browser.headless);
        assert!(config.resume_file.is_empty());
    }

    #[test]
    fn test_expand_home() {
        unsafe { std::env::set_var("HOME", "/home/tester") };
        assert_eq!(
            expand_home("~/.app_password"),
            PathBuf::from("/home/tester/.app_password")
        );
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
