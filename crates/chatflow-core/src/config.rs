use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub const API_KEY_ENV: &str = "CHATFLOW_API_KEY";
pub const BASE_URL_ENV: &str = "CHATFLOW_BASE_URL";
pub const MODEL_ENV: &str = "CHATFLOW_MODEL";

/// A stored API key, optionally tied to one model and its own endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// `None` makes this the default record.
    #[serde(default)]
    pub model: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub auth_header: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_model: Option<String>,
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub credentials: Vec<CredentialRecord>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            default_model: None,
            base_url: None,
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 1.0,
            credentials: Vec::new(),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    /// Model to use: env var, then config, then the built-in default.
    pub fn model(&self) -> String {
        std::env::var(MODEL_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Models that have a dedicated credential record.
    pub fn credential_models(&self) -> Vec<String> {
        self.credentials
            .iter()
            .filter_map(|c| c.model.clone())
            .collect()
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatflow"))
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_save_and_load_roundtrip_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::new();
        config.default_model = Some("gpt-4o".to_string());
        config.credentials.push(CredentialRecord {
            model: Some("gpt-4o".to_string()),
            api_key: "sk-test".to_string(),
            endpoint: Some("https://example.test/v1".to_string()),
            auth_header: None,
        });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.credential_models(), vec!["gpt-4o".to_string()]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"default_model": "llama3"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("llama3"));
        assert_eq!(config.max_tokens, 2048);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
