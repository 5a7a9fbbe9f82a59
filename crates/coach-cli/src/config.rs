//! Configuration file support

use coach_ai::Provider;
use coach_ai::providers::get_api_key;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default local Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Configuration for discovery-coach
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider (openai, ollama)
    pub provider: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Endpoint override for the provider
    pub base_url: Option<String>,
    /// Directory of Markdown/text knowledge-base files
    pub knowledge_dir: Option<String>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    /// Where run metrics are appended
    pub metrics_file: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("discovery-coach")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DISCOVERY_COACH_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file; a missing or broken file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            temperature: Some(0.7),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Get the OpenAI key, checking config then env
    pub fn openai_api_key(&self) -> Option<String> {
        let configured = self.api_keys.openai.as_deref().filter(|k| !k.trim().is_empty());
        let env_var = Provider::OpenAI.api_key_env_var()?;
        get_api_key(configured, env_var).ok()
    }

    /// Ollama server root: config, then `OLLAMA_BASE_URL`, then localhost
    pub fn ollama_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
    }

    /// Knowledge-base directory, defaulting to `<data_local_dir>/discovery-coach/knowledge`
    pub fn knowledge_dir(&self) -> PathBuf {
        match &self.knowledge_dir {
            Some(dir) => expand_home(dir),
            None => data_dir().join("knowledge"),
        }
    }

    /// Metrics log path, defaulting to `<data_local_dir>/discovery-coach/metrics.jsonl`
    pub fn metrics_path(&self) -> PathBuf {
        match &self.metrics_file {
            Some(file) => expand_home(file),
            None => data_dir().join("metrics.jsonl"),
        }
    }

    /// Read the custom system prompt, if one is configured and readable
    pub fn system_prompt(&self) -> Option<String> {
        let path = expand_home(self.system_prompt_file.as_deref()?);
        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                eprintln!(
                    "Warning: Failed to read system prompt {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Per-user data directory for sessions, metrics and the default knowledge base
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("discovery-coach")
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# discovery-coach configuration file
# Place at ~/.config/discovery-coach/config.toml (Linux), or point
# DISCOVERY_COACH_CONFIG at another file

# Provider (openai, ollama)
provider = "openai"

# Default model to use
model = "gpt-4o-mini"

# Sampling temperature
temperature = 0.7

# Endpoint override (for ollama, the server root, e.g. http://localhost:11434)
# base_url = "http://localhost:11434"

# Knowledge-base directory with .md / .txt files
# knowledge_dir = "~/discovery-coach/knowledge"

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/discovery-coach/system_prompt.txt"

# Run metrics log (JSON lines)
# metrics_file = "~/.local/share/discovery-coach/metrics.jsonl"

# API keys (optional - can also use environment variables)
[api_keys]
# openai = "sk-..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("openai"));
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.temperature, Some(0.7));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            provider: Some("ollama".into()),
            model: Some("llama3.2".into()),
            base_url: Some("http://gpu-box:11434".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.provider.as_deref(), Some("ollama"));
        assert_eq!(loaded.ollama_base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn test_missing_or_broken_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("absent.toml")).model.is_none());

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "model = [unclosed").unwrap();
        assert!(Config::load_from(&broken).model.is_none());
    }

    #[test]
    fn test_system_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        fs::write(&prompt, "You are a strict coach.").unwrap();

        let config = Config {
            system_prompt_file: Some(prompt.display().to_string()),
            ..Default::default()
        };
        assert_eq!(config.system_prompt().as_deref(), Some("You are a strict coach."));
        assert!(Config::default().system_prompt().is_none());
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = Config {
            knowledge_dir: Some("/srv/kb".into()),
            metrics_file: Some("/tmp/runs.jsonl".into()),
            ..Default::default()
        };
        assert_eq!(config.knowledge_dir(), PathBuf::from("/srv/kb"));
        assert_eq!(config.metrics_path(), PathBuf::from("/tmp/runs.jsonl"));
    }
}
