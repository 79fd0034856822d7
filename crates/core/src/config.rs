use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub browser: BrowserConfig,
    pub automation: AutomationConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Model driving the semantic orchestrator loop.
    pub model: String,
    /// Visually-capable model configuration for the coordinate delegate.
    pub visual_model: String,
    pub max_iterations: usize,
    pub visual_max_iterations: usize,
    /// Substrings in an action result that indicate the page refused the
    /// interaction. These depend on the automation server's wording, so they
    /// are configuration rather than control logic.
    pub failure_hints: Vec<String>,
    /// Directory for per-task model transcripts.
    pub transcript_dir: String,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_visual_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_failure_hints() -> Vec<String> {
    ["not interactable", "obscured", "intercept", "blocked"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            visual_model: default_visual_model(),
            max_iterations: 20,
            visual_max_iterations: 5,
            failure_hints: default_failure_hints(),
            transcript_dir: "~/.webpilot/transcripts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Explicit browser binary; when unset the launcher scans well-known
    /// install locations and falls back to the engine cache.
    pub binary: Option<String>,
    /// User-scoped cache the provisioner installs the engine into.
    pub cache_dir: String,
    /// Package-manager command used for the one-time engine install.
    pub install_command: Vec<String>,
}

fn default_install_command() -> Vec<String> {
    ["npx", "-y", "playwright", "install", "chromium"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 720,
            binary: None,
            cache_dir: "~/.webpilot/engines".to_string(),
            install_command: default_install_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutomationConfig {
    /// Command that starts the browser-automation MCP server. The literal
    /// `{port}` in any argument is replaced with the browser's debug port.
    pub server_command: String,
    pub server_args: Vec<String>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            server_command: "npx".to_string(),
            server_args: vec![
                "-y".to_string(),
                "chrome-devtools-mcp@latest".to_string(),
                "--browser-url".to_string(),
                "http://127.0.0.1:{port}".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
}

impl Config {
    /// Load from a YAML file, or defaults when the file doesn't exist.
    /// The `GEMINI_API_KEY` environment variable fills in a missing api key.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&content)?
            }
            _ => Config::default(),
        };

        if config.provider.api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                config.provider.api_key = key;
            }
        }

        Ok(config)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.agent.visual_max_iterations, 5);
        assert!(config.browser.headless);
        assert_eq!(config.browser.window_width, 1280);
        assert!(config
            .agent
            .failure_hints
            .iter()
            .any(|h| h == "not interactable"));
        assert!(config
            .automation
            .server_args
            .iter()
            .any(|a| a.contains("{port}")));
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "agent:\n  maxIterations: 7\nbrowser:\n  headless: false\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agent.max_iterations, 7);
        assert!(!config.browser.headless);
        // Untouched sections keep their defaults
        assert_eq!(config.agent.visual_max_iterations, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/webpilot.yaml"))).unwrap();
        assert_eq!(config.agent.max_iterations, 20);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/x/y");
        assert!(!expanded.to_string_lossy().starts_with("~"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
