//! Managed-engine fallback.
//!
//! When no system browser can be found, the launcher falls back to a
//! user-scoped engine cache. An empty cache triggers a one-time install by
//! shelling out to the configured package-manager command, with progress
//! lines surfaced through an optional callback.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use webpilot_core::config::{expand_home, BrowserConfig};
use webpilot_core::{Error, Result};

/// Executable names the cache scan recognizes as a usable engine.
const ENGINE_NAMES: &[&str] = &["chrome", "chromium", "headless_shell", "chrome.exe"];

const MAX_SCAN_DEPTH: usize = 5;

pub type ProgressFn = dyn Fn(&str) + Send + Sync;

pub struct EngineProvisioner {
    cache_dir: PathBuf,
    install_command: Vec<String>,
}

impl EngineProvisioner {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            cache_dir: expand_home(&config.cache_dir),
            install_command: config.install_command.clone(),
        }
    }

    pub fn with_cache_dir(cache_dir: PathBuf, install_command: Vec<String>) -> Self {
        Self {
            cache_dir,
            install_command,
        }
    }

    /// Return a cached engine executable, installing one first if needed.
    pub async fn ensure_available(&self, progress: Option<&ProgressFn>) -> Result<PathBuf> {
        if let Some(found) = self.find_cached() {
            return Ok(found);
        }

        self.install(progress).await?;

        self.find_cached().ok_or_else(|| {
            Error::Provision(format!(
                "engine install finished but no executable found under {}",
                self.cache_dir.display()
            ))
        })
    }

    /// Scan the cache directory for a known engine executable.
    pub fn find_cached(&self) -> Option<PathBuf> {
        scan_dir(&self.cache_dir, 0)
    }

    async fn install(&self, progress: Option<&ProgressFn>) -> Result<()> {
        let (command, args) = self
            .install_command
            .split_first()
            .ok_or_else(|| Error::Provision("empty engine install command".to_string()))?;

        std::fs::create_dir_all(&self.cache_dir)?;

        info!(
            command = %self.install_command.join(" "),
            cache = %self.cache_dir.display(),
            "Installing browser engine"
        );
        if let Some(report) = progress {
            report(&format!(
                "Installing browser engine into {}",
                self.cache_dir.display()
            ));
        }

        let mut child = Command::new(command)
            .args(args)
            .env("PLAYWRIGHT_BROWSERS_PATH", &self.cache_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::Provision(format!("failed to run '{}': {}", command, e))
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(report) = progress {
                    report(&line);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Provision(format!("engine install did not finish: {}", e)))?;

        if !status.success() {
            return Err(Error::Provision(format!(
                "engine install exited with {}",
                status
            )));
        }
        Ok(())
    }
}

fn scan_dir(dir: &Path, depth: usize) -> Option<PathBuf> {
    if depth > MAX_SCAN_DEPTH {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if ENGINE_NAMES.contains(&name) {
                    return Some(path);
                }
            }
        } else if path.is_dir() {
            subdirs.push(path);
        }
    }

    for sub in subdirs {
        if let Some(found) = scan_dir(&sub, depth + 1) {
            return Some(found);
        }
    }
    None
}
