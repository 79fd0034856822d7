//! Session connection management.
//!
//! A `Session` owns at most one browser process and one automation client,
//! created lazily on first use. `ensure_connection` is idempotent: calling
//! it while connected is a no-op, and a dead browser process is relaunched
//! on a freshly allocated debug port.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use webpilot_core::config::{AutomationConfig, BrowserConfig};
use webpilot_core::{Error, Result};

use crate::cdp::CdpClient;
use crate::mcp::{self, AutomationClient, ClientStatus};
use crate::page::{CdpPage, PageHandle};
use crate::provision::EngineProvisioner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Liveness probe for the launched browser process.
pub trait ProcessGuard: Send {
    fn alive(&mut self) -> bool;
}

pub struct LaunchedBrowser {
    pub page: Arc<dyn PageHandle>,
    pub process: Box<dyn ProcessGuard>,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window: (u32, u32),
    pub port: u16,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<LaunchedBrowser>;
}

/// Builds the automation client for a launched browser's port.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, port: u16) -> Result<Arc<dyn AutomationClient>>;
}

pub struct Session {
    launcher: Box<dyn BrowserLauncher>,
    connector: Box<dyn ClientConnector>,
    headless: bool,
    window: (u32, u32),
    status: ConnectionStatus,
    port: Option<u16>,
    browser: Option<LaunchedBrowser>,
    client: Option<Arc<dyn AutomationClient>>,
}

impl Session {
    /// Production wiring: Chromium launcher + MCP connector from config.
    pub fn new(browser: &BrowserConfig, automation: &AutomationConfig) -> Self {
        Self::with_parts(
            Box::new(ChromiumLauncher::new(browser)),
            Box::new(McpConnector {
                config: automation.clone(),
            }),
            browser.headless,
            (browser.window_width, browser.window_height),
        )
    }

    pub fn with_parts(
        launcher: Box<dyn BrowserLauncher>,
        connector: Box<dyn ClientConnector>,
        headless: bool,
        window: (u32, u32),
    ) -> Self {
        Self {
            launcher,
            connector,
            headless,
            window,
            status: ConnectionStatus::Disconnected,
            port: None,
            browser: None,
            client: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Launch the browser and connect the automation client if either is
    /// missing or dead. Never creates duplicates when already connected.
    pub async fn ensure_connection(&mut self) -> Result<()> {
        let need_launch = match &mut self.browser {
            None => true,
            Some(browser) => !browser.process.alive(),
        };

        if need_launch {
            self.status = ConnectionStatus::Connecting;
            // A relaunch invalidates any client bound to the old port.
            self.client = None;
            let port = find_free_port().await?;
            let options = LaunchOptions {
                headless: self.headless,
                window: self.window,
                port,
            };
            info!(port, headless = self.headless, "Launching browser");
            self.browser = Some(self.launcher.launch(&options).await?);
            self.port = Some(port);
        }

        let need_client = match &self.client {
            None => true,
            Some(client) => client.status() != ClientStatus::Connected,
        };

        if need_client {
            let port = self
                .port
                .ok_or_else(|| Error::Session("no control port assigned".to_string()))?;
            self.client = Some(self.connector.connect(port).await?);
        }

        self.status = ConnectionStatus::Connected;
        Ok(())
    }

    pub async fn client(&mut self) -> Result<Arc<dyn AutomationClient>> {
        self.ensure_connection().await?;
        self.client
            .clone()
            .ok_or_else(|| Error::Session("connection produced no automation client".to_string()))
    }

    pub async fn page(&mut self) -> Result<Arc<dyn PageHandle>> {
        self.ensure_connection().await?;
        self.browser
            .as_ref()
            .map(|b| b.page.clone())
            .ok_or_else(|| Error::Session("no page available".to_string()))
    }
}

// ─── Production launcher ──────────────────────────────────────────────────────

struct ChildGuard(Child);

impl ProcessGuard for ChildGuard {
    fn alive(&mut self) -> bool {
        matches!(self.0.try_wait(), Ok(None))
    }
}

pub struct ChromiumLauncher {
    binary: Option<String>,
    provisioner: EngineProvisioner,
}

impl ChromiumLauncher {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            provisioner: EngineProvisioner::new(config),
        }
    }

    /// Resolve the browser executable: explicit config, well-known install
    /// locations, then the managed engine cache (installing on first use).
    async fn resolve_binary(&self) -> Result<String> {
        if let Some(binary) = &self.binary {
            return Ok(binary.clone());
        }
        if let Some(found) = find_browser_binary() {
            return Ok(found);
        }
        let progress = |line: &str| info!(target: "provision", "{}", line);
        let installed = self.provisioner.ensure_available(Some(&progress)).await?;
        Ok(installed.display().to_string())
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<LaunchedBrowser> {
        let binary = self.resolve_binary().await?;

        let mut args = vec![
            format!("--remote-debugging-port={}", options.port),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-background-networking".to_string(),
            "--disable-extensions".to_string(),
            "--disable-sync".to_string(),
            format!("--window-size={},{}", options.window.0, options.window.1),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        args.push("about:blank".to_string());

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Session(format!("failed to launch browser '{}': {}", binary, e))
            })?;

        wait_for_cdp_ready(options.port, 15).await?;
        let ws_url = get_page_ws_url(options.port).await?;
        let cdp = CdpClient::connect(&ws_url).await?;
        info!(port = options.port, "CDP connection established (page target)");

        Ok(LaunchedBrowser {
            page: Arc::new(CdpPage::new(cdp)),
            process: Box::new(ChildGuard(child)),
        })
    }
}

struct McpConnector {
    config: AutomationConfig,
}

#[async_trait]
impl ClientConnector for McpConnector {
    async fn connect(&self, port: u16) -> Result<Arc<dyn AutomationClient>> {
        let client = mcp::client_for_port(&self.config, port).await?;
        Ok(client as Arc<dyn AutomationClient>)
    }
}

/// Find a Chromium-family binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Session(format!("failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Session(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the browser's CDP endpoint responds.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<()> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Session(format!(
                "browser CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.json::<Value>().await.is_ok() {
                return Ok(());
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Resolve the first page target's WebSocket URL via /json/list.
/// Retries a few times since the target may not appear immediately.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(e) => {
                warn!(port, "failed to parse target list: {}", e);
                continue;
            }
        };

        for target in &targets {
            if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
                {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Session("no page target found after retries".to_string()))
}
