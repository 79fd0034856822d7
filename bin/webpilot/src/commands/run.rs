use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use webpilot_agent::BrowserAgent;
use webpilot_core::Config;
use webpilot_providers::GeminiClient;

pub async fn execute(
    task: &str,
    headed: bool,
    config_path: Option<&Path>,
    max_iterations: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if headed {
        config.browser.headless = false;
    }
    if let Some(cap) = max_iterations {
        config.agent.max_iterations = cap;
    }

    if config.provider.api_key.is_empty() {
        anyhow::bail!(
            "No API key configured. Set GEMINI_API_KEY or provider.apiKey in the config file."
        );
    }

    let model = Arc::new(GeminiClient::new(
        &config.provider.api_key,
        config.provider.api_base.as_deref(),
    ));
    let mut agent = BrowserAgent::new(&config, model);

    // Ctrl-C cancels cooperatively: in-flight actions finish, the rest of
    // the batch is skipped.
    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let on_status: Box<dyn Fn(&str) + Send + Sync> = Box::new(|line| println!("· {}", line));
    let summary = agent.run_task(task, cancel, Some(on_status)).await;

    println!("\n{}", summary);
    Ok(())
}
