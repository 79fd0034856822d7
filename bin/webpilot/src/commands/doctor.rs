use std::path::Path;

use webpilot_browser::provision::EngineProvisioner;
use webpilot_browser::session::find_browser_binary;
use webpilot_core::Config;

pub fn execute(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    match find_browser_binary() {
        Some(path) => println!("browser:           {}", path),
        None => {
            let provisioner = EngineProvisioner::new(&config.browser);
            match provisioner.find_cached() {
                Some(path) => println!("browser:           {} (managed cache)", path.display()),
                None => println!(
                    "browser:           not found (installed on first run via: {})",
                    config.browser.install_command.join(" ")
                ),
            }
        }
    }

    if config.provider.api_key.is_empty() {
        println!("api key:           missing (set GEMINI_API_KEY)");
    } else {
        println!("api key:           configured");
    }

    match which::which(&config.automation.server_command) {
        Ok(path) => println!(
            "automation server: {} ({})",
            config.automation.server_command,
            path.display()
        ),
        Err(_) => println!(
            "automation server: '{}' not found on PATH",
            config.automation.server_command
        ),
    }

    println!("orchestrator:      {}", config.agent.model);
    println!("visual delegate:   {}", config.agent.visual_model);
    Ok(())
}
