//! The raw-input page boundary and its CDP-backed implementation.

use async_trait::async_trait;
use serde_json::Value;

use webpilot_core::Result;

use crate::cdp::CdpClient;

/// Raw page operations the action executor needs for coordinate-based input
/// and visual feedback. Semantic actions never go through here.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Base64-encoded PNG of the current viewport.
    async fn screenshot(&self) -> Result<String>;
    /// Reported viewport size; callers fall back to a DOM-evaluated window
    /// size when this fails.
    async fn viewport_size(&self) -> Result<(f64, f64)>;
    async fn evaluate(&self, expression: &str) -> Result<Value>;
    async fn mouse_move(&self, x: f64, y: f64) -> Result<()>;
    async fn click(&self, x: f64, y: f64, count: i32) -> Result<()>;
    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn bring_to_front(&self) -> Result<()>;
}

pub struct CdpPage {
    cdp: CdpClient,
}

impl CdpPage {
    pub fn new(cdp: CdpClient) -> Self {
        Self { cdp }
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn screenshot(&self) -> Result<String> {
        self.cdp.screenshot().await
    }

    async fn viewport_size(&self) -> Result<(f64, f64)> {
        self.cdp.layout_viewport().await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.cdp.evaluate_js(expression).await
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<()> {
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await
    }

    async fn click(&self, x: f64, y: f64, count: i32) -> Result<()> {
        self.cdp
            .dispatch_mouse_event("mousePressed", x, y, "left", count)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseReleased", x, y, "left", count)
            .await
    }

    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<()> {
        self.cdp
            .dispatch_mouse_event("mousePressed", from.0, from.1, "left", 1)
            .await?;
        // A couple of intermediate moves so drag handlers see motion
        let (mx, my) = ((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
        self.cdp
            .dispatch_mouse_event("mouseMoved", mx, my, "left", 0)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseMoved", to.0, to.1, "left", 0)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseReleased", to.0, to.1, "left", 1)
            .await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.cdp.insert_text(text).await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (key_name, code, modifiers) = parse_key_spec(key);
        self.cdp
            .dispatch_key_event("keyDown", &key_name, &code, modifiers)
            .await?;
        self.cdp
            .dispatch_key_event("keyUp", &key_name, &code, modifiers)
            .await
    }

    async fn bring_to_front(&self) -> Result<()> {
        self.cdp.bring_to_front().await
    }
}

/// Parse a key specification like "Enter", "Tab", "Ctrl+A" into
/// (key, code, modifier bits).
pub fn parse_key_spec(key: &str) -> (String, String, i32) {
    let parts: Vec<&str> = key.split('+').collect();
    let mut modifiers = 0i32;
    let mut main_key = key.to_string();

    if parts.len() > 1 {
        for &part in &parts[..parts.len() - 1] {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= 2,
                "alt" | "option" => modifiers |= 1,
                "shift" => modifiers |= 8,
                "meta" | "cmd" | "command" => modifiers |= 4,
                _ => {}
            }
        }
        main_key = parts.last().unwrap_or(&key).to_string();
    }

    let code = match main_key.as_str() {
        "Enter" | "Return" => "Enter",
        "Tab" => "Tab",
        "Escape" | "Esc" => "Escape",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "ArrowUp" | "Up" => "ArrowUp",
        "ArrowDown" | "Down" => "ArrowDown",
        "ArrowLeft" | "Left" => "ArrowLeft",
        "ArrowRight" | "Right" => "ArrowRight",
        "Home" => "Home",
        "End" => "End",
        "PageUp" => "PageUp",
        "PageDown" => "PageDown",
        "Space" | " " => "Space",
        _ => {
            if main_key.len() == 1 {
                return (
                    main_key.clone(),
                    format!("Key{}", main_key.to_uppercase()),
                    modifiers,
                );
            }
            &main_key
        }
    }
    .to_string();

    (main_key, code, modifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_spec_plain() {
        let (key, code, mods) = parse_key_spec("Enter");
        assert_eq!(key, "Enter");
        assert_eq!(code, "Enter");
        assert_eq!(mods, 0);
    }

    #[test]
    fn test_parse_key_spec_modifiers() {
        let (key, code, mods) = parse_key_spec("Ctrl+a");
        assert_eq!(key, "a");
        assert_eq!(code, "KeyA");
        assert_eq!(mods, 2);

        let (key, code, mods) = parse_key_spec("Ctrl+Shift+Tab");
        assert_eq!(key, "Tab");
        assert_eq!(code, "Tab");
        assert_eq!(mods, 10);
    }
}
