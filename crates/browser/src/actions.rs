//! Action executor.
//!
//! Translates the closed vocabulary of named actions into automation-server
//! calls or raw page input, normalizes heterogeneous response shapes into an
//! `ActionResult`, and paints cosmetic feedback (cursor, labels, scroll
//! indicator) around state-changing actions.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use webpilot_core::types::{ActionCall, ActionResult};
use webpilot_core::Result;

use crate::mcp::{AutomationClient, ContentPart, ToolResponse};
use crate::page::PageHandle;

/// Forwarded semantic actions: public action name → protocol operation.
/// Everything else is resolved locally.
pub const FORWARDED: &[(&str, &str)] = &[
    ("navigate", "navigate_page"),
    ("click", "click"),
    ("hover", "hover"),
    ("fill", "fill"),
    ("fill_form", "fill_form"),
    ("upload_file", "upload_file"),
    ("get_element_text", "get_element_text"),
    ("wait_for", "wait_for"),
    ("handle_dialog", "handle_dialog"),
    ("press_key", "press_key"),
    ("drag", "drag"),
    ("close_page", "close_page"),
];

/// Marker splitting narrative text from trailing snapshot text in responses.
const SNAPSHOT_MARKER: &str = "latest page snapshot";

/// Model inputs are normalized coordinates on this scale.
const COORDINATE_SCALE: f64 = 1000.0;

const LABEL_MAX_CHARS: usize = 30;

static UID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[?uid=\S+").unwrap());

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Delay after scrolls and coordinate input so the page can settle.
    pub settle: Duration,
    /// Paint cursor/label/border feedback on the page.
    pub highlight: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            highlight: true,
        }
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    client: Arc<dyn AutomationClient>,
    page: Arc<dyn PageHandle>,
    options: ExecutorOptions,
}

impl ActionExecutor {
    pub fn new(
        client: Arc<dyn AutomationClient>,
        page: Arc<dyn PageHandle>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            client,
            page,
            options,
        }
    }

    /// Execute one action. Always yields exactly one result; any error is
    /// stringified into it, never propagated to the loop.
    pub async fn execute(&self, call: &ActionCall) -> ActionResult {
        debug!(action = %call.name, args = %call.args, "Executing action");
        match self.dispatch(call).await {
            Ok(result) => result,
            Err(e) => ActionResult::failed(format!(
                "{} failed (args: {}): {}",
                call.name, call.args, e
            )),
        }
    }

    async fn dispatch(&self, call: &ActionCall) -> Result<ActionResult> {
        match call.name.as_str() {
            "take_snapshot" => self.take_snapshot(call.bool_arg("verbose")).await,
            "scroll_document" => {
                let direction = call.str_arg("direction").to_string();
                let amount = call.f64_arg("amount").unwrap_or(500.0);
                self.scroll(&direction, amount).await
            }
            "pagedown" => self.scroll_pages(1.0).await,
            "pageup" => self.scroll_pages(-1.0).await,
            "evaluate_script" => self.evaluate_script(call).await,
            "open_web_browser" => {
                self.page.bring_to_front().await?;
                Ok(ActionResult::ok("Browser window is open."))
            }
            "click_at" => self.click_at(call).await,
            "type_text_at" => self.type_text_at(call).await,
            "drag_and_drop" => self.drag_and_drop(call).await,
            name => match FORWARDED.iter().find(|(public, _)| *public == name) {
                Some((_, operation)) => self.forward(call, operation).await,
                None => Ok(ActionResult::failed(format!(
                    "Action '{}' is not recognized",
                    name
                ))),
            },
        }
    }

    /// Viewport screenshot as base64 PNG, for the visual delegate.
    pub async fn screenshot(&self) -> Result<String> {
        self.page.screenshot().await
    }

    /// Run a trivial script so the automation server drops any cached DOM
    /// snapshot and re-reads the page on the next semantic action.
    pub async fn invalidate_snapshot(&self) {
        let call = ActionCall::new("evaluate_script", json!({"function": "() => true"}));
        let _ = self.execute(&call).await;
    }

    // ─── Forwarded actions ────────────────────────────────────────────

    async fn forward(&self, call: &ActionCall, operation: &str) -> Result<ActionResult> {
        if self.options.highlight {
            let _ = self.page.evaluate(&flash_border_js()).await;
        }
        let response = self.client.call_tool(operation, call.args.clone()).await?;
        let mut result = normalize_response(&response);
        if call.name == "navigate" {
            let url = call.str_arg("url");
            if !url.is_empty() {
                result.page_url = Some(url.to_string());
            }
        }
        Ok(result)
    }

    async fn take_snapshot(&self, verbose: bool) -> Result<ActionResult> {
        let response = self
            .client
            .call_tool("take_snapshot", json!({"verbose": verbose}))
            .await?;
        // Snapshot output is returned verbatim, no narrative splitting.
        let text = concat_text(&response);
        Ok(ActionResult::ok(text))
    }

    // ─── Scrolling ────────────────────────────────────────────────────

    async fn scroll(&self, direction: &str, amount: f64) -> Result<ActionResult> {
        let (dx, dy) = scroll_deltas(direction, amount);
        if self.options.highlight {
            let _ = self.page.evaluate(&scroll_indicator_js(direction)).await;
        }
        self.page
            .evaluate(&format!(
                "window.scrollBy({{left: {}, top: {}, behavior: 'smooth'}})",
                dx, dy
            ))
            .await?;
        tokio::time::sleep(self.options.settle).await;
        Ok(ActionResult::ok(format!(
            "Scrolled {} by {}px",
            direction, amount
        )))
    }

    async fn scroll_pages(&self, pages: f64) -> Result<ActionResult> {
        self.page
            .evaluate(&format!(
                "window.scrollBy({{top: window.innerHeight * {}, behavior: 'smooth'}})",
                pages
            ))
            .await?;
        tokio::time::sleep(self.options.settle).await;
        Ok(ActionResult::ok(if pages > 0.0 {
            "Scrolled down one page"
        } else {
            "Scrolled up one page"
        }))
    }

    // ─── Script evaluation ────────────────────────────────────────────

    async fn evaluate_script(&self, call: &ActionCall) -> Result<ActionResult> {
        let function = call.str_arg("function");
        let wrapped = wrap_function(function, call.args.get("args"));
        let response = self
            .client
            .call_tool("evaluate_script", json!({"function": wrapped}))
            .await?;
        Ok(normalize_response(&response))
    }

    // ─── Coordinate-based actions ─────────────────────────────────────

    async fn resolve_viewport(&self) -> Result<(f64, f64)> {
        match self.page.viewport_size().await {
            Ok(size) => Ok(size),
            Err(_) => {
                // Page report unavailable; ask the DOM directly.
                let value = self
                    .page
                    .evaluate("({width: window.innerWidth, height: window.innerHeight})")
                    .await?;
                let inner = value
                    .get("result")
                    .and_then(|r| r.get("value"))
                    .cloned()
                    .unwrap_or(value);
                let width = inner.get("width").and_then(|v| v.as_f64()).unwrap_or(1280.0);
                let height = inner
                    .get("height")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(720.0);
                Ok((width, height))
            }
        }
    }

    async fn pointer_feedback(&self, x: f64, y: f64) {
        if !self.options.highlight {
            return;
        }
        let _ = self.page.evaluate(&cursor_js(x, y)).await;
        let _ = self.page.evaluate(&label_js(x, y)).await;
    }

    async fn clear_feedback(&self) {
        if self.options.highlight {
            let _ = self.page.evaluate(CLEAR_OVERLAYS_JS).await;
        }
    }

    async fn click_at(&self, call: &ActionCall) -> Result<ActionResult> {
        let (x, y) = required_coords(call, "x", "y")?;
        let viewport = self.resolve_viewport().await?;
        let (px, py) = to_viewport(x, y, viewport);

        self.page.mouse_move(px, py).await?;
        self.pointer_feedback(px, py).await;
        self.page.click(px, py, 1).await?;
        tokio::time::sleep(self.options.settle).await;
        self.clear_feedback().await;

        Ok(ActionResult::ok(format!(
            "Clicked at ({:.0}, {:.0})",
            px, py
        )))
    }

    async fn type_text_at(&self, call: &ActionCall) -> Result<ActionResult> {
        let (x, y) = required_coords(call, "x", "y")?;
        let text = call.str_arg("text").to_string();
        let viewport = self.resolve_viewport().await?;
        let (px, py) = to_viewport(x, y, viewport);

        self.page.mouse_move(px, py).await?;
        self.pointer_feedback(px, py).await;
        self.page.click(px, py, 1).await?;

        if call.bool_arg("clear_before_typing") {
            self.page.press_key("Control+a").await?;
            self.page.press_key("Delete").await?;
        }
        self.page.type_text(&text).await?;
        if call.bool_arg("press_enter") {
            self.page.press_key("Enter").await?;
        }

        tokio::time::sleep(self.options.settle).await;
        self.clear_feedback().await;

        Ok(ActionResult::ok(format!(
            "Typed \"{}\" at ({:.0}, {:.0})",
            text, px, py
        )))
    }

    async fn drag_and_drop(&self, call: &ActionCall) -> Result<ActionResult> {
        let (x, y) = required_coords(call, "x", "y")?;
        let (dest_x, dest_y) = required_coords(call, "dest_x", "dest_y")?;
        let viewport = self.resolve_viewport().await?;
        let from = to_viewport(x, y, viewport);
        let to = to_viewport(dest_x, dest_y, viewport);

        self.page.mouse_move(from.0, from.1).await?;
        self.pointer_feedback(from.0, from.1).await;
        self.page.drag(from, to).await?;
        tokio::time::sleep(self.options.settle).await;
        self.clear_feedback().await;

        Ok(ActionResult::ok(format!(
            "Dragged from ({:.0}, {:.0}) to ({:.0}, {:.0})",
            from.0, from.1, to.0, to.1
        )))
    }
}

// ─── Pure helpers ─────────────────────────────────────────────────────

/// Convert normalized 0–1000 coordinates to viewport pixels.
pub fn to_viewport(x: f64, y: f64, viewport: (f64, f64)) -> (f64, f64) {
    (
        x * viewport.0 / COORDINATE_SCALE,
        y * viewport.1 / COORDINATE_SCALE,
    )
}

fn required_coords(call: &ActionCall, x_key: &str, y_key: &str) -> Result<(f64, f64)> {
    let x = call
        .f64_arg(x_key)
        .ok_or_else(|| webpilot_core::Error::Action(format!("missing '{}'", x_key)))?;
    let y = call
        .f64_arg(y_key)
        .ok_or_else(|| webpilot_core::Error::Action(format!("missing '{}'", y_key)))?;
    Ok((x, y))
}

pub fn scroll_deltas(direction: &str, amount: f64) -> (f64, f64) {
    match direction {
        "up" => (0.0, -amount),
        "left" => (-amount, 0.0),
        "right" => (amount, 0.0),
        _ => (0.0, amount),
    }
}

/// Concatenate all text parts; resource parts render as a bracketed stub.
fn concat_text(response: &ToolResponse) -> String {
    let mut pieces: Vec<String> = Vec::new();
    for part in &response.content {
        match part {
            ContentPart::Text { text } => pieces.push(text.clone()),
            ContentPart::Resource { uri } => pieces.push(format!("[resource: {}]", uri)),
        }
    }
    pieces.join("\n")
}

/// Normalize a tool response: concatenated text, with trailing snapshot text
/// split out so it isn't duplicated into the narrative channel.
pub fn normalize_response(response: &ToolResponse) -> ActionResult {
    let text = concat_text(response);
    let (narrative, snapshot) = split_snapshot(&text);
    ActionResult {
        output: narrative,
        error: None,
        snapshot,
        page_url: None,
    }
}

/// Split response text into (narrative, snapshot). A marker line wins; in
/// its absence, uid-reference lines are still captured into the snapshot.
pub fn split_snapshot(text: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = text.lines().collect();

    if let Some(marker_idx) = lines
        .iter()
        .position(|l| l.to_lowercase().contains(SNAPSHOT_MARKER))
    {
        let narrative = lines[..marker_idx].join("\n").trim().to_string();
        let snapshot = lines[marker_idx + 1..].join("\n").trim().to_string();
        let snapshot = if snapshot.is_empty() {
            None
        } else {
            Some(snapshot)
        };
        return (narrative, snapshot);
    }

    let mut narrative_lines: Vec<&str> = Vec::new();
    let mut snapshot_lines: Vec<&str> = Vec::new();
    for line in &lines {
        if UID_LINE.is_match(line) {
            snapshot_lines.push(line);
        } else {
            narrative_lines.push(line);
        }
    }

    let narrative = narrative_lines.join("\n").trim().to_string();
    let snapshot = if snapshot_lines.is_empty() {
        None
    } else {
        Some(snapshot_lines.join("\n"))
    };
    (narrative, snapshot)
}

/// Wrap a function expression in an IIFE so both expression and statement
/// forms work, stringifying object results to JSON.
pub fn wrap_function(function: &str, args: Option<&Value>) -> String {
    let call_args = match args {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    format!(
        "(() => {{ const __result = ({})({}); \
         if (typeof __result === 'object' && __result !== null) \
         return JSON.stringify(__result); \
         return String(__result); }})()",
        function, call_args
    )
}

// ─── Cosmetic feedback scripts ────────────────────────────────────────

const CLEAR_OVERLAYS_JS: &str = "\
['__wp_cursor', '__wp_label', '__wp_scroll'].forEach(id => { \
  const el = document.getElementById(id); if (el) el.remove(); });";

fn cursor_js(x: f64, y: f64) -> String {
    format!(
        "(() => {{ let c = document.getElementById('__wp_cursor'); \
         if (!c) {{ c = document.createElement('div'); c.id = '__wp_cursor'; \
         c.style.cssText = 'position:fixed;z-index:2147483647;width:14px;height:14px;\
border-radius:50%;background:rgba(66,133,244,0.85);pointer-events:none;\
transition:left 0.2s,top 0.2s'; document.body.appendChild(c); }} \
         c.style.left = '{:.0}px'; c.style.top = '{:.0}px'; }})()",
        x, y
    )
}

/// Best-effort label naming the element under the pointer.
fn label_js(x: f64, y: f64) -> String {
    format!(
        "(() => {{ const el = document.elementFromPoint({x:.0}, {y:.0}); \
         if (!el) return; \
         const name = (el.innerText || el.getAttribute('aria-label') || \
el.getAttribute('placeholder') || el.getAttribute('title') || \
el.getAttribute('alt') || '').trim().slice(0, {max}); \
         if (!name) return; \
         let l = document.getElementById('__wp_label'); \
         if (!l) {{ l = document.createElement('div'); l.id = '__wp_label'; \
         l.style.cssText = 'position:fixed;z-index:2147483647;padding:2px 6px;\
background:#222;color:#fff;font:12px sans-serif;border-radius:3px;\
pointer-events:none'; document.body.appendChild(l); }} \
         l.textContent = name; \
         l.style.left = '{x:.0}px'; l.style.top = 'calc({y:.0}px + 18px)'; }})()",
        x = x,
        y = y,
        max = LABEL_MAX_CHARS
    )
}

fn flash_border_js() -> String {
    "(() => { const old = document.getElementById('__wp_border'); if (old) old.remove(); \
     const b = document.createElement('div'); b.id = '__wp_border'; \
     b.style.cssText = 'position:fixed;inset:0;z-index:2147483646;pointer-events:none;\
box-shadow:inset 0 0 0 3px rgba(66,133,244,0.6)'; \
     document.body.appendChild(b); setTimeout(() => b.remove(), 600); })()"
        .to_string()
}

fn scroll_indicator_js(direction: &str) -> String {
    let arrow = match direction {
        "up" => "\\u2191",
        "left" => "\\u2190",
        "right" => "\\u2192",
        _ => "\\u2193",
    };
    format!(
        "(() => {{ let s = document.getElementById('__wp_scroll'); \
         if (!s) {{ s = document.createElement('div'); s.id = '__wp_scroll'; \
         s.style.cssText = 'position:fixed;right:16px;bottom:16px;z-index:2147483647;\
font:24px sans-serif;color:#4285f4;pointer-events:none'; \
         document.body.appendChild(s); }} \
         s.textContent = '{}'; setTimeout(() => s.remove(), 700); }})()",
        arrow
    )
}
