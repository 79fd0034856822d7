use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single named action emitted by the model, with a flat argument map.
/// Semantic and visual loops use disjoint vocabularies of names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ActionCall {
    pub fn new(name: &str, args: Value) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }

    /// Fetch a string argument, or empty string if absent.
    pub fn str_arg(&self, key: &str) -> &str {
        self.args.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn f64_arg(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(|v| v.as_f64())
    }

    pub fn bool_arg(&self, key: &str) -> bool {
        self.args
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Normalized outcome of executing one action. Every action, success or
/// failure, yields exactly one of these; failures are stringified here and
/// fed back to the model, never raised out of the loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub output: String,
    pub error: Option<String>,
    pub snapshot: Option<String>,
    pub page_url: Option<String>,
}

impl ActionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Render as a function-response payload for the model.
    pub fn render(&self) -> Value {
        let mut obj = json!({});
        match &self.error {
            Some(err) => obj["error"] = json!(err),
            None => obj["output"] = json!(self.output),
        }
        if let Some(snap) = &self.snapshot {
            obj["snapshot"] = json!(snap);
        }
        if let Some(url) = &self.page_url {
            obj["url"] = json!(url);
        }
        obj
    }

    /// Flattened view of output and error, used for failure-hint matching
    /// and action-history lines.
    pub fn text(&self) -> String {
        match &self.error {
            Some(err) => err.clone(),
            None => self.output.clone(),
        }
    }
}

/// One part of a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    InlineImage { mime: String, data: String },
    FunctionCall { call: ActionCall },
    FunctionResponse { name: String, response: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn png(data: impl Into<String>) -> Self {
        Part::InlineImage {
            mime: "image/png".to_string(),
            data: data.into(),
        }
    }

    pub fn function_response(name: &str, response: Value) -> Self {
        Part::FunctionResponse {
            name: name.to_string(),
            response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// An ordered list of parts attributed to one side of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }
}

/// Terminal state of one agent loop run.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The model called the completion action with this summary.
    Completed(String),
    /// The iteration cap was reached; carries the loop's default message.
    Exhausted(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn into_message(self) -> String {
        match self {
            TaskOutcome::Completed(summary) => summary,
            TaskOutcome::Exhausted(message) => message,
            TaskOutcome::Cancelled => "Browser task cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_result_render_ok() {
        let result = ActionResult::ok("navigated");
        let rendered = result.render();
        assert_eq!(rendered["output"], "navigated");
        assert!(rendered.get("error").is_none());
    }

    #[test]
    fn test_action_result_render_error() {
        let result = ActionResult::failed("click failed: element gone");
        let rendered = result.render();
        assert_eq!(rendered["error"], "click failed: element gone");
        assert!(rendered.get("output").is_none());
    }

    #[test]
    fn test_action_call_args() {
        let call = ActionCall::new(
            "click_at",
            json!({"x": 500, "y": 250, "press_enter": true, "text": "hi"}),
        );
        assert_eq!(call.f64_arg("x"), Some(500.0));
        assert_eq!(call.str_arg("text"), "hi");
        assert!(call.bool_arg("press_enter"));
        assert!(!call.bool_arg("clear_before_typing"));
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            TaskOutcome::Completed("Done".into()).into_message(),
            "Done"
        );
        assert_eq!(
            TaskOutcome::Cancelled.into_message(),
            "Browser task cancelled."
        );
    }
}
