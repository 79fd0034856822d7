//! The primary control loop.
//!
//! Connects the browser session, seeds the conversation with the task and an
//! initial accessibility snapshot (plus an overlay warning when one is
//! detected), then drives the semantic tool vocabulary until the model calls
//! `complete_task`, the iteration cap is reached, or cancellation arrives.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use webpilot_browser::actions::{ActionExecutor, ExecutorOptions};
use webpilot_browser::overlay;
use webpilot_browser::session::Session;
use webpilot_core::config::{expand_home, Config};
use webpilot_core::types::{ActionCall, ActionResult, Part, TaskOutcome};
use webpilot_core::{Error, Result};
use webpilot_providers::ModelClient;

use crate::driver::{BoundedLoop, LoopConfig, RoundStep, StatusSink, TurnPolicy};
use crate::transcript::{FileTranscript, NullTranscript, TranscriptSink};
use crate::visual::VisualDelegate;
use crate::vocabulary::{semantic_tools, COMPLETE_TASK, DELEGATE};

const SEMANTIC_SYSTEM: &str = "\
You are a browser automation agent. You interact with web pages through the \
provided tools, addressing elements by the uid shown in accessibility \
snapshots. Snapshots go stale whenever the page changes: after navigation, \
clicks, or form input, take a fresh snapshot before addressing elements. \
Work step by step, one page interaction at a time. If an element cannot be \
addressed structurally (canvas content, targets identified only by their \
appearance, free-form drag gestures), delegate that step to the visual agent. \
When the task is done, or you determine it cannot be completed, call \
complete_task with a summary. Always either call a tool or complete the task.";

/// Injected after an action whose result suggests the page refused the
/// interaction.
const INTERACTION_HINT: &str = "\
The last action could not interact with its target. An overlay (cookie \
banner, modal, popup) may be blocking it: take a snapshot and look for \
dismiss controls such as 'close', 'got it', 'accept' or an × button, deal \
with those first, then retry.";

/// Corrective instruction for a turn that neither acted nor completed.
const FORCED_COMPLETION: &str = "\
You did not call any tool. You must either act through a tool call or finish: \
call complete_task now with a summary of what was accomplished, or an \
explanation of why the task cannot be completed.";

/// Returned when the iteration cap is reached without complete_task.
const DEFAULT_FINISHED: &str = "Task finished.";

#[derive(Clone)]
pub struct AgentOptions {
    pub model: String,
    pub visual_model: String,
    pub max_iterations: usize,
    pub visual_max_iterations: usize,
    pub failure_hints: Vec<String>,
    pub executor: ExecutorOptions,
}

impl AgentOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.agent.model.clone(),
            visual_model: config.agent.visual_model.clone(),
            max_iterations: config.agent.max_iterations,
            visual_max_iterations: config.agent.visual_max_iterations,
            failure_hints: config.agent.failure_hints.clone(),
            executor: ExecutorOptions {
                highlight: !config.browser.headless,
                ..ExecutorOptions::default()
            },
        }
    }
}

/// The browser sub-agent. Owns its session exclusively; nothing else may
/// reach the page or automation client except through it.
pub struct BrowserAgent {
    session: Session,
    model: Arc<dyn ModelClient>,
    options: AgentOptions,
    transcript: Arc<dyn TranscriptSink>,
}

impl BrowserAgent {
    pub fn new(config: &Config, model: Arc<dyn ModelClient>) -> Self {
        let transcript: Arc<dyn TranscriptSink> =
            match FileTranscript::create(&expand_home(&config.agent.transcript_dir)) {
                Ok(file) => Arc::new(file),
                Err(e) => {
                    warn!("Transcript disabled: {}", e);
                    Arc::new(NullTranscript)
                }
            };
        Self {
            session: Session::new(&config.browser, &config.automation),
            model,
            options: AgentOptions::from_config(config),
            transcript,
        }
    }

    pub fn with_session(
        session: Session,
        model: Arc<dyn ModelClient>,
        options: AgentOptions,
        transcript: Arc<dyn TranscriptSink>,
    ) -> Self {
        Self {
            session,
            model,
            options,
            transcript,
        }
    }

    /// Run one browser task to completion. The returned value is always a
    /// plain string: the completion summary, a default message on
    /// exhaustion or cancellation, or an error description for the two
    /// fatal paths (connection failure, model transport failure).
    pub async fn run_task(
        &mut self,
        task: &str,
        cancel: CancellationToken,
        on_status: Option<Box<dyn Fn(&str) + Send + Sync>>,
    ) -> String {
        let status = StatusSink::new(on_status);
        let message = match self.run_inner(task, &cancel, &status).await {
            Ok(outcome) => outcome.into_message(),
            Err(e) => format!("Browser task failed: {}", e),
        };
        status.emit(&message);
        message
    }

    async fn run_inner(
        &mut self,
        task: &str,
        cancel: &CancellationToken,
        status: &StatusSink,
    ) -> Result<TaskOutcome> {
        // The only unconditionally fatal path in the loop.
        self.session.ensure_connection().await.map_err(|e| {
            Error::Session(format!("could not establish a browser connection: {}", e))
        })?;
        status.emit("Browser connected");

        let executor = ActionExecutor::new(
            self.session.client().await?,
            self.session.page().await?,
            self.options.executor.clone(),
        );

        let mut first_input = vec![Part::text(task)];
        let snapshot = executor
            .execute(&ActionCall::new("take_snapshot", json!({})))
            .await;
        if !snapshot.is_err() && !snapshot.output.is_empty() {
            let scan = overlay::scan_snapshot(&snapshot.output);
            if let Some(warning) = overlay::overlay_warning(&scan) {
                status.emit("Blocking overlay detected on the page");
                first_input.push(Part::text(warning));
            }
            first_input.push(Part::text(format!(
                "Current page snapshot:\n{}",
                snapshot.output
            )));
        }

        let mut policy = SemanticPolicy {
            executor,
            model: self.model.clone(),
            options: self.options.clone(),
            transcript: self.transcript.clone(),
            status: status.clone(),
        };

        let driver = BoundedLoop {
            model: self.model.clone(),
            config: LoopConfig {
                name: "orchestrator",
                model: self.options.model.clone(),
                system_instruction: SEMANTIC_SYSTEM.to_string(),
                tools: semantic_tools(),
                max_iterations: self.options.max_iterations,
            },
            transcript: self.transcript.clone(),
            status: status.clone(),
        };

        driver.run(first_input, &mut policy, cancel).await
    }
}

struct SemanticPolicy {
    executor: ActionExecutor,
    model: Arc<dyn ModelClient>,
    options: AgentOptions,
    transcript: Arc<dyn TranscriptSink>,
    status: StatusSink,
}

#[async_trait]
impl TurnPolicy for SemanticPolicy {
    async fn execute_calls(
        &mut self,
        calls: &[ActionCall],
        cancel: &CancellationToken,
    ) -> Result<RoundStep> {
        let mut parts: Vec<Part> = Vec::new();

        // Strictly sequential: state-changing actions invalidate the uids
        // the model was looking at, so calls never run concurrently.
        for call in calls {
            if cancel.is_cancelled() {
                self.status
                    .emit("Cancellation requested, skipping remaining actions");
                return Ok(RoundStep::Cancelled);
            }

            if call.name == COMPLETE_TASK {
                let summary = match call.args.get("summary").and_then(Value::as_str) {
                    Some(s) if !s.is_empty() => s.to_string(),
                    _ => DEFAULT_FINISHED.to_string(),
                };
                return Ok(RoundStep::Finished(summary));
            }

            self.status.emit(&describe_call(call));

            let result = if call.name == DELEGATE {
                let instruction = call.str_arg("instruction").to_string();
                let screenshot = self.executor.screenshot().await.ok();
                let delegate = VisualDelegate {
                    executor: self.executor.clone(),
                    model: self.model.clone(),
                    model_id: self.options.visual_model.clone(),
                    max_iterations: self.options.visual_max_iterations,
                    transcript: self.transcript.clone(),
                    status: self.status.clone(),
                };
                let text = delegate.run(&instruction, screenshot, cancel).await?;
                ActionResult::ok(text)
            } else {
                self.executor.execute(call).await
            };

            let hint = needs_interaction_hint(&result, &self.options.failure_hints);
            parts.push(Part::function_response(&call.name, result.render()));
            if hint {
                parts.push(Part::text(INTERACTION_HINT));
            }
        }

        Ok(RoundStep::Continue(parts))
    }

    fn no_calls(&mut self, _narrative: &str) -> RoundStep {
        // Protocol violation: the model must act or explicitly finish.
        warn!("Model produced neither a tool call nor a completion");
        self.status
            .emit("Model made no tool call, asking it to finish explicitly");
        RoundStep::Continue(vec![Part::text(FORCED_COMPLETION)])
    }

    fn exhausted(&mut self) -> String {
        DEFAULT_FINISHED.to_string()
    }
}

fn needs_interaction_hint(result: &ActionResult, hints: &[String]) -> bool {
    let text = result.text().to_lowercase();
    hints.iter().any(|hint| text.contains(&hint.to_lowercase()))
}

fn describe_call(call: &ActionCall) -> String {
    let args = match call.args.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, short_value(v)))
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };
    format!("→ {}({})", call.name, args)
}

fn short_value(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() > 40 {
        let truncated: String = rendered.chars().take(40).collect();
        format!("{}…", truncated)
    } else {
        rendered
    }
}
