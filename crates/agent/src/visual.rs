//! The coordinate-based visual delegate.
//!
//! Invoked by the orchestrator for sub-tasks that need visual grounding.
//! Each round is grounded by a fresh screenshot; actions address the page by
//! normalized coordinates, never by element uid. Element-id addressing is
//! cheap and robust for structured pages but cannot target purely visual
//! distinctions, so this loop is reserved for explicit delegation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use webpilot_browser::actions::ActionExecutor;
use webpilot_core::types::{ActionCall, Part, TaskOutcome};
use webpilot_core::Result;
use webpilot_providers::ModelClient;

use crate::driver::{BoundedLoop, LoopConfig, RoundStep, StatusSink, TurnPolicy};
use crate::transcript::TranscriptSink;
use crate::vocabulary::visual_tools;

pub struct VisualDelegate {
    pub executor: ActionExecutor,
    pub model: Arc<dyn ModelClient>,
    pub model_id: String,
    pub max_iterations: usize,
    pub transcript: Arc<dyn TranscriptSink>,
    pub status: StatusSink,
}

impl VisualDelegate {
    /// Run the delegated instruction. The result is a plain text report the
    /// orchestrator folds back as the delegation call's function response.
    pub async fn run(
        &self,
        instruction: &str,
        screenshot: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut first_input = vec![Part::text(format!("Delegated task: {}", instruction))];
        if let Some(png) = screenshot {
            first_input.push(Part::png(png));
        }

        let mut policy = VisualPolicy {
            executor: self.executor.clone(),
            history: Vec::new(),
            status: self.status.clone(),
        };

        let driver = BoundedLoop {
            model: self.model.clone(),
            config: LoopConfig {
                name: "visual",
                model: self.model_id.clone(),
                system_instruction: visual_system(instruction),
                tools: visual_tools(),
                max_iterations: self.max_iterations,
            },
            transcript: self.transcript.clone(),
            status: self.status.clone(),
        };

        let outcome = driver.run(first_input, &mut policy, cancel).await?;

        match outcome {
            TaskOutcome::Completed(report) | TaskOutcome::Exhausted(report) => {
                // The automation server caches DOM state; a trivial script
                // forces a fresh snapshot when the orchestrator resumes.
                self.executor.invalidate_snapshot().await;
                Ok(report)
            }
            TaskOutcome::Cancelled => Ok("Visual task cancelled before completion.".to_string()),
        }
    }
}

fn visual_system(instruction: &str) -> String {
    format!(
        "You are a visual browser agent operating on screenshots. Your task: \
         {}. Coordinates are on a 0-1000 scale relative to the screenshot. \
         Act with the provided coordinate tools; each round you receive a \
         fresh screenshot of the result. When the task is done, respond with \
         a short report and no tool call.",
        instruction
    )
}

struct VisualPolicy {
    executor: ActionExecutor,
    /// Human-readable log of every action, for the final report.
    history: Vec<String>,
    status: StatusSink,
}

#[async_trait]
impl TurnPolicy for VisualPolicy {
    async fn execute_calls(
        &mut self,
        calls: &[ActionCall],
        cancel: &CancellationToken,
    ) -> Result<RoundStep> {
        let mut parts: Vec<Part> = Vec::new();

        for call in calls {
            if cancel.is_cancelled() {
                return Ok(RoundStep::Cancelled);
            }
            self.status.emit(&format!("visual → {}", call.name));
            // Per-call failures are captured into the result, never abort
            // the batch.
            let result = self.executor.execute(call).await;
            self.history.push(format!(
                "{}({}) -> {}",
                call.name,
                call.args,
                first_line(&result.text())
            ));
            parts.push(Part::function_response(&call.name, result.render()));
        }

        // Ground the next round with a fresh screenshot.
        if let Ok(png) = self.executor.screenshot().await {
            parts.push(Part::png(png));
        }

        Ok(RoundStep::Continue(parts))
    }

    fn no_calls(&mut self, narrative: &str) -> RoundStep {
        RoundStep::Finished(compose_report(narrative, &self.history))
    }

    fn exhausted(&mut self) -> String {
        compose_report(
            "Reached the visual action limit; the task may be incomplete.",
            &self.history,
        )
    }
}

fn compose_report(narrative: &str, history: &[String]) -> String {
    let mut report = narrative.trim().to_string();
    if report.is_empty() {
        report = "Visual task finished.".to_string();
    }
    if !history.is_empty() {
        report.push_str("\nActions taken:\n");
        report.push_str(&history.join("\n"));
    }
    report
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::*;
    use crate::transcript::NullTranscript;
    use serde_json::json;
    use webpilot_browser::actions::ExecutorOptions;
    use webpilot_core::types::Part;

    fn delegate(
        model: Arc<ScriptedModel>,
        client: Arc<RecordingClient>,
        page: Arc<StubPage>,
    ) -> VisualDelegate {
        VisualDelegate {
            executor: ActionExecutor::new(
                client,
                page,
                ExecutorOptions {
                    settle: std::time::Duration::ZERO,
                    highlight: false,
                },
            ),
            model,
            model_id: "visual-test".to_string(),
            max_iterations: 5,
            transcript: Arc::new(NullTranscript),
            status: StatusSink::none(),
        }
    }

    #[tokio::test]
    async fn test_click_then_report() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_round(vec![ActionCall::new("click_at", json!({"x": 500, "y": 500}))]),
            text_round("Clicked the red button."),
        ]));
        let client = Arc::new(RecordingClient::default());
        let page = Arc::new(StubPage::default());
        let visual = delegate(model.clone(), client.clone(), page.clone());

        let report = visual
            .run("click the red button", Some("cGl4ZWxz".into()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.contains("Clicked the red button."));
        assert!(report.contains("click_at"));
        // Viewport 800x600: normalized (500,500) → pixel (400,300)
        assert!(page.recorded().contains(&"click:400,300,1".to_string()));
        // Completion invalidated the cached snapshot state
        assert!(client
            .recorded_ops()
            .iter()
            .any(|(op, _)| op == "evaluate_script"));
    }

    #[tokio::test]
    async fn test_screenshot_appended_after_each_round() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_round(vec![ActionCall::new("click_at", json!({"x": 0, "y": 0}))]),
            text_round("done"),
        ]));
        let client = Arc::new(RecordingClient::default());
        let page = Arc::new(StubPage::default());
        let visual = delegate(model.clone(), client, page);

        visual
            .run("task", None, &CancellationToken::new())
            .await
            .unwrap();

        let second_request = model.request(1);
        let last_content = second_request.contents.last().unwrap();
        assert!(last_content
            .parts
            .iter()
            .any(|p| matches!(p, Part::InlineImage { .. })));
        // And it follows the function responses of the round
        assert!(matches!(
            last_content.parts.first(),
            Some(Part::FunctionResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_possible_incompleteness() {
        let model = Arc::new(ScriptedModel::new(vec![calls_round(vec![
            ActionCall::new("click_at", json!({"x": 1, "y": 1})),
        ])]));
        let client = Arc::new(RecordingClient::default());
        let page = Arc::new(StubPage::default());
        let mut visual = delegate(model, client, page);
        visual.max_iterations = 1;

        let report = visual
            .run("task", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.contains("may be incomplete"));
        assert!(report.contains("click_at"));
    }

    #[tokio::test]
    async fn test_per_call_error_captured_not_fatal() {
        let model = Arc::new(ScriptedModel::new(vec![
            calls_round(vec![
                ActionCall::new("click_at", json!({"x": 10, "y": 10})),
                ActionCall::new("press_key", json!({"key": "Enter"})),
            ]),
            text_round("finished"),
        ]));
        let client = Arc::new(RecordingClient::default());
        let page = Arc::new(StubPage::failing_on("click"));
        let visual = delegate(model.clone(), client.clone(), page.clone());

        let report = visual
            .run("task", None, &CancellationToken::new())
            .await
            .unwrap();

        // The failing click did not stop the key press after it
        assert!(client
            .recorded_ops()
            .iter()
            .any(|(op, _)| op == "press_key"));
        assert!(report.contains("finished"));

        let second_request = model.request(1);
        let last_content = second_request.contents.last().unwrap();
        let error_folded = last_content.parts.iter().any(|p| matches!(
            p,
            Part::FunctionResponse { name, response }
                if name == "click_at"
                    && response["error"].as_str().unwrap().starts_with("click_at failed")
        ));
        assert!(error_folded);
    }

    #[tokio::test]
    async fn test_cancelled_at_loop_top() {
        let model = Arc::new(ScriptedModel::new(vec![text_round("unused")]));
        let client = Arc::new(RecordingClient::default());
        let page = Arc::new(StubPage::default());
        let visual = delegate(model.clone(), client, page);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = visual.run("task", None, &cancel).await.unwrap();

        assert_eq!(report, "Visual task cancelled before completion.");
        assert_eq!(model.request_count(), 0);
    }

    #[test]
    fn test_compose_report_empty_narrative() {
        let report = compose_report("", &["click_at({}) -> ok".to_string()]);
        assert!(report.starts_with("Visual task finished."));
        assert!(report.contains("Actions taken:"));
    }
}
