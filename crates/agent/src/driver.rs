//! Generic bounded conversational tool-loop.
//!
//! Both the orchestrator and the visual delegate are this one state machine,
//! parameterized by a tool vocabulary, an iteration cap, and a `TurnPolicy`
//! that decides what happens with each round of function calls. Each round
//! step returns the next turn's input explicitly, so the state transitions
//! stay auditable.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use webpilot_core::types::{ActionCall, Content, Part, TaskOutcome};
use webpilot_core::{Error, Result};
use webpilot_providers::{GenerateRequest, ModelClient, ToolDecl};

use crate::transcript::TranscriptSink;

pub struct LoopConfig {
    pub name: &'static str,
    pub model: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDecl>,
    pub max_iterations: usize,
}

/// Everything one model turn produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelTurn {
    pub text: String,
    pub thoughts: Vec<String>,
    pub calls: Vec<ActionCall>,
}

/// Outcome of handling one round of a model turn.
pub enum RoundStep {
    /// Keep looping; these parts become the next turn's input.
    Continue(Vec<Part>),
    Finished(String),
    Cancelled,
}

#[async_trait]
pub trait TurnPolicy: Send {
    /// Execute one round of function calls, strictly in order.
    async fn execute_calls(
        &mut self,
        calls: &[ActionCall],
        cancel: &CancellationToken,
    ) -> Result<RoundStep>;

    /// The model returned no function calls this turn.
    fn no_calls(&mut self, narrative: &str) -> RoundStep;

    /// Message to return when the iteration cap is reached.
    fn exhausted(&mut self) -> String;
}

/// Sink for user-facing progress lines (thought summaries, tool
/// announcements, the completion banner).
#[derive(Clone, Default)]
pub struct StatusSink(Option<Arc<dyn Fn(&str) + Send + Sync>>);

impl StatusSink {
    pub fn new(callback: Option<Box<dyn Fn(&str) + Send + Sync>>) -> Self {
        Self(callback.map(Arc::from))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, line: &str) {
        if let Some(callback) = &self.0 {
            callback(line);
        }
    }
}

pub struct BoundedLoop {
    pub model: Arc<dyn ModelClient>,
    pub config: LoopConfig,
    pub transcript: Arc<dyn TranscriptSink>,
    pub status: StatusSink,
}

impl BoundedLoop {
    pub async fn run(
        &self,
        first_input: Vec<Part>,
        policy: &mut dyn TurnPolicy,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let mut history: Vec<Content> = Vec::new();
        let mut turn_input = first_input;

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }

            history.push(Content::user(std::mem::take(&mut turn_input)));

            let turn = match self.call_model(&history, cancel).await {
                Ok(Some(turn)) => turn,
                Ok(None) => return Ok(TaskOutcome::Cancelled),
                Err(Error::EmptyResponse) => {
                    // Recoverable hiccup: drop the turn and re-send the same
                    // input on the next iteration.
                    debug!(
                        name = self.config.name,
                        iteration, "Empty model response, retrying turn"
                    );
                    if let Some(content) = history.pop() {
                        turn_input = content.parts;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            for thought in &turn.thoughts {
                self.status.emit(thought);
            }

            self.transcript
                .record_turn(self.config.name, iteration, &history, &turn);

            let mut model_parts: Vec<Part> = Vec::new();
            if !turn.text.is_empty() {
                model_parts.push(Part::text(turn.text.clone()));
            }
            for call in &turn.calls {
                model_parts.push(Part::FunctionCall { call: call.clone() });
            }
            history.push(Content::model(model_parts));

            let step = if turn.calls.is_empty() {
                policy.no_calls(&turn.text)
            } else {
                policy.execute_calls(&turn.calls, cancel).await?
            };

            match step {
                RoundStep::Continue(parts) => turn_input = parts,
                RoundStep::Finished(summary) => return Ok(TaskOutcome::Completed(summary)),
                RoundStep::Cancelled => return Ok(TaskOutcome::Cancelled),
            }
        }

        Ok(TaskOutcome::Exhausted(policy.exhausted()))
    }

    /// One streamed model call, aggregated into a `ModelTurn`. Returns
    /// `None` when cancellation arrives mid-stream.
    async fn call_model(
        &self,
        history: &[Content],
        cancel: &CancellationToken,
    ) -> Result<Option<ModelTurn>> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            system_instruction: self.config.system_instruction.clone(),
            tools: self.config.tools.clone(),
            contents: history.to_vec(),
        };

        let mut stream = self.model.stream_generate(request).await?;
        let mut turn = ModelTurn::default();

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let chunk = item?;
            if let Some(text) = chunk.text {
                turn.text.push_str(&text);
            }
            if let Some(thought) = chunk.thought {
                turn.thoughts.push(status_line(&thought));
            }
            turn.calls.extend(chunk.calls);
        }

        Ok(Some(turn))
    }
}

/// Compress a thought into one short status line.
fn status_line(thought: &str) -> String {
    let first = thought.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut line: String = first.trim().chars().take(100).collect();
    if first.trim().chars().count() > 100 {
        line.push('…');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_truncates() {
        let long = "x".repeat(150);
        let line = status_line(&long);
        assert_eq!(line.chars().count(), 101);
        assert!(line.ends_with('…'));
    }

    #[test]
    fn test_status_line_takes_first_nonempty_line() {
        assert_eq!(status_line("\n\n  plan the click  \nmore"), "plan the click");
    }
}
