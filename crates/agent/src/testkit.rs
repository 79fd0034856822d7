//! Shared fakes for loop tests: a scripted model, a recording automation
//! client, a stub page, and session wiring that never launches a browser.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use webpilot_browser::mcp::{AutomationClient, ClientStatus, ToolResponse};
use webpilot_browser::page::PageHandle;
use webpilot_browser::session::{
    BrowserLauncher, ClientConnector, LaunchOptions, LaunchedBrowser, ProcessGuard, Session,
};
use webpilot_core::types::ActionCall;
use webpilot_core::{Error, Result};
use webpilot_providers::{ChunkStream, GenerateRequest, ModelClient, StreamChunk};

use crate::orchestrator::{AgentOptions, BrowserAgent};
use crate::transcript::NullTranscript;
use crate::vocabulary::COMPLETE_TASK;
use webpilot_browser::actions::ExecutorOptions;

// ─── Scripted model ──────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedRound {
    pub chunks: Vec<StreamChunk>,
    pub empty: bool,
    pub error: Option<String>,
    pub cancel_mid_stream: Option<CancellationToken>,
}

impl ScriptedRound {
    pub fn of(calls: Vec<ActionCall>) -> Self {
        Self {
            chunks: vec![StreamChunk {
                calls,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn empty_response() -> Self {
        Self {
            empty: true,
            ..Default::default()
        }
    }

    pub fn transport_error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

pub fn calls_round(calls: Vec<ActionCall>) -> ScriptedRound {
    ScriptedRound::of(calls)
}

pub fn complete_round(summary: &str) -> ScriptedRound {
    ScriptedRound::of(vec![ActionCall::new(
        COMPLETE_TASK,
        json!({"summary": summary}),
    )])
}

pub fn text_round(text: &str) -> ScriptedRound {
    ScriptedRound {
        chunks: vec![StreamChunk {
            text: Some(text.to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub struct ScriptedModel {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> GenerateRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ScriptedRound::empty_response);

        let items: Vec<Result<StreamChunk>> = if round.empty {
            vec![Err(Error::EmptyResponse)]
        } else if let Some(message) = round.error {
            vec![Err(Error::Provider(message))]
        } else {
            round.chunks.into_iter().map(Ok).collect()
        };

        let token = round.cancel_mid_stream;
        let stream = futures::StreamExt::inspect(futures::stream::iter(items), move |_| {
            if let Some(t) = &token {
                t.cancel();
            }
        });
        Ok(Box::pin(stream))
    }
}

// ─── Recording automation client ─────────────────────────────────────

#[derive(Default)]
pub struct RecordingClient {
    ops: Mutex<Vec<(String, Value)>>,
    canned: Option<(String, String)>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl RecordingClient {
    pub fn with_canned_response(operation: &str, text: &str) -> Self {
        Self {
            canned: Some((operation.to_string(), text.to_string())),
            ..Default::default()
        }
    }

    pub fn cancelling_on(operation: &str, token: CancellationToken) -> Self {
        Self {
            cancel_on: Some((operation.to_string(), token)),
            ..Default::default()
        }
    }

    pub fn recorded_ops(&self) -> Vec<(String, Value)> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationClient for RecordingClient {
    async fn call_tool(&self, operation: &str, args: Value) -> Result<ToolResponse> {
        self.ops
            .lock()
            .unwrap()
            .push((operation.to_string(), args));

        if let Some((target, token)) = &self.cancel_on {
            if target == operation {
                token.cancel();
            }
        }

        if let Some((target, text)) = &self.canned {
            if target == operation {
                return Ok(ToolResponse::text(text.clone()));
            }
        }
        Ok(ToolResponse::text("ok"))
    }

    fn status(&self) -> ClientStatus {
        ClientStatus::Connected
    }
}

// ─── Stub page ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubPage {
    ops: Mutex<Vec<String>>,
    fail_op: Option<String>,
}

impl StubPage {
    pub fn failing_on(op: &str) -> Self {
        Self {
            fail_op: Some(op.to_string()),
            ..Default::default()
        }
    }

    pub fn recorded(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) -> Result<()> {
        if self
            .fail_op
            .as_ref()
            .is_some_and(|f| op.starts_with(f.as_str()))
        {
            return Err(Error::Action(format!("{} rejected by page", op)));
        }
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

#[async_trait]
impl PageHandle for StubPage {
    async fn screenshot(&self) -> Result<String> {
        Ok("cGl4ZWxz".to_string())
    }
    async fn viewport_size(&self) -> Result<(f64, f64)> {
        Ok((800.0, 600.0))
    }
    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let prefix: String = expression.chars().take(24).collect();
        self.record(format!("evaluate:{}", prefix))?;
        Ok(Value::Null)
    }
    async fn mouse_move(&self, x: f64, y: f64) -> Result<()> {
        self.record(format!("move:{:.0},{:.0}", x, y))
    }
    async fn click(&self, x: f64, y: f64, count: i32) -> Result<()> {
        self.record(format!("click:{:.0},{:.0},{}", x, y, count))
    }
    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<()> {
        self.record(format!(
            "drag:{:.0},{:.0}->{:.0},{:.0}",
            from.0, from.1, to.0, to.1
        ))
    }
    async fn type_text(&self, text: &str) -> Result<()> {
        self.record(format!("type:{}", text))
    }
    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(format!("key:{}", key))
    }
    async fn bring_to_front(&self) -> Result<()> {
        self.record("front".to_string())
    }
}

// ─── Session wiring ──────────────────────────────────────────────────

struct AlwaysAlive;

impl ProcessGuard for AlwaysAlive {
    fn alive(&mut self) -> bool {
        true
    }
}

struct FakeLauncher {
    page: Arc<dyn PageHandle>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<LaunchedBrowser> {
        Ok(LaunchedBrowser {
            page: self.page.clone(),
            process: Box::new(AlwaysAlive),
        })
    }
}

struct FailingLauncher;

#[async_trait]
impl BrowserLauncher for FailingLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<LaunchedBrowser> {
        Err(Error::Session("no browser binary found".to_string()))
    }
}

struct FakeConnector {
    client: Arc<dyn AutomationClient>,
}

#[async_trait]
impl ClientConnector for FakeConnector {
    async fn connect(&self, _port: u16) -> Result<Arc<dyn AutomationClient>> {
        Ok(self.client.clone())
    }
}

pub fn test_session(client: Arc<dyn AutomationClient>, page: Arc<dyn PageHandle>) -> Session {
    Session::with_parts(
        Box::new(FakeLauncher { page }),
        Box::new(FakeConnector { client }),
        true,
        (1280, 720),
    )
}

pub fn test_options() -> AgentOptions {
    AgentOptions {
        model: "orchestrator-test".to_string(),
        visual_model: "visual-test".to_string(),
        max_iterations: 20,
        visual_max_iterations: 5,
        failure_hints: ["not interactable", "obscured", "intercept", "blocked"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        executor: ExecutorOptions {
            settle: std::time::Duration::ZERO,
            highlight: false,
        },
    }
}

pub fn test_agent(model: Arc<ScriptedModel>, client: Arc<RecordingClient>) -> BrowserAgent {
    test_agent_with_options(model, client, test_options())
}

pub fn test_agent_with_options(
    model: Arc<ScriptedModel>,
    client: Arc<RecordingClient>,
    options: AgentOptions,
) -> BrowserAgent {
    BrowserAgent::with_session(
        test_session(client, Arc::new(StubPage::default())),
        model,
        options,
        Arc::new(NullTranscript),
    )
}

pub fn failing_connection_agent(model: Arc<ScriptedModel>) -> BrowserAgent {
    let session = Session::with_parts(
        Box::new(FailingLauncher),
        Box::new(FakeConnector {
            client: Arc::new(RecordingClient::default()),
        }),
        true,
        (1280, 720),
    );
    BrowserAgent::with_session(session, model, test_options(), Arc::new(NullTranscript))
}
