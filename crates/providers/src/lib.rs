pub mod gemini;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use webpilot_core::types::{ActionCall, Content};
use webpilot_core::Result;

/// One tool the model may call: name, description, and JSON-schema parameters.
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Everything one model call needs.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDecl>,
    pub contents: Vec<Content>,
}

/// One streamed piece of a model response. A non-streaming backend may
/// deliver the whole response as a single chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub thought: Option<String>,
    pub calls: Vec<ActionCall>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ChunkStream>;
}

pub use gemini::GeminiClient;
