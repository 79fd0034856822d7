//! Streaming Gemini client for the agent loops.
//!
//! Speaks `streamGenerateContent?alt=sse` and converts each SSE event into a
//! `StreamChunk` of narrative text, thought text, and function calls.

use async_stream::stream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use webpilot_core::types::{ActionCall, Content, Part, Role};
use webpilot_core::{Error, Result};

use crate::{ChunkStream, GenerateRequest, ModelClient, StreamChunk, ToolDecl};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(GEMINI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// Convert our conversation contents to Gemini wire format.
    fn convert_contents(contents: &[Content]) -> Vec<Value> {
        contents
            .iter()
            .map(|content| {
                let role = match content.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                let mut parts: Vec<Value> = content.parts.iter().map(convert_part).collect();
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                json!({"role": role, "parts": parts})
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDecl]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        json!([{"functionDeclarations": declarations}])
    }
}

fn convert_part(part: &Part) -> Value {
    match part {
        Part::Text { text } => json!({"text": text}),
        Part::InlineImage { mime, data } => json!({
            "inlineData": {"mimeType": mime, "data": data}
        }),
        Part::FunctionCall { call } => json!({
            "functionCall": {"name": call.name, "args": call.args}
        }),
        Part::FunctionResponse { name, response } => json!({
            "functionResponse": {"name": name, "response": response}
        }),
    }
}

/// Parse one SSE data payload into a chunk. Returns None when the event
/// carries no usable content (e.g. a bare usage report).
fn parse_chunk(event: &Value) -> Option<StreamChunk> {
    let parts = event
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let mut chunk = StreamChunk::default();
    for part in parts {
        if let Some(fc) = part.get("functionCall") {
            let name = fc.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let args = fc
                .get("args")
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));
            chunk.calls.push(ActionCall::new(name, args));
        } else if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            if text.is_empty() {
                continue;
            }
            let is_thought = part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);
            let slot = if is_thought {
                &mut chunk.thought
            } else {
                &mut chunk.text
            };
            match slot {
                Some(existing) => existing.push_str(text),
                None => *slot = Some(text.to_string()),
            }
        }
    }

    if chunk.text.is_none() && chunk.thought.is_none() && chunk.calls.is_empty() {
        None
    } else {
        Some(chunk)
    }
}

/// Strip the `data: ` prefix from an SSE line, ignoring everything else.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

#[async_trait::async_trait]
impl ModelClient for GeminiClient {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ChunkStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.api_base, request.model, self.api_key
        );

        let mut body = json!({
            "contents": Self::convert_contents(&request.contents),
            "systemInstruction": {"parts": [{"text": request.system_instruction}]},
        });
        if !request.tools.is_empty() {
            body["tools"] = Self::convert_tools(&request.tools);
        }

        info!(
            model = %request.model,
            tools = request.tools.len(),
            contents = request.contents.len(),
            "Calling Gemini (streaming)"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Gemini API error {}: {}",
                status,
                &body[..body.len().min(500)]
            )));
        }

        let mut bytes = response.bytes_stream();
        let chunks = stream! {
            let mut buffer = String::new();
            let mut saw_content = false;

            while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(Error::Provider(format!("Gemini stream error: {}", e)));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim_end();
                    if let Some(data) = sse_data(line) {
                        if data.trim() == "[DONE]" {
                            continue;
                        }
                        match serde_json::from_str::<Value>(data) {
                            Ok(event) => {
                                if let Some(chunk) = parse_chunk(&event) {
                                    saw_content = true;
                                    yield Ok(chunk);
                                }
                            }
                            Err(e) => debug!(error = %e, "Skipping unparseable SSE event"),
                        }
                    }
                }
            }

            if !saw_content {
                yield Err(Error::EmptyResponse);
            }
        };

        Ok(Box::pin(chunks))
    }
}
