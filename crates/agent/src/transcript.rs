//! Session transcript logging.
//!
//! After each full model turn the request/response pair is appended to a
//! per-task JSONL file: a short summary plus the full exchange. Logging is
//! best-effort and never interferes with the loop.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use webpilot_core::types::Content;
use webpilot_core::Result;

use crate::driver::ModelTurn;

pub trait TranscriptSink: Send + Sync {
    fn record_turn(&self, loop_name: &str, iteration: usize, request: &[Content], response: &ModelTurn);
}

/// Discards everything.
pub struct NullTranscript;

impl TranscriptSink for NullTranscript {
    fn record_turn(&self, _: &str, _: usize, _: &[Content], _: &ModelTurn) {}
}

pub struct FileTranscript {
    path: PathBuf,
}

impl FileTranscript {
    /// Create a fresh transcript file under `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file_name = format!(
            "task-{}-{}.jsonl",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::new_v4().to_string()[..8]
        );
        Ok(Self {
            path: dir.join(file_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TranscriptSink for FileTranscript {
    fn record_turn(
        &self,
        loop_name: &str,
        iteration: usize,
        request: &[Content],
        response: &ModelTurn,
    ) {
        let call_names: Vec<&str> = response.calls.iter().map(|c| c.name.as_str()).collect();
        let summary = format!(
            "[{}#{}] {} call(s) [{}], {} chars of text",
            loop_name,
            iteration,
            response.calls.len(),
            call_names.join(", "),
            response.text.len()
        );

        let entry = json!({
            "timestamp_ms": Utc::now().timestamp_millis(),
            "loop": loop_name,
            "iteration": iteration,
            "summary": summary,
            "request": request,
            "response": response,
        });

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", entry));

        if let Err(e) = result {
            warn!(path = %self.path.display(), "Failed to write transcript: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_core::types::Part;

    #[test]
    fn test_file_transcript_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = FileTranscript::create(dir.path()).unwrap();

        let request = vec![Content::user(vec![Part::text("go to example.com")])];
        let turn = ModelTurn {
            text: "Navigating.".to_string(),
            thoughts: vec![],
            calls: vec![],
        };
        transcript.record_turn("orchestrator", 0, &request, &turn);
        transcript.record_turn("orchestrator", 1, &request, &turn);

        let content = std::fs::read_to_string(transcript.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["loop"], "orchestrator");
        assert_eq!(first["iteration"], 0);
        assert!(first["summary"].as_str().unwrap().contains("0 call(s)"));
        assert_eq!(first["response"]["text"], "Navigating.");
    }
}
