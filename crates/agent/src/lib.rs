//! The two bounded conversational tool-loops driving a browser task: the
//! semantic orchestrator and the coordinate-based visual delegate, both
//! instances of the same `BoundedLoop` driver.

pub mod driver;
pub mod orchestrator;
pub mod transcript;
pub mod visual;
pub mod vocabulary;

#[cfg(test)]
pub(crate) mod testkit;

pub use driver::{BoundedLoop, LoopConfig, RoundStep, StatusSink, TurnPolicy};
pub use orchestrator::{AgentOptions, BrowserAgent};
pub use transcript::{FileTranscript, NullTranscript, TranscriptSink};
pub use visual::VisualDelegate;
