//! Browser plumbing for the agent loops: the lazily-launched browser session,
//! the MCP automation client, the raw CDP page handle, the action executor,
//! and the overlay heuristic.

pub mod actions;
pub mod cdp;
pub mod mcp;
pub mod overlay;
pub mod page;
pub mod provision;
pub mod session;

pub use actions::{ActionExecutor, ExecutorOptions};
pub use mcp::{AutomationClient, ClientStatus, ContentPart, ToolResponse};
pub use overlay::{scan_snapshot, OverlayScan};
pub use page::PageHandle;
pub use session::{BrowserLauncher, ClientConnector, Session};
