pub mod config;
pub mod enhancement;
pub mod error;
pub mod fallback;
pub mod operation;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod session_lock;
pub mod store;

pub use config::*;
pub use error::{McpError, McpResult};
pub use operation::Operation;
pub use orchestrator::{OperationOutcome, Orchestrator, OrchestratorStatus};
pub use parser::{parse_response, ParseOutcome, ParseStrategy, ResponseParser};
pub use session_lock::{SessionLockGuard, SessionLockManager};
pub use store::SessionStore;
