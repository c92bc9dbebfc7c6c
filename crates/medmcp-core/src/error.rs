use medmcp_provider::AiError;
use medmcp_schema::SessionId;
use thiserror::Error;

/// Errors surfaced to callers of the orchestrator. AI degradation is not an
/// error; it shows up as a low-confidence, `degraded` recommendation instead.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("session is closed: {0}")]
    SessionClosed(SessionId),
    #[error("a diagnosis must be set before generating a prescription")]
    MissingDiagnosis,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to create MCP session: {0}")]
    CreateSession(#[source] AiError),
}

impl McpError {
    /// Precondition violations are the caller's fault and safe to display.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::CreateSession(_))
    }
}

pub type McpResult<T> = Result<T, McpError>;
