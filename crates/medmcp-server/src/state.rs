use std::sync::Arc;

use medmcp_bus::EventBus;
use medmcp_core::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Same bus the orchestrator publishes on; feeds the SSE stream.
    pub bus: Arc<EventBus>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let bus = orchestrator.bus();
        Self { orchestrator, bus }
    }
}
