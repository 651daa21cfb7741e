use std::sync::Arc;

use crate::application::orchestrator::RenderOrchestrator;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<RenderOrchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<RenderOrchestrator>) -> Self {
        Self { orchestrator }
    }
}
