use std::sync::Arc;
use std::time::Instant;

use propd_engine::SourceManager;

pub struct AppState {
    pub manager: Arc<SourceManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<SourceManager>) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
        }
    }
}
