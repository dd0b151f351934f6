use async_trait::async_trait;
use tracing::{error, info};

use super::repo::{save_pin, Pool};
use crate::model::PinItem;
use crate::pipeline::PipelineObserver;

/// Persists every record replace so the publish run can pick up where the
/// generation run stopped.
#[derive(Debug, Clone)]
pub struct SqliteRecorder {
    pool: Pool,
}

impl SqliteRecorder {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineObserver for SqliteRecorder {
    async fn item_changed(&self, item: &PinItem) {
        if let Err(err) = save_pin(&self.pool, item).await {
            error!(?err, id = %item.id(), status = %item.status(), "failed to persist pin");
        }
    }

    async fn progress(&self, completed: usize, total: usize) {
        info!(
            completed,
            total,
            percent = completed * 100 / total.max(1),
            "batch progress"
        );
    }
}
