use std::sync::Arc;

use crate::app::adb::runner::CommandRunner;
use crate::app::error::AppError;
use crate::app::store::ArtifactStore;

/// Everything a collection or report operation needs, passed explicitly
/// instead of living in process-wide state. Cheap to clone into workers.
#[derive(Clone)]
pub struct Session {
    runner: Arc<dyn CommandRunner>,
    store: ArtifactStore,
    device_id: String,
}

impl Session {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: ArtifactStore,
        device_id: impl Into<String>,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        let device_id = device_id.into().trim().to_string();
        if device_id.is_empty() {
            return Err(AppError::validation("No device selected", trace_id));
        }
        Ok(Self {
            runner,
            store,
            device_id,
        })
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}
