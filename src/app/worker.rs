use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::error::AppError;

pub fn resolve_trace_id(trace_id: Option<String>) -> String {
    trace_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Result of a background job, delivered to the foreground loop.
#[derive(Debug)]
pub struct TaskEvent<T> {
    pub label: String,
    pub trace_id: String,
    pub elapsed_ms: u64,
    pub outcome: Result<T, AppError>,
}

/// Runs `job` on its own thread and posts the outcome on `sender`. The job
/// never touches presentation state; the receiver is the only consumer.
pub fn spawn_task<T, F>(label: impl Into<String>, sender: Sender<TaskEvent<T>>, job: F) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnOnce(&str) -> Result<T, AppError> + Send + 'static,
{
    let label = label.into();
    let trace_id = resolve_trace_id(None);
    thread::spawn(move || {
        let started = Instant::now();
        info!(trace_id = %trace_id, task = %label, "task started");
        let outcome = job(&trace_id);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = &outcome {
            warn!(trace_id = %trace_id, task = %label, code = %err.code, error = %err.error, "task failed");
        }
        let event = TaskEvent {
            label,
            trace_id,
            elapsed_ms,
            outcome,
        };
        if sender.send(event).is_err() {
            warn!("task finished after the receiver went away");
        }
    })
}
