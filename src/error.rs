use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Timed out after {timeout_ms}ms waiting for a worker slot")]
    SlotAcquisitionTimeout { timeout_ms: u64 },

    #[error("Worker {slot} failed to initialize: {message}")]
    WorkerInit { slot: usize, message: String },

    #[error("Failed to spawn worker process: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("Worker {slot} exited unexpectedly ({status})")]
    WorkerExited { slot: usize, status: String },

    #[error("Post-task hook failed after task {index}: {message}")]
    PostHook { index: usize, message: String },

    #[error("Unknown {kind}: {name}")]
    UnknownFunction { kind: &'static str, name: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Errors that abort the whole run rather than a single task.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            PoolError::SlotAcquisitionTimeout { .. }
                | PoolError::WorkerInit { .. }
                | PoolError::WorkerSpawn(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
