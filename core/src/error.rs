use thiserror::Error;

/// Error kinds surfaced across the dispatch plane (gateway and worker).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no GPUs configured or all workers dead")]
    Scheduling,

    #[error("worker transport error: {0}")]
    WorkerTransport(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("metadata store error: {0}")]
    Persistence(String),

    #[error("startup error: {0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
