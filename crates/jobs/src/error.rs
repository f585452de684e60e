use thiserror::Error;

pub type Result<T> = std::result::Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    /// Enqueue rejected because the service is draining.
    #[error("queue service is shutting down")]
    ShuttingDown,
}
