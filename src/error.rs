use thiserror::Error;

use crate::tls::TlsError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Coordinator unreachable at {url}: {reason}")]
    CoordinatorUnreachable { url: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed coordinator response: {0}")]
    MalformedResponse(String),

    #[error("Execution failed for job {job_uuid}: {reason}")]
    Execution { job_uuid: String, reason: String },

    #[error("Result store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WorkerError {
    /// Only an unreachable coordinator is retried by the worker loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkerError::CoordinatorUnreachable { .. })
    }

    pub fn execution(job_uuid: &str, reason: impl Into<String>) -> Self {
        WorkerError::Execution {
            job_uuid: job_uuid.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreachable_is_recoverable() {
        let unreachable = WorkerError::CoordinatorUnreachable {
            url: "https://127.0.0.1:8000/api/v1/work".into(),
            reason: "connection refused".into(),
        };
        assert!(unreachable.is_recoverable());
        assert!(!WorkerError::MalformedResponse("eof".into()).is_recoverable());
        assert!(!WorkerError::execution("J1", "boom").is_recoverable());
        assert!(!WorkerError::Config("port".into()).is_recoverable());
    }

    #[test]
    fn execution_error_names_job() {
        let err = WorkerError::execution("J1", "exit code 2");
        assert_eq!(
            err.to_string(),
            "Execution failed for job J1: exit code 2"
        );
    }
}
