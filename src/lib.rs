pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod shutdown;
pub mod store;
pub mod tls;
pub mod worker;

pub use error::{Result, WorkerError};
pub use worker::{LoopStats, Outcome, Worker};
