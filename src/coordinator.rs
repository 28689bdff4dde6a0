//! Client side of the coordinator protocol.
//!
//! - **Retrieval**: `GET /api/v{n}/work?worker_id=..` returns a [`WorkResponse`]
//! - **Submission**: `POST /api/v{n}/work/results/{worker_id}/{job_uuid}` with
//!   the result JSON as body
//!
//! Only connection-level failures during retrieval are reported as
//! [`WorkerError::CoordinatorUnreachable`]; everything else is a hard error
//! for the caller to decide on.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::protocol::{results_url, work_url, WorkResponse, WorkerId};
use crate::tls::build_client;

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Ask for the next job assigned to `worker_id`.
    async fn retrieve_work(&self, worker_id: &WorkerId) -> Result<WorkResponse>;

    /// Post a serialized result and return the HTTP status code.
    async fn submit_results(
        &self,
        worker_id: &WorkerId,
        job_uuid: &str,
        body: &str,
    ) -> Result<u16>;
}

/// HTTPS coordinator client.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: Client,
    base_url: String,
    api_version: u32,
}

impl HttpCoordinator {
    /// Build a client for the coordinator named in `config`.
    ///
    /// Only constructs the transport; nothing is sent until the first request.
    pub async fn new(config: &WorkerConfig) -> Result<Self> {
        let client = build_client(&config.tls).await?;
        Ok(Self::with_client(client, config.base_url(), config.api_version))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, api_version: u32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_version,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Refused, reset or timed-out connections and failed lookups. A failed TLS
/// handshake also surfaces as a connect error; that is a configuration
/// problem and is not retried.
fn is_connection_failure(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    err.is_connect() && !is_tls_failure(err)
}

/// Whether a rustls error sits anywhere in the cause chain.
///
/// `io::Error` does not report the error it wraps from `source()`, so wrapped
/// errors are unpacked with `get_ref()`.
fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(cause) = source {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::InvalidData {
                return true;
            }
            if let Some(inner) = io.get_ref() {
                if is_tls_failure(inner) {
                    return true;
                }
            }
        }
        source = cause.source();
    }
    false
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn retrieve_work(&self, worker_id: &WorkerId) -> Result<WorkResponse> {
        let url = work_url(&self.base_url, self.api_version, worker_id)?;

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if is_connection_failure(&e) => {
                return Err(WorkerError::CoordinatorUnreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::debug!(
                status = status.as_u16(),
                "Work request returned non-success status"
            );
        }

        WorkResponse::parse(&body)
    }

    async fn submit_results(
        &self,
        worker_id: &WorkerId,
        job_uuid: &str,
        body: &str,
    ) -> Result<u16> {
        let url = results_url(&self.base_url, self.api_version, worker_id, job_uuid)?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
