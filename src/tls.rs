//! HTTPS transport construction for talking to the coordinator.
//!
//! Both coordinator calls go through one `reqwest::Client` built here from a
//! [`TlsPolicy`]. The client uses the rustls backend, which has no SSLv2,
//! SSLv3 or TLS compression support at all; the policy additionally pins the
//! minimum protocol version explicitly.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::tls::Version;
use reqwest::{Certificate, Client};
use tokio::fs;

use crate::config::{TlsPolicy, TlsVersion};

/// Error type for transport configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Invalid CA certificate {path}: {source}")]
    InvalidCaCert {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl From<TlsVersion> for Version {
    fn from(version: TlsVersion) -> Self {
        match version {
            TlsVersion::Tls12 => Version::TLS_1_2,
            TlsVersion::Tls13 => Version::TLS_1_3,
        }
    }
}

/// Read the optional CA bundle named by the policy.
async fn load_ca_cert(policy: &TlsPolicy) -> Result<Option<Certificate>, TlsError> {
    let Some(path) = policy.ca_cert_path.as_ref() else {
        return Ok(None);
    };

    if !path.exists() {
        return Err(TlsError::CaCertNotFound(path.clone()));
    }

    let pem = fs::read(path).await?;
    let cert = Certificate::from_pem(&pem).map_err(|source| TlsError::InvalidCaCert {
        path: path.clone(),
        source,
    })?;
    Ok(Some(cert))
}

/// Build the coordinator HTTP client for a transport policy.
///
/// The returned client:
/// - negotiates TLS 1.2 or newer (or 1.3 only, per policy)
/// - trusts the extra CA from `ca_cert_path` when one is configured
/// - skips chain and hostname verification when `verify_certificates` is off
///
/// No connection is opened here.
pub async fn build_client(policy: &TlsPolicy) -> Result<Client, TlsError> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .min_tls_version(policy.min_version.into())
        .connect_timeout(Duration::from_secs(policy.connect_timeout_secs))
        .timeout(Duration::from_secs(policy.request_timeout_secs))
        .user_agent(concat!("scan-worker/", env!("CARGO_PKG_VERSION")));

    if let Some(cert) = load_ca_cert(policy).await? {
        builder = builder.add_root_certificate(cert);
    }

    if !policy.verify_certificates {
        tracing::warn!(
            "Certificate verification disabled; coordinator identity is not authenticated"
        );
        // With rustls this replaces the whole verifier, hostname check included.
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(TlsError::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mapping() {
        assert_eq!(Version::from(TlsVersion::Tls12), Version::TLS_1_2);
        assert_eq!(Version::from(TlsVersion::Tls13), Version::TLS_1_3);
    }

    #[tokio::test]
    async fn test_build_default_policy() {
        assert!(build_client(&TlsPolicy::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_strict_policy() {
        let policy = TlsPolicy {
            verify_certificates: true,
            min_version: TlsVersion::Tls13,
            ..Default::default()
        };
        assert!(build_client(&policy).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_ca_cert() {
        let policy = TlsPolicy {
            verify_certificates: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            ..Default::default()
        };

        let result = build_client(&policy).await;
        assert!(matches!(result, Err(TlsError::CaCertNotFound(_))));
    }
}
