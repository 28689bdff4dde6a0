use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WorkerError};

/// Minimum TLS protocol version offered to the coordinator.
///
/// SSLv2, SSLv3 and TLS compression are never available on the rustls
/// backend, so the floor only has to choose between the two modern versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// Transport security policy shared by work retrieval and result submission.
///
/// Certificate verification is off by default: the worker is expected to
/// talk to coordinators that run with self-signed certificates. Deployments
/// that have a proper chain should set `verify_certificates: true`, and may
/// pin a private CA with `ca_cert_path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsPolicy {
    /// Verify the coordinator's certificate chain and hostname.
    pub verify_certificates: bool,

    /// Extra trusted root (PEM). Only meaningful when verification is on.
    pub ca_cert_path: Option<PathBuf>,

    /// Lowest protocol version the client will negotiate.
    pub min_version: TlsVersion,

    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            verify_certificates: false,
            ca_cert_path: None,
            min_version: TlsVersion::Tls12,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

/// What to do when posting results back to the coordinator fails.
///
/// The default of a single attempt matches the coordinator's expectations:
/// the local record is the durable copy and reconciliation happens out of band.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmissionPolicy {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay_ms: 1000,
        }
    }
}

impl SubmissionPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// External scan engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Program to spawn. Receives the job as JSON on stdin.
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "ssh_scan".to_string(),
            args: Vec::new(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    pub target: LogTarget,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            target: LogTarget::Stdout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(alias = "server")]
    pub host: String,
    pub port: u16,
    pub api_version: u32,
    /// Wait after the coordinator could not be reached.
    pub poll_interval_secs: u64,
    /// Wait after the coordinator reported an empty queue.
    pub idle_interval_ms: u64,
    pub db_path: PathBuf,
    pub tls: TlsPolicy,
    pub submission: SubmissionPolicy,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_version: 1,
            poll_interval_secs: 5,
            idle_interval_ms: 500,
            db_path: PathBuf::from("./api.db"),
            tls: TlsPolicy::default(),
            submission: SubmissionPolicy::default(),
            engine: EngineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load a YAML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse_yaml(&raw)
            .map_err(|e| WorkerError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Self::parse_yaml(raw).map_err(|e| WorkerError::Config(e.to_string()))
    }

    fn parse_yaml(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty file is a valid config that only uses defaults.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(WorkerError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(WorkerError::Config("port must be non-zero".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(WorkerError::Config(
                "poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.idle_interval() >= self.poll_interval() {
            return Err(WorkerError::Config(format!(
                "idle_interval_ms ({}) must be shorter than the poll interval ({}s)",
                self.idle_interval_ms, self.poll_interval_secs
            )));
        }
        if self.submission.max_attempts == 0 {
            return Err(WorkerError::Config(
                "submission.max_attempts must be at least 1".into(),
            ));
        }
        if self.engine.program.trim().is_empty() {
            return Err(WorkerError::Config("engine.program must be set".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// `https://host:port`, bracketing IPv6 literals.
    pub fn base_url(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(addr)) => format!("https://[{}]:{}", addr, self.port),
            _ => format!("https://{}:{}", self.host, self.port),
        }
    }
}
