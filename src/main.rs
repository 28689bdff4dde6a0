use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scan_worker::config::{LogConfig, LogTarget, WorkerConfig};
use scan_worker::shutdown::install_shutdown_handler;
use scan_worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "scan-worker")]
#[command(version)]
#[command(about = "Pulls scan jobs from a coordinator, runs them and reports the results")]
struct Args {
    /// YAML config file. Flags below override values from the file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Coordinator host
    #[arg(long)]
    host: Option<String>,

    /// Coordinator port
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait after the coordinator could not be reached
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Verify the coordinator's TLS certificate (off by default)
    #[arg(long)]
    verify_certificates: bool,

    /// Extra CA certificate (PEM) to trust when verifying
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path of the local SQLite result store
    #[arg(long)]
    db: Option<PathBuf>,

    /// Scan engine program
    #[arg(long)]
    engine: Option<String>,
}

impl Args {
    fn into_config(self) -> scan_worker::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path)?,
            None => WorkerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if self.verify_certificates {
            config.tls.verify_certificates = true;
        }
        if let Some(path) = self.ca_cert {
            config.tls.ca_cert_path = Some(path);
        }
        if let Some(path) = self.db {
            config.db_path = path;
        }
        if let Some(program) = self.engine {
            config.engine.program = program;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log.target {
        LogTarget::Stdout => builder.with_writer(std::io::stdout).init(),
        LogTarget::Stderr => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log);

    let worker = Worker::from_config(&config).await?;

    tracing::info!(
        worker_id = %worker.id(),
        coordinator = %config.base_url(),
        api_version = config.api_version,
        verify_certificates = config.tls.verify_certificates,
        db_path = %config.db_path.display(),
        engine = %config.engine.program,
        "Starting scan worker"
    );

    let shutdown = install_shutdown_handler()?;
    if let Err(e) = worker.run(shutdown).await {
        tracing::error!(worker_id = %worker.id(), error = %e, "Worker loop failed");
        return Err(e.into());
    }

    Ok(())
}
