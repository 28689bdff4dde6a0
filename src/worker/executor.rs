use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EngineConfig;
use crate::error::{Result, WorkerError};
use crate::protocol::{Job, WorkResult};

/// Turns a job into a result. Errors are not retried by the worker loop.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<WorkResult>;
}

/// Runs the scan engine as an external process.
///
/// The job JSON is written to the child's stdin and its stdout is parsed as
/// the result JSON. The child is killed if it outlives `timeout_secs`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    config: EngineConfig,
}

impl CommandEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn process_output(job: &Job, output: std::process::Output) -> Result<WorkResult> {
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let exit_code = output.status.code();
            tracing::error!(
                job_uuid = job.uuid(),
                exit_code = ?exit_code,
                stderr = %stderr.trim(),
                "Scan engine exited with failure"
            );
            return Err(WorkerError::execution(
                job.uuid(),
                if stderr.trim().is_empty() {
                    format!("exit code: {:?}", exit_code)
                } else {
                    stderr.trim().to_string()
                },
            ));
        }

        if !stderr.trim().is_empty() {
            tracing::debug!(job_uuid = job.uuid(), stderr = %stderr.trim(), "Scan engine stderr");
        }

        serde_json::from_slice(&output.stdout)
            .map(WorkResult)
            .map_err(|e| WorkerError::execution(job.uuid(), format!("output is not JSON: {e}")))
    }
}

#[async_trait]
impl ExecutionEngine for CommandEngine {
    async fn execute(&self, job: &Job) -> Result<WorkResult> {
        tracing::debug!(
            job_uuid = job.uuid(),
            program = %self.config.program,
            "Spawning scan engine"
        );

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::execution(
                    job.uuid(),
                    format!("cannot spawn {}: {e}", self.config.program),
                )
            })?;

        // Feed stdin while draining stdout and stderr so that neither side
        // blocks on a full pipe; the timeout covers both.
        let stdin = child.stdin.take();
        let input = job.to_json().into_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // An engine that exits without reading its input is judged by
                // its exit status, not by the broken pipe.
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            Ok(())
        };
        let run = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(WorkerError::execution(
                    job.uuid(),
                    format!("timed out after {}s", self.config.timeout_secs),
                ));
            }
        };

        Self::process_output(job, output)
    }
}
