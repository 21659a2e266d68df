//! Pipeline stages.
//!
//! A stage is one step of a job (extract, transcode, compress), implemented
//! by invoking one external tool. Stages mutate the job only through the
//! log-append and progress-set callbacks in their context; everything else
//! (status transitions, drive release) belongs to the tracker and executor.

mod compress;
mod extract;
mod simulated;
mod transcode;

pub use compress::Compress;
pub use extract::{AudioExtract, DataExtract, VideoExtract};
pub use simulated::SimulatedStage;
pub use transcode::Transcode;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::core::runner::{self, ExitOutcome};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{tool} exited with status {code}")]
    ToolFailed { tool: String, code: i32 },

    #[error("{tool} was terminated before completing")]
    Terminated { tool: String },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-stage view of a job, plus the only two channels a stage may use to
/// mutate it.
pub struct StageContext {
    pub job_id: String,
    pub drive_path: PathBuf,
    pub disc_label: String,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    log_cb: Arc<dyn Fn(&str) + Send + Sync>,
    progress_cb: Arc<dyn Fn(u8) + Send + Sync>,
    cancel: CancellationToken,
}

impl StageContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        drive_path: PathBuf,
        disc_label: String,
        temp_dir: PathBuf,
        output_dir: PathBuf,
        log_cb: Arc<dyn Fn(&str) + Send + Sync>,
        progress_cb: Arc<dyn Fn(u8) + Send + Sync>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            drive_path,
            disc_label,
            temp_dir,
            output_dir,
            log_cb,
            progress_cb,
            cancel,
        }
    }

    pub fn log(&self, line: impl AsRef<str>) {
        (*self.log_cb)(line.as_ref());
    }

    /// Report stage-internal progress in 0..=100. The executor maps it into
    /// the stage's slice of the overall bar.
    pub fn set_progress(&self, percent: u8) {
        (*self.progress_cb)(percent.min(100));
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name shown as the job's current operation, and as the failing
    /// stage on error.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError>;
}

/// Run one external tool to completion, mapping its exit into stage terms.
pub(crate) async fn run_tool(
    tool: &str,
    command: Command,
    on_line: &(dyn Fn(&str) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<(), StageError> {
    let outcome = runner::run(command, on_line, cancel)
        .await
        .map_err(|source| StageError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    match outcome {
        ExitOutcome::Exited(0) => Ok(()),
        ExitOutcome::Exited(code) => Err(StageError::ToolFailed {
            tool: tool.to_string(),
            code,
        }),
        ExitOutcome::Terminated => Err(StageError::Terminated {
            tool: tool.to_string(),
        }),
    }
}

/// Render a command for the job log, the way a shell prompt would show it.
pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from("$ ");
    rendered.push_str(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
