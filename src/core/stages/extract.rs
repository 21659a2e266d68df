//! Extraction stages: pull the disc's content onto local storage.
//!
//! Three tools cover the three disc families: `abcde` rips audio CDs,
//! `makemkvcon` demuxes video discs to MKV titles, and `dd` images data
//! discs to ISO.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{Stage, StageContext, StageError, render_command, run_tool};
use crate::logging::LogThrottle;

const STAGE_NAME: &str = "Extract";

/// Audio CD rip via abcde. The tool owns output naming and tagging; we only
/// point it at the drive and the configured format.
pub struct AudioExtract {
    pub output_format: String,
    pub config_path: Option<PathBuf>,
    pub additional_options: Vec<String>,
}

#[async_trait]
impl Stage for AudioExtract {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        std::fs::create_dir_all(&ctx.output_dir)?;

        let mut args: Vec<String> = vec![
            "-d".into(),
            ctx.drive_path.display().to_string(),
            "-o".into(),
            self.output_format.clone(),
        ];
        if let Some(config) = &self.config_path {
            args.push("-c".into());
            args.push(config.display().to_string());
        }
        args.extend(self.additional_options.iter().cloned());

        ctx.log(render_command("abcde", &args));

        let mut command = Command::new("abcde");
        command.args(&args).current_dir(&ctx.output_dir);

        let on_line = |line: &str| ctx.log(line);
        run_tool("abcde", command, &on_line, ctx.cancel_token()).await
    }
}

/// Video disc extraction via makemkvcon in robot mode.
///
/// With `--progress=-same` the tool interleaves machine-readable progress
/// records with its normal output: `PRGV:current,total,max` carries the
/// overall counter and `PRGC:code,id,"name"` announces the current task.
pub struct VideoExtract {
    /// Minimum title length in seconds, shorter titles are skipped.
    pub min_title_length: u32,
}

#[async_trait]
impl Stage for VideoExtract {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        std::fs::create_dir_all(&ctx.temp_dir)?;
        std::fs::create_dir_all(&ctx.output_dir)?;

        let args: Vec<String> = vec![
            "--robot".into(),
            "mkv".into(),
            format!("dev:{}", ctx.drive_path.display()),
            "all".into(),
            ctx.temp_dir.display().to_string(),
            "--noscan".into(),
            "--decrypt".into(),
            format!("--minlength={}", self.min_title_length),
            "--progress=-same".into(),
        ];

        ctx.log(render_command("makemkvcon", &args));

        let progress_re = Regex::new(r"^PRGV:(\d+),(\d+),(\d+)").expect("static regex");
        let task_re = Regex::new(r#"^PRGC:\d+,\d+,"(.*)""#).expect("static regex");

        let on_line = move |line: &str| {
            if let Some(caps) = progress_re.captures(line) {
                let total: u64 = caps[2].parse().unwrap_or(0);
                let max: u64 = caps[3].parse().unwrap_or(0);
                if max > 0 {
                    ctx.set_progress((total * 100 / max) as u8);
                }
                // Progress records stay out of the ring log.
                return;
            }
            if let Some(caps) = task_re.captures(line) {
                ctx.log(&caps[1]);
                return;
            }
            ctx.log(line);
        };

        let mut command = Command::new("makemkvcon");
        command.args(&args);

        run_tool("makemkvcon", command, &on_line, ctx.cancel_token()).await
    }
}

/// Data disc imaging via dd. The drive's block device is read straight into
/// `<job_id>.iso` under the temp folder; a later stage compresses it.
pub struct DataExtract;

impl DataExtract {
    /// Where this stage leaves the image for its successor.
    pub fn iso_path(ctx: &StageContext) -> PathBuf {
        ctx.temp_dir.join(format!("{}.iso", ctx.job_id))
    }
}

#[async_trait]
impl Stage for DataExtract {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        std::fs::create_dir_all(&ctx.temp_dir)?;

        let iso_path = Self::iso_path(ctx);
        let args: Vec<String> = vec![
            format!("if={}", ctx.drive_path.display()),
            format!("of={}", iso_path.display()),
            "bs=64k".into(),
            "status=progress".into(),
        ];

        ctx.log(render_command("dd", &args));

        // dd redraws its status line several times a second; throttle the
        // copies that reach the ring log.
        let throttle = LogThrottle::new(Duration::from_millis(500));
        let on_line = move |line: &str| {
            let is_status = line.contains("bytes") && line.contains("copied");
            if !is_status || throttle.should_log() {
                ctx.log(line);
            }
        };

        let mut command = Command::new("dd");
        command.args(&args);

        run_tool("dd", command, &on_line, ctx.cancel_token()).await
    }
}
