//! Transcode stage: HandBrakeCLI over the MKV titles the extract stage left
//! in the temp folder.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{Stage, StageContext, StageError, render_command, run_tool};
use crate::logging::LogThrottle;

pub struct Transcode {
    pub preset: String,
    pub preset_file: Option<PathBuf>,
}

impl Transcode {
    /// MKV titles to transcode, in name order so multi-title discs encode
    /// deterministically.
    fn find_titles(&self, ctx: &StageContext) -> Result<Vec<PathBuf>, StageError> {
        let mut titles: Vec<PathBuf> = std::fs::read_dir(&ctx.temp_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "mkv"))
            .collect();
        titles.sort();
        Ok(titles)
    }
}

#[async_trait]
impl Stage for Transcode {
    fn name(&self) -> &str {
        "Transcode"
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        let titles = self.find_titles(ctx)?;
        if titles.is_empty() {
            return Err(StageError::Setup(format!(
                "no MKV titles found in {}",
                ctx.temp_dir.display()
            )));
        }

        std::fs::create_dir_all(&ctx.output_dir)?;

        let total = titles.len();
        let encoding_re = Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("static regex");

        for (index, title) in titles.iter().enumerate() {
            let file_name = title
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("title_{:02}.mkv", index));
            let output_path = ctx.output_dir.join(&file_name);

            ctx.log(format!(
                "transcoding title {}/{}: {}",
                index + 1,
                total,
                file_name
            ));

            let mut args: Vec<String> = Vec::new();
            if let Some(preset_file) = &self.preset_file {
                args.push("--preset-import-file".into());
                args.push(preset_file.display().to_string());
            }
            args.push("-Z".into());
            args.push(self.preset.clone());
            args.push("-i".into());
            args.push(title.display().to_string());
            args.push("-o".into());
            args.push(output_path.display().to_string());

            ctx.log(render_command("HandBrakeCLI", &args));

            // Every title carries an equal share of this stage's progress;
            // the percent HandBrake prints fills the current share.
            let throttle = LogThrottle::new(Duration::from_millis(500));
            let re = encoding_re.clone();
            let on_line = move |line: &str| {
                if line.contains("Encoding:") && line.contains('%') {
                    if let Some(caps) = re.captures(line) {
                        let file_pct: f64 = caps[1].parse().unwrap_or(0.0);
                        let stage_pct =
                            ((index as f64 * 100.0 + file_pct) / total as f64).round() as u8;
                        ctx.set_progress(stage_pct);
                        if throttle.should_log() {
                            ctx.log(line);
                        }
                    }
                    return;
                }
                ctx.log(line);
            };

            let mut command = Command::new("HandBrakeCLI");
            command.args(&args);

            run_tool("HandBrakeCLI", command, &on_line, ctx.cancel_token()).await?;
        }

        ctx.set_progress(100);
        Ok(())
    }
}
