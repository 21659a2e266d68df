//! Compress stage: shrink the ISO image produced by the data extract stage
//! into the output folder.

use async_trait::async_trait;
use tokio::process::Command;

use super::extract::DataExtract;
use super::{Stage, StageContext, StageError, render_command, run_tool};
use crate::config::CompressionCodec;

pub struct Compress {
    pub codec: CompressionCodec,
}

#[async_trait]
impl Stage for Compress {
    fn name(&self) -> &str {
        "Compress"
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        let iso_path = DataExtract::iso_path(ctx);
        if !iso_path.exists() {
            return Err(StageError::Setup(format!(
                "no ISO image at {}",
                iso_path.display()
            )));
        }

        std::fs::create_dir_all(&ctx.output_dir)?;

        let output_path = ctx
            .output_dir
            .join(format!("{}.iso.{}", ctx.job_id, self.codec.extension()));
        let on_line = |line: &str| ctx.log(line);

        match self.codec {
            CompressionCodec::Zst => {
                let args: Vec<String> = vec![
                    "-f".into(),
                    iso_path.display().to_string(),
                    "-o".into(),
                    output_path.display().to_string(),
                ];
                ctx.log(render_command("zstd", &args));

                let mut command = Command::new("zstd");
                command.args(&args);
                run_tool("zstd", command, &on_line, ctx.cancel_token()).await?;
            }
            CompressionCodec::Bz2 => {
                // bzip2 writes next to its input; compress in place and move
                // the result over.
                let args: Vec<String> = vec!["-kf".into(), iso_path.display().to_string()];
                ctx.log(render_command("bzip2", &args));

                let mut command = Command::new("bzip2");
                command.args(&args);
                run_tool("bzip2", command, &on_line, ctx.cancel_token()).await?;

                let compressed = iso_path.with_extension("iso.bz2");
                std::fs::rename(&compressed, &output_path)?;
            }
        }

        ctx.log(format!("compressed image at {}", output_path.display()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn missing_iso_fails_setup() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = StageContext::new(
            "job-1".into(),
            "/dev/sr0".into(),
            "DISC".into(),
            temp.path().join("tmp"),
            temp.path().join("out"),
            Arc::new(|_| {}),
            Arc::new(|_| {}),
            CancellationToken::new(),
        );

        let stage = Compress {
            codec: CompressionCodec::Zst,
        };
        let err = stage.run(&ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Setup(_)));
    }
}
