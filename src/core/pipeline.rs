//! Pipeline planning and execution.
//!
//! Each disc type maps to an ordered list of weighted stages. The executor
//! runs them sequentially, folding every stage's internal progress into its
//! slice of the overall 0..=100 bar, and stops at the first failure.
//!
//! Weighting rule: a single-stage plan carries the full 100; a two-stage
//! plan splits 50/50. Stage one's internal progress p lands at p/2 overall,
//! stage two's at 50 + p/2.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::models::DiscType;
use crate::core::stages::{
    AudioExtract, Compress, DataExtract, SimulatedStage, Stage, StageContext, StageError,
    Transcode, VideoExtract,
};

pub struct PlannedStage {
    pub stage: Box<dyn Stage>,
    /// Share of the overall progress bar, all weights in a plan sum to 100.
    pub weight: u8,
}

pub struct StagePlan {
    stages: Vec<PlannedStage>,
}

impl StagePlan {
    pub fn new(stages: Vec<PlannedStage>) -> Self {
        debug_assert_eq!(
            stages.iter().map(|s| s.weight as u32).sum::<u32>(),
            100,
            "stage weights must sum to 100"
        );
        Self { stages }
    }

    pub fn single(stage: Box<dyn Stage>) -> Self {
        Self::new(vec![PlannedStage { stage, weight: 100 }])
    }

    pub fn split(first: Box<dyn Stage>, second: Box<dyn Stage>) -> Self {
        Self::new(vec![
            PlannedStage {
                stage: first,
                weight: 50,
            },
            PlannedStage {
                stage: second,
                weight: 50,
            },
        ])
    }

    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }
}

/// Builds the stage list for a disc type, or None when the type has no
/// adapter.
pub trait StagePlanner: Send + Sync {
    fn plan(&self, disc_type: DiscType) -> Option<StagePlan>;
}

/// Production planner: real tool-backed stages, gated by config toggles.
pub struct ConfiguredPlanner {
    config: Arc<AppConfig>,
}

impl StagePlanner for ConfiguredPlanner {
    fn plan(&self, disc_type: DiscType) -> Option<StagePlan> {
        let plan = match disc_type {
            DiscType::AudioCd => StagePlan::single(Box::new(AudioExtract {
                output_format: self.config.audio.output_format.clone(),
                config_path: self.config.audio.abcde_config.clone(),
                additional_options: self.config.audio.additional_options.clone(),
            })),
            DiscType::DvdVideo | DiscType::BlurayVideo => {
                let extract = Box::new(VideoExtract {
                    min_title_length: self.config.video.min_title_length,
                });
                if self.config.video.transcode {
                    StagePlan::split(
                        extract,
                        Box::new(Transcode {
                            preset: self.config.video.preset.clone(),
                            preset_file: self.config.video.preset_file.clone(),
                        }),
                    )
                } else {
                    StagePlan::single(extract)
                }
            }
            DiscType::CdRom | DiscType::DvdRom | DiscType::BlurayRom => {
                if self.config.data.compress {
                    StagePlan::split(
                        Box::new(DataExtract),
                        Box::new(Compress {
                            codec: self.config.data.codec,
                        }),
                    )
                } else {
                    StagePlan::single(Box::new(DataExtract))
                }
            }
        };
        Some(plan)
    }
}

/// Simulation planner: same plan shapes as the configured planner, but every
/// stage is a timer-driven stand-in.
pub struct SimulatedPlanner {
    config: Arc<AppConfig>,
}

impl StagePlanner for SimulatedPlanner {
    fn plan(&self, disc_type: DiscType) -> Option<StagePlan> {
        let extract = Box::new(SimulatedStage::new("Extract"));
        let plan = match disc_type {
            DiscType::AudioCd => StagePlan::single(extract),
            DiscType::DvdVideo | DiscType::BlurayVideo => {
                if self.config.video.transcode {
                    StagePlan::split(extract, Box::new(SimulatedStage::new("Transcode")))
                } else {
                    StagePlan::single(extract)
                }
            }
            DiscType::CdRom | DiscType::DvdRom | DiscType::BlurayRom => {
                if self.config.data.compress {
                    StagePlan::split(extract, Box::new(SimulatedStage::new("Compress")))
                } else {
                    StagePlan::single(extract)
                }
            }
        };
        Some(plan)
    }
}

/// Pick the planner once at startup; the tracker never re-selects.
pub fn planner_for(config: &Arc<AppConfig>) -> Arc<dyn StagePlanner> {
    if config.simulation {
        warn!("simulation enabled, jobs will not touch any hardware");
        Arc::new(SimulatedPlanner {
            config: config.clone(),
        })
    } else {
        Arc::new(ConfiguredPlanner {
            config: config.clone(),
        })
    }
}

/// Everything the executor needs from the tracker for one job: the job's
/// folders and identity, plus the callbacks that feed updates back.
pub struct PipelineHandle {
    pub job_id: String,
    pub drive_path: PathBuf,
    pub disc_label: String,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cancel: CancellationToken,
    pub log: Arc<dyn Fn(&str) + Send + Sync>,
    pub set_progress: Arc<dyn Fn(u8) + Send + Sync>,
    pub set_operation: Arc<dyn Fn(&str) + Send + Sync>,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed,
    Failed { stage: String, error: StageError },
    Canceled,
}

/// Run every stage of the plan in order.
///
/// Stage-internal progress is mapped linearly into the stage's weight range;
/// a finished stage pins the bar at its cumulative base. The first failure
/// stops the pipeline with the failing stage's name; cancellation observed
/// between or inside stages ends it as canceled.
pub async fn execute(plan: StagePlan, handle: &PipelineHandle) -> PipelineOutcome {
    let total = plan.stages().len();
    let mut base: u16 = 0;

    for (index, planned) in plan.stages().iter().enumerate() {
        if handle.cancel.is_cancelled() {
            return PipelineOutcome::Canceled;
        }

        let stage_name = planned.stage.name().to_string();
        (*handle.set_operation)(&stage_name);
        (*handle.log)(&format!(
            "starting stage {}/{}: {}",
            index + 1,
            total,
            stage_name
        ));

        let weight = planned.weight as u16;
        let stage_base = base;
        let overall = handle.set_progress.clone();
        let progress_cb: Arc<dyn Fn(u8) + Send + Sync> = Arc::new(move |pct: u8| {
            let mapped = stage_base + (pct.min(100) as u16 * weight) / 100;
            (*overall)(mapped.min(100) as u8);
        });

        let ctx = StageContext::new(
            handle.job_id.clone(),
            handle.drive_path.clone(),
            handle.disc_label.clone(),
            handle.temp_dir.clone(),
            handle.output_dir.clone(),
            handle.log.clone(),
            progress_cb,
            handle.cancel.clone(),
        );

        match planned.stage.run(&ctx).await {
            Ok(()) => {
                base += weight;
                (*handle.set_progress)(base.min(100) as u8);
                debug!(job_id = %handle.job_id, stage = %stage_name, "stage completed");
            }
            Err(error) => {
                if handle.cancel.is_cancelled() {
                    info!(job_id = %handle.job_id, stage = %stage_name, "pipeline canceled");
                    return PipelineOutcome::Canceled;
                }
                (*handle.log)(&format!("stage {} failed: {}", stage_name, error));
                return PipelineOutcome::Failed {
                    stage: stage_name,
                    error,
                };
            }
        }
    }

    (*handle.set_progress)(100);
    PipelineOutcome::Completed
}
