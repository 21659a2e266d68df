//! Simulated stage for `--simulation` runs and tests.
//!
//! Ticks through its progress range on a timer instead of spawning a tool,
//! which lets the whole job pipeline run on machines without an optical
//! drive or the external binaries installed.

use std::time::Duration;

use async_trait::async_trait;

use super::{Stage, StageContext, StageError};

pub struct SimulatedStage {
    name: String,
    ticks: u32,
    tick_duration: Duration,
    fail_at_tick: Option<u32>,
}

impl SimulatedStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticks: 10,
            tick_duration: Duration::from_millis(25),
            fail_at_tick: None,
        }
    }

    pub fn ticks(mut self, ticks: u32) -> Self {
        self.ticks = ticks.max(1);
        self
    }

    pub fn tick_duration(mut self, duration: Duration) -> Self {
        self.tick_duration = duration;
        self
    }

    /// Fail with a simulated non-zero exit once this tick is reached.
    pub fn fail_at_tick(mut self, tick: u32) -> Self {
        self.fail_at_tick = Some(tick);
        self
    }
}

#[async_trait]
impl Stage for SimulatedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.log(format!("simulating {} on {}", self.name, ctx.drive_path.display()));

        for tick in 1..=self.ticks {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_duration) => {}
                _ = ctx.cancel_token().cancelled() => {
                    return Err(StageError::Terminated {
                        tool: self.name.clone(),
                    });
                }
            }

            if self.fail_at_tick == Some(tick) {
                ctx.log(format!("{} hit a simulated fault", self.name));
                return Err(StageError::ToolFailed {
                    tool: self.name.clone(),
                    code: 1,
                });
            }

            ctx.set_progress((tick * 100 / self.ticks) as u8);
            ctx.log(format!("{}: tick {}/{}", self.name, tick, self.ticks));
        }

        Ok(())
    }
}
