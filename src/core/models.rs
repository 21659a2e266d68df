use std::collections::VecDeque;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum disc format a drive can read.
///
/// Ordered by physical compatibility: a DVD drive also reads CDs and a BD
/// drive reads everything, so tier matching is a plain `>=` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capability {
    Cd,
    Dvd,
    Bd,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Cd => "CD",
            Capability::Dvd => "DVD",
            Capability::Bd => "BD",
        }
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CD" => Ok(Capability::Cd),
            "DVD" => Ok(Capability::Dvd),
            "BD" | "BLURAY" => Ok(Capability::Bd),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tag assigned to an inserted disc before a job starts.
///
/// Tags are produced by the disc detector and arrive over the API as
/// snake_case strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscType {
    AudioCd,
    DvdVideo,
    BlurayVideo,
    CdRom,
    DvdRom,
    BlurayRom,
}

impl DiscType {
    /// Drive tier needed to read this disc.
    pub fn required_capability(&self) -> Capability {
        match self {
            DiscType::AudioCd | DiscType::CdRom => Capability::Cd,
            DiscType::DvdVideo | DiscType::DvdRom => Capability::Dvd,
            DiscType::BlurayVideo | DiscType::BlurayRom => Capability::Bd,
        }
    }

    /// True for video discs that go through the transcode path.
    pub fn is_video(&self) -> bool {
        matches!(self, DiscType::DvdVideo | DiscType::BlurayVideo)
    }

    /// True for data discs imaged to ISO.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            DiscType::CdRom | DiscType::DvdRom | DiscType::BlurayRom
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscType::AudioCd => "audio_cd",
            DiscType::DvdVideo => "dvd_video",
            DiscType::BlurayVideo => "bluray_video",
            DiscType::CdRom => "cd_rom",
            DiscType::DvdRom => "dvd_rom",
            DiscType::BlurayRom => "bluray_rom",
        }
    }
}

impl FromStr for DiscType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio_cd" => Ok(DiscType::AudioCd),
            "dvd_video" => Ok(DiscType::DvdVideo),
            "bluray_video" => Ok(DiscType::BlurayVideo),
            "cd_rom" => Ok(DiscType::CdRom),
            "dvd_rom" => Ok(DiscType::DvdRom),
            "bluray_rom" => Ok(DiscType::BlurayRom),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DiscType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveStatus {
    Idle,
    Busy,
    Blacklisted,
}

/// One optical drive as reported to API consumers: the live inventory
/// snapshot merged with tracked busy/blacklist state.
///
/// Invariant: `status == Busy` exactly when `job_id` is set.
#[derive(Debug, Clone, Serialize)]
pub struct Drive {
    pub path: PathBuf,
    pub model: String,
    pub capability: Capability,
    pub status: DriveStatus,
    pub job_id: Option<String>,
    pub disc_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Terminal jobs never mutate again, apart from the end timestamp and
    /// log lines already in flight from the pipeline task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Fixed-capacity FIFO buffer holding the most recent log lines of a job.
#[derive(Debug, Clone)]
pub struct RingLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl RingLog {
    pub const DEFAULT_CAPACITY: usize = 15;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest one once at capacity.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Mutable job record owned by the tracker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub disc_type: DiscType,
    pub drive_path: PathBuf,
    pub disc_label: String,
    pub temp_folder: PathBuf,
    pub output_folder: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub operation: String,
    pub progress: u8,
    pub log: RingLog,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Consistent copy-on-read view with elapsed time computed against
    /// the end timestamp, or now for jobs still in flight.
    pub fn snapshot(&self) -> JobSnapshot {
        let end = self.end_time.unwrap_or_else(Utc::now);
        let elapsed = (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;

        JobSnapshot {
            id: self.id.clone(),
            disc_type: self.disc_type,
            drive_path: self.drive_path.clone(),
            disc_label: self.disc_label.clone(),
            temp_folder: self.temp_folder.clone(),
            output_folder: self.output_folder.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_secs: elapsed,
            status: self.status,
            operation: self.operation.clone(),
            progress: self.progress,
            log: self.log.to_vec(),
        }
    }
}

/// Immutable view of a job handed to API readers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub disc_type: DiscType,
    pub drive_path: PathBuf,
    pub disc_label: String,
    pub temp_folder: PathBuf,
    pub output_folder: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub status: JobStatus,
    pub operation: String,
    pub progress: u8,
    pub log: Vec<String>,
}
