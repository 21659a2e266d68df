//! Job lifecycle tracking.
//!
//! The tracker owns the job table and the drive reservations tied to it.
//! `start_job` validates and reserves atomically, then hands the job to a
//! background pipeline task; API readers get consistent snapshots while the
//! task streams log and progress updates in. Every terminal path, including
//! cancellation, returns the drive to idle exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::drives::{DriveRegistry, normalize_path};
use crate::core::events::JobEvent;
use crate::core::models::{DiscType, Job, JobSnapshot, JobStatus, RingLog};
use crate::core::pipeline::{self, PipelineHandle, PipelineOutcome, StagePlan, StagePlanner};

#[derive(Debug, Error)]
pub enum StartJobError {
    #[error("drive {} is not available", .0.display())]
    DriveUnavailable(PathBuf),

    #[error("unsupported disc type: {0}")]
    UnsupportedDiscType(String),
}

/// The fixed set of job fields the pipeline is allowed to patch.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Status(JobStatus),
    Operation(String),
    Progress(u8),
}

pub struct JobTracker {
    config: Arc<AppConfig>,
    registry: Arc<DriveRegistry>,
    planner: Arc<dyn StagePlanner>,
    jobs: RwLock<HashMap<String, Job>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    events: broadcast::Sender<JobEvent>,
}

/// Returns the drive to idle when dropped, so the release survives every
/// exit path of the pipeline task, panics included.
struct DriveReleaseGuard {
    registry: Arc<DriveRegistry>,
    path: PathBuf,
}

impl Drop for DriveReleaseGuard {
    fn drop(&mut self) {
        self.registry.mark_free(&self.path);
    }
}

impl JobTracker {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<DriveRegistry>,
        planner: Arc<dyn StagePlanner>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            registry,
            planner,
            jobs: RwLock::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Live feed of log lines, progress ticks and status transitions across
    /// all jobs. Subscribers filter by `job_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Validate, reserve the drive, create the job and schedule its
    /// pipeline. Returns without blocking on any stage work.
    ///
    /// Nothing is mutated on failure: the disc type is resolved before the
    /// drive is touched, and reservation itself is a single critical section
    /// inside the registry.
    pub fn start_job(
        self: &Arc<Self>,
        drive_path: &Path,
        disc_type_tag: &str,
    ) -> Result<String, StartJobError> {
        let disc_type: DiscType = disc_type_tag
            .parse()
            .map_err(|_| StartJobError::UnsupportedDiscType(disc_type_tag.to_string()))?;
        let plan = self
            .planner
            .plan(disc_type)
            .ok_or_else(|| StartJobError::UnsupportedDiscType(disc_type_tag.to_string()))?;

        let drive_path = normalize_path(drive_path);
        let disc_label = self.lookup_disc_label(&drive_path);
        let job_id = Uuid::now_v7().to_string();

        self.registry
            .try_reserve(&drive_path, &job_id)
            .map_err(|_| StartJobError::DriveUnavailable(drive_path.clone()))?;

        let temp_folder = self.config.general.temp_directory.join(&job_id);
        let output_folder = self
            .config
            .general
            .output_directory
            .join(sanitize_label(&disc_label));

        let job = Job {
            id: job_id.clone(),
            disc_type,
            drive_path: drive_path.clone(),
            disc_label: disc_label.clone(),
            temp_folder: temp_folder.clone(),
            output_folder: output_folder.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: JobStatus::Queued,
            operation: "Initializing".to_string(),
            progress: 0,
            log: RingLog::new(self.config.general.log_lines),
        };

        self.jobs_mut().insert(job_id.clone(), job);

        let cancel = CancellationToken::new();
        self.cancels_mut().insert(job_id.clone(), cancel.clone());

        info!(
            job_id = %job_id,
            drive = %drive_path.display(),
            disc_type = %disc_type,
            "job accepted"
        );

        let tracker = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            tracker
                .run_job(id, drive_path, disc_label, temp_folder, output_folder, plan, cancel)
                .await;
        });

        Ok(job_id)
    }

    /// Consistent copy-on-read snapshot, or None for unknown jobs.
    pub fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs_read().get(job_id).map(Job::snapshot)
    }

    /// Snapshots of every tracked job, newest first.
    pub fn all(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> =
            self.jobs_read().values().map(Job::snapshot).collect();
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        snapshots
    }

    /// Request cancellation. The in-flight tool process is killed and the
    /// job transitions to Canceled; its drive is freed by the pipeline task.
    /// Canceling an unknown or already-terminal job is a no-op returning
    /// false.
    pub fn cancel(&self, job_id: &str) -> bool {
        if !self.update(job_id, JobUpdate::Status(JobStatus::Canceled)) {
            return false;
        }
        if let Some(token) = self.cancels_mut().get(job_id) {
            token.cancel();
        }
        info!(job_id = %job_id, "job canceled");
        true
    }

    /// Append a line to the job's ring log. Terminal jobs still accept
    /// lines already in flight from their pipeline.
    pub fn append_log(&self, job_id: &str, line: &str) -> bool {
        let mut jobs = self.jobs_mut();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        job.log.push(line);
        drop(jobs);

        let _ = self.events.send(JobEvent::log(job_id, line));
        true
    }

    /// Apply one field update. Terminal jobs are immutable; progress is
    /// clamped monotonic non-decreasing.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        let mut jobs = self.jobs_mut();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.is_terminal() {
            return false;
        }

        let event = match update {
            JobUpdate::Operation(operation) => {
                job.operation = operation;
                None
            }
            JobUpdate::Progress(percent) => {
                let clamped = percent.min(100);
                if clamped <= job.progress {
                    return true;
                }
                job.progress = clamped;
                Some(JobEvent::progress(job_id, clamped))
            }
            JobUpdate::Status(status) => {
                job.status = status;
                if status.is_terminal() {
                    job.end_time = Some(Utc::now());
                }
                Some(JobEvent::status(job_id, status))
            }
        };
        drop(jobs);

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        true
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: String,
        drive_path: PathBuf,
        disc_label: String,
        temp_folder: PathBuf,
        output_folder: PathBuf,
        plan: StagePlan,
        cancel: CancellationToken,
    ) {
        let _release = DriveReleaseGuard {
            registry: self.registry.clone(),
            path: drive_path.clone(),
        };

        self.update(&job_id, JobUpdate::Status(JobStatus::Running));

        let handle = {
            let log_tracker = self.clone();
            let log_id = job_id.clone();
            let progress_tracker = self.clone();
            let progress_id = job_id.clone();
            let operation_tracker = self.clone();
            let operation_id = job_id.clone();

            PipelineHandle {
                job_id: job_id.clone(),
                drive_path: drive_path.clone(),
                disc_label,
                temp_dir: temp_folder,
                output_dir: output_folder,
                cancel: cancel.clone(),
                log: Arc::new(move |line: &str| {
                    log_tracker.append_log(&log_id, line);
                }),
                set_progress: Arc::new(move |percent: u8| {
                    progress_tracker.update(&progress_id, JobUpdate::Progress(percent));
                }),
                set_operation: Arc::new(move |operation: &str| {
                    operation_tracker
                        .update(&operation_id, JobUpdate::Operation(operation.to_string()));
                }),
            }
        };

        match pipeline::execute(plan, &handle).await {
            PipelineOutcome::Completed => {
                self.append_log(&job_id, "all stages completed");
                self.update(&job_id, JobUpdate::Status(JobStatus::Completed));
                info!(job_id = %job_id, "job completed");
            }
            PipelineOutcome::Failed { stage, error } => {
                self.append_log(&job_id, &format!("stage {} failed: {}", stage, error));
                self.update(&job_id, JobUpdate::Status(JobStatus::Failed));
                warn!(job_id = %job_id, stage = %stage, error = %error, "job failed");
            }
            PipelineOutcome::Canceled => {
                self.append_log(&job_id, "job canceled");
                // cancel() already made the status terminal; this is the
                // fallback for cancellation observed before it landed.
                self.update(&job_id, JobUpdate::Status(JobStatus::Canceled));
                info!(job_id = %job_id, "pipeline stopped after cancellation");
            }
        }

        self.cancels_mut().remove(&job_id);
        // _release drops here: the drive goes back to idle on every path.
    }

    fn lookup_disc_label(&self, drive_path: &Path) -> String {
        self.registry
            .list_drives()
            .ok()
            .and_then(|drives| {
                drives
                    .into_iter()
                    .find(|drive| drive.path == drive_path)
                    .and_then(|drive| drive.disc_label)
            })
            .unwrap_or_else(|| "UNTITLED".to_string())
    }

    fn jobs_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancels_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Directory-safe version of a disc label, capped the way the output tree
/// expects.
fn sanitize_label(label: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if safe.is_empty() {
        "UNTITLED".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedInventory;
    use crate::core::models::Capability;
    use crate::core::pipeline::StagePlan;
    use crate::core::stages::SimulatedStage;
    use std::time::Duration;

    fn test_context(planner: Arc<dyn StagePlanner>) -> (Arc<JobTracker>, Arc<DriveRegistry>) {
        let inventory = SimulatedInventory::new();
        inventory.add_drive("/dev/sr0", Capability::Bd, Some("TEST_DISC"));

        let config = Arc::new(AppConfig::default());
        let registry = Arc::new(DriveRegistry::new(
            Arc::new(inventory),
            Box::new(|| Vec::new()),
        ));
        let tracker = JobTracker::new(config, registry.clone(), planner);
        (tracker, registry)
    }

    struct QuickPlanner;

    impl StagePlanner for QuickPlanner {
        fn plan(&self, _disc_type: DiscType) -> Option<StagePlan> {
            Some(StagePlan::single(Box::new(
                SimulatedStage::new("Extract")
                    .ticks(3)
                    .tick_duration(Duration::from_millis(1)),
            )))
        }
    }

    struct SlowPlanner;

    impl StagePlanner for SlowPlanner {
        fn plan(&self, _disc_type: DiscType) -> Option<StagePlan> {
            Some(StagePlan::single(Box::new(
                SimulatedStage::new("Extract")
                    .ticks(1000)
                    .tick_duration(Duration::from_millis(10)),
            )))
        }
    }

    async fn wait_until<F: Fn(&JobSnapshot) -> bool>(
        tracker: &JobTracker,
        job_id: &str,
        predicate: F,
    ) -> JobSnapshot {
        for _ in 0..500 {
            if let Some(snapshot) = tracker.status(job_id) {
                if predicate(&snapshot) {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached for job {}", job_id);
    }

    #[tokio::test]
    async fn unknown_disc_type_is_rejected_before_reservation() {
        let (tracker, registry) = test_context(Arc::new(QuickPlanner));

        let err = tracker
            .start_job(Path::new("/dev/sr0"), "laserdisc")
            .unwrap_err();

        assert!(matches!(err, StartJobError::UnsupportedDiscType(_)));
        assert!(registry.is_available(Path::new("/dev/sr0")));
        assert!(tracker.all().is_empty());
    }

    #[tokio::test]
    async fn busy_drive_is_rejected_without_a_job_record() {
        let (tracker, registry) = test_context(Arc::new(SlowPlanner));

        let first = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();
        let err = tracker
            .start_job(Path::new("/dev/sr0"), "audio_cd")
            .unwrap_err();

        assert!(matches!(err, StartJobError::DriveUnavailable(_)));
        assert_eq!(tracker.all().len(), 1);
        assert_eq!(
            registry.job_for_drive(Path::new("/dev/sr0")),
            Some(first.clone())
        );

        tracker.cancel(&first);
        wait_until(&tracker, &first, |s| s.status == JobStatus::Canceled).await;
    }

    #[tokio::test]
    async fn job_runs_to_completion_and_frees_the_drive() {
        let (tracker, registry) = test_context(Arc::new(QuickPlanner));

        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();

        let snapshot =
            wait_until(&tracker, &job_id, |s| s.status == JobStatus::Completed).await;
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.operation, "Extract");
        assert!(snapshot.end_time.is_some());

        // Terminal transition released the drive.
        assert!(registry.is_available(Path::new("/dev/sr0")));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_frees_the_drive_once() {
        let (tracker, registry) = test_context(Arc::new(SlowPlanner));

        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();
        wait_until(&tracker, &job_id, |s| s.status == JobStatus::Running).await;

        assert!(tracker.cancel(&job_id));
        assert!(!tracker.cancel(&job_id), "second cancel must be a no-op");

        wait_until(&tracker, &job_id, |s| s.status == JobStatus::Canceled).await;

        // The pipeline task observed the cancellation and released the drive.
        for _ in 0..200 {
            if registry.is_available(Path::new("/dev/sr0")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.is_available(Path::new("/dev/sr0")));
        assert!(!tracker.cancel(&job_id));
    }

    #[tokio::test]
    async fn ring_log_is_bounded_to_configured_capacity() {
        let (tracker, _) = test_context(Arc::new(SlowPlanner));

        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();
        for i in 0..40 {
            tracker.append_log(&job_id, &format!("line {}", i));
        }

        let snapshot = tracker.status(&job_id).unwrap();
        assert_eq!(snapshot.log.len(), RingLog::DEFAULT_CAPACITY);
        assert_eq!(snapshot.log.last().unwrap(), "line 39");

        tracker.cancel(&job_id);
    }

    #[tokio::test]
    async fn progress_updates_never_decrease() {
        let (tracker, _) = test_context(Arc::new(SlowPlanner));
        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();

        tracker.update(&job_id, JobUpdate::Progress(40));
        tracker.update(&job_id, JobUpdate::Progress(10));
        assert_eq!(tracker.status(&job_id).unwrap().progress, 40);

        tracker.update(&job_id, JobUpdate::Progress(200));
        assert_eq!(tracker.status(&job_id).unwrap().progress, 100);

        tracker.cancel(&job_id);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_updates() {
        let (tracker, _) = test_context(Arc::new(QuickPlanner));
        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();
        wait_until(&tracker, &job_id, |s| s.status == JobStatus::Completed).await;

        assert!(!tracker.update(&job_id, JobUpdate::Status(JobStatus::Running)));
        assert!(!tracker.update(&job_id, JobUpdate::Progress(100)));
        assert_eq!(
            tracker.status(&job_id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn event_feed_carries_logs_and_status() {
        let (tracker, _) = test_context(Arc::new(QuickPlanner));
        let mut events = tracker.subscribe();

        let job_id = tracker.start_job(Path::new("/dev/sr0"), "audio_cd").unwrap();
        wait_until(&tracker, &job_id, |s| s.status == JobStatus::Completed).await;

        let mut saw_log = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id, job_id);
            match event.payload {
                crate::core::events::JobEventPayload::Log { .. } => saw_log = true,
                crate::core::events::JobEventPayload::Status { status } => {
                    if status == JobStatus::Completed {
                        saw_completed = true;
                    }
                }
                _ => {}
            }
        }
        assert!(saw_log);
        assert!(saw_completed);
    }

    #[test]
    fn labels_are_sanitized_for_the_output_tree() {
        assert_eq!(sanitize_label("My Movie (2024)"), "My_Movie__2024_");
        assert_eq!(sanitize_label(""), "UNTITLED");
        assert_eq!(sanitize_label("safe-name_1.0"), "safe-name_1.0");
        assert!(sanitize_label(&"x".repeat(200)).len() <= 64);
    }
}
