//! End-to-end job lifecycle scenarios against simulated drives and stages.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ripd::adapters::SimulatedInventory;
use ripd::config::AppConfig;
use ripd::context::AppContext;
use ripd::core::drives::DriveRegistry;
use ripd::core::models::{Capability, DiscType, DriveStatus, JobSnapshot, JobStatus};
use ripd::core::pipeline::{StagePlan, StagePlanner};
use ripd::core::stages::SimulatedStage;
use ripd::core::tracker::{JobTracker, StartJobError};

fn simulated_context(drives: &[(&str, Capability, Option<&str>)]) -> AppContext {
    let inventory = SimulatedInventory::new();
    for (path, capability, label) in drives {
        inventory.add_drive(path, *capability, *label);
    }

    let config = AppConfig {
        simulation: true,
        ..AppConfig::default()
    };
    AppContext::new(config, Arc::new(inventory))
}

async fn wait_until<F: Fn(&JobSnapshot) -> bool>(
    jobs: &JobTracker,
    job_id: &str,
    predicate: F,
) -> JobSnapshot {
    for _ in 0..1000 {
        if let Some(snapshot) = jobs.status(job_id) {
            if predicate(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached for job {}", job_id);
}

fn drive_status(ctx: &AppContext, path: &str) -> DriveStatus {
    ctx.drives
        .list_drives()
        .unwrap()
        .into_iter()
        .find(|d| d.path == Path::new(path))
        .map(|d| d.status)
        .expect("drive present")
}

#[tokio::test]
async fn happy_path_audio_rip_completes_and_frees_the_drive() {
    let ctx = simulated_context(&[("/dev/sr0", Capability::Cd, Some("MIXTAPE"))]);

    let job_id = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "audio_cd")
        .expect("job should start");

    let running = wait_until(&ctx.jobs, &job_id, |s| s.status == JobStatus::Running).await;
    assert_eq!(running.disc_label, "MIXTAPE");
    assert_eq!(drive_status(&ctx, "/dev/sr0"), DriveStatus::Busy);

    let done = wait_until(&ctx.jobs, &job_id, |s| s.status == JobStatus::Completed).await;
    assert_eq!(done.progress, 100);
    assert!(done.end_time.is_some());
    assert!(!done.log.is_empty());

    assert_eq!(drive_status(&ctx, "/dev/sr0"), DriveStatus::Idle);
}

#[tokio::test]
async fn no_matching_drive_rejects_without_state_changes() {
    // Only a CD-capable drive, but the disc wants a BD tier.
    let ctx = simulated_context(&[("/dev/sr0", Capability::Cd, None)]);

    let found = ctx
        .drives
        .find_available(DiscType::BlurayVideo.required_capability())
        .unwrap();
    assert_eq!(found, None);

    // A busy drive rejects a second job the same way.
    let first = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "audio_cd")
        .unwrap();
    let err = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "audio_cd")
        .unwrap_err();
    assert!(matches!(err, StartJobError::DriveUnavailable(_)));
    assert_eq!(ctx.jobs.all().len(), 1);

    wait_until(&ctx.jobs, &first, |s| s.status.is_terminal()).await;
}

#[tokio::test]
async fn unsupported_disc_type_leaves_the_drive_idle() {
    let ctx = simulated_context(&[("/dev/sr0", Capability::Bd, None)]);

    let err = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "unknown")
        .unwrap_err();

    assert!(matches!(err, StartJobError::UnsupportedDiscType(_)));
    assert!(ctx.jobs.all().is_empty());
    assert_eq!(drive_status(&ctx, "/dev/sr0"), DriveStatus::Idle);
}

/// Extract succeeds, Transcode exits non-zero partway through.
struct FailingTranscodePlanner;

impl StagePlanner for FailingTranscodePlanner {
    fn plan(&self, _disc_type: DiscType) -> Option<StagePlan> {
        Some(StagePlan::split(
            Box::new(
                SimulatedStage::new("Extract")
                    .ticks(4)
                    .tick_duration(Duration::from_millis(1)),
            ),
            Box::new(
                SimulatedStage::new("Transcode")
                    .ticks(4)
                    .tick_duration(Duration::from_millis(1))
                    .fail_at_tick(2),
            ),
        ))
    }
}

#[tokio::test]
async fn mid_pipeline_failure_marks_the_job_failed_and_frees_the_drive() {
    let inventory = SimulatedInventory::new();
    inventory.add_drive("/dev/sr0", Capability::Bd, Some("MOVIE"));

    let config = Arc::new(AppConfig::default());
    let registry = Arc::new(DriveRegistry::new(
        Arc::new(inventory),
        Box::new(|| Vec::new()),
    ));
    let jobs = JobTracker::new(config, registry.clone(), Arc::new(FailingTranscodePlanner));

    let job_id = jobs.start_job(Path::new("/dev/sr0"), "dvd_video").unwrap();

    let failed = wait_until(&jobs, &job_id, |s| s.status == JobStatus::Failed).await;

    // The failing stage's name survives in the operation field, and the bar
    // stopped inside the second stage's half.
    assert_eq!(failed.operation, "Transcode");
    assert!(failed.progress >= 50);
    assert!(failed.progress < 100);
    assert!(failed.log.iter().any(|line| line.contains("Transcode")));

    assert!(registry.is_available(Path::new("/dev/sr0")));
}

#[tokio::test]
async fn two_drives_run_two_jobs_concurrently() {
    let ctx = simulated_context(&[
        ("/dev/sr0", Capability::Bd, Some("DISC_A")),
        ("/dev/sr1", Capability::Bd, Some("DISC_B")),
    ]);

    let job_a = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "cd_rom")
        .unwrap();
    let job_b = ctx
        .jobs
        .start_job(Path::new("/dev/sr1"), "cd_rom")
        .unwrap();
    assert_ne!(job_a, job_b);

    let done_a = wait_until(&ctx.jobs, &job_a, |s| s.status == JobStatus::Completed).await;
    let done_b = wait_until(&ctx.jobs, &job_b, |s| s.status == JobStatus::Completed).await;

    assert_eq!(done_a.disc_label, "DISC_A");
    assert_eq!(done_b.disc_label, "DISC_B");
    assert_eq!(drive_status(&ctx, "/dev/sr0"), DriveStatus::Idle);
    assert_eq!(drive_status(&ctx, "/dev/sr1"), DriveStatus::Idle);
}

#[tokio::test]
async fn monotonic_progress_under_concurrent_reads() {
    let ctx = simulated_context(&[("/dev/sr0", Capability::Bd, None)]);

    let job_id = ctx
        .jobs
        .start_job(Path::new("/dev/sr0"), "dvd_video")
        .unwrap();

    let mut last = 0u8;
    loop {
        let Some(snapshot) = ctx.jobs.status(&job_id) else {
            panic!("job disappeared");
        };
        assert!(
            snapshot.progress >= last,
            "progress went backwards: {} -> {}",
            last,
            snapshot.progress
        );
        last = snapshot.progress;
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, 100);
}
