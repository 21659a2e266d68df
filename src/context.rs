use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::drives::{DriveInventoryProvider, DriveRegistry};
use crate::core::pipeline;
use crate::core::tracker::JobTracker;

/// Everything a transport or CLI entry point needs, constructed once in
/// main() and passed down. There are no global trackers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub drives: Arc<DriveRegistry>,
    pub jobs: Arc<JobTracker>,
}

impl AppContext {
    pub fn new(config: AppConfig, provider: Arc<dyn DriveInventoryProvider>) -> Self {
        let config = Arc::new(config);

        let blacklist_config = config.clone();
        let drives = Arc::new(DriveRegistry::new(
            provider,
            Box::new(move || blacklist_config.drives.blacklist.clone()),
        ));

        let planner = pipeline::planner_for(&config);
        let jobs = JobTracker::new(config.clone(), drives.clone(), planner);

        Self {
            config,
            drives,
            jobs,
        }
    }
}
