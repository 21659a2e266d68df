//! Drive inventory and reservation.
//!
//! The registry merges a live inventory snapshot from the platform provider
//! with the busy/blacklist state it tracks itself. Reservation is a single
//! critical section: the availability check and the busy marking happen
//! under one lock, so two callers can never both observe "available" and
//! reserve the same physical drive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::models::{Capability, Drive, DriveStatus};

/// One drive as enumerated by the platform, before registry state is merged.
#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub path: PathBuf,
    pub model: String,
    pub capability: Capability,
    pub disc_label: Option<String>,
}

/// Live enumeration of the machine's optical drives.
///
/// Implementations must return drives in a stable order; allocation walks
/// the list front to back.
pub trait DriveInventoryProvider: Send + Sync {
    fn scan(&self) -> Result<Vec<DriveInfo>>;
}

/// Re-readable source of blacklisted device paths, usually backed by config.
pub type BlacklistSource = Box<dyn Fn() -> Vec<PathBuf> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("drive {} is already running a job", .0.display())]
    Busy(PathBuf),
    #[error("drive {} is blacklisted", .0.display())]
    Blacklisted(PathBuf),
}

struct RegistryState {
    /// drive path -> owning job id
    busy: HashMap<PathBuf, String>,
    blacklist: HashSet<PathBuf>,
}

pub struct DriveRegistry {
    provider: std::sync::Arc<dyn DriveInventoryProvider>,
    blacklist_source: BlacklistSource,
    state: Mutex<RegistryState>,
}

/// Resolve symlinks so `/dev/cdrom` and `/dev/sr0` key the same drive.
/// Paths that do not exist (tests, unplugged drives) pass through as-is.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl DriveRegistry {
    pub fn new(
        provider: std::sync::Arc<dyn DriveInventoryProvider>,
        blacklist_source: BlacklistSource,
    ) -> Self {
        let blacklist = blacklist_source().iter().map(|p| normalize_path(p)).collect();
        Self {
            provider,
            blacklist_source,
            state: Mutex::new(RegistryState {
                busy: HashMap::new(),
                blacklist,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inventory snapshot merged with tracked busy/blacklist state.
    pub fn list_drives(&self) -> Result<Vec<Drive>> {
        let inventory = self.provider.scan()?;
        let state = self.state();

        Ok(inventory
            .into_iter()
            .map(|info| {
                let path = normalize_path(&info.path);
                let job_id = state.busy.get(&path).cloned();
                let status = if state.blacklist.contains(&path) {
                    DriveStatus::Blacklisted
                } else if job_id.is_some() {
                    DriveStatus::Busy
                } else {
                    DriveStatus::Idle
                };
                Drive {
                    path,
                    model: info.model,
                    capability: info.capability,
                    status,
                    job_id: if status == DriveStatus::Busy {
                        job_id
                    } else {
                        None
                    },
                    disc_label: info.disc_label,
                }
            })
            .collect())
    }

    /// True iff the drive is neither busy nor blacklisted.
    pub fn is_available(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        let state = self.state();
        !state.busy.contains_key(&path) && !state.blacklist.contains(&path)
    }

    /// First idle, non-blacklisted drive whose capability covers the
    /// requested tier, in enumeration order. Does not reserve anything.
    pub fn find_available(&self, tier: Capability) -> Result<Option<PathBuf>> {
        let inventory = self.provider.scan()?;
        let state = self.state();

        for info in &inventory {
            if info.capability < tier {
                continue;
            }
            let path = normalize_path(&info.path);
            if state.busy.contains_key(&path) || state.blacklist.contains(&path) {
                continue;
            }
            return Ok(Some(path));
        }

        warn!(tier = %tier, "no available drive for requested tier");
        Ok(None)
    }

    /// Atomically check availability and mark the drive busy for `job_id`.
    /// On failure nothing is reserved.
    pub fn try_reserve(&self, path: &Path, job_id: &str) -> Result<(), ReserveError> {
        let path = normalize_path(path);
        let mut state = self.state();

        if state.blacklist.contains(&path) {
            return Err(ReserveError::Blacklisted(path));
        }
        if state.busy.contains_key(&path) {
            return Err(ReserveError::Busy(path));
        }

        debug!(drive = %path.display(), job_id = %job_id, "drive reserved");
        state.busy.insert(path, job_id.to_string());
        Ok(())
    }

    /// Return a drive to idle. Freeing an already-free drive is a no-op.
    pub fn mark_free(&self, path: &Path) {
        let path = normalize_path(path);
        let mut state = self.state();
        if state.busy.remove(&path).is_some() {
            debug!(drive = %path.display(), "drive freed");
        }
    }

    /// Job currently holding the drive, if any.
    pub fn job_for_drive(&self, path: &Path) -> Option<String> {
        let path = normalize_path(path);
        self.state().busy.get(&path).cloned()
    }

    /// Re-read the blacklist from its source. Drives that are already busy
    /// keep running; they only become ineligible for the next reservation.
    pub fn reload_blacklist(&self) {
        let fresh: HashSet<PathBuf> = (self.blacklist_source)()
            .iter()
            .map(|p| normalize_path(p))
            .collect();
        let mut state = self.state();
        debug!(entries = fresh.len(), "blacklist reloaded");
        state.blacklist = fresh;
    }
}
