//! Simulated drive inventory for tests and `--simulation` runs.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::core::drives::{DriveInfo, DriveInventoryProvider};
use crate::core::models::Capability;

/// Controllable in-memory inventory. Clones share the same drive list, so a
/// test can hold one clone as its controller while the registry scans
/// another.
#[derive(Clone, Default)]
pub struct SimulatedInventory {
    drives: Arc<Mutex<Vec<DriveInfo>>>,
}

impl SimulatedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// One virtual BD drive with a disc loaded, enough to exercise every
    /// disc type.
    pub fn with_default_drives() -> Self {
        let inventory = Self::new();
        inventory.add_drive("/dev/sr0", Capability::Bd, Some("SIM_DISC"));
        inventory
    }

    pub fn add_drive(&self, path: &str, capability: Capability, disc_label: Option<&str>) {
        self.drives.lock().unwrap().push(DriveInfo {
            path: PathBuf::from(path),
            model: format!("RIPD VIRTUAL {}", capability),
            capability,
            disc_label: disc_label.map(str::to_string),
        });
    }

    pub fn remove_drive(&self, path: &str) {
        let path = PathBuf::from(path);
        self.drives.lock().unwrap().retain(|d| d.path != path);
    }

    pub fn set_disc_label(&self, path: &str, disc_label: Option<&str>) {
        let path = PathBuf::from(path);
        let mut drives = self.drives.lock().unwrap();
        if let Some(drive) = drives.iter_mut().find(|d| d.path == path) {
            drive.disc_label = disc_label.map(str::to_string);
        }
    }
}

impl DriveInventoryProvider for SimulatedInventory {
    fn scan(&self) -> Result<Vec<DriveInfo>> {
        Ok(self.drives.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_reflects_added_and_removed_drives() {
        let inventory = SimulatedInventory::new();
        assert!(inventory.scan().unwrap().is_empty());

        inventory.add_drive("/dev/sr0", Capability::Cd, None);
        inventory.add_drive("/dev/sr1", Capability::Bd, Some("MOVIE"));

        let drives = inventory.scan().unwrap();
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0].path, PathBuf::from("/dev/sr0"));
        assert_eq!(drives[1].disc_label.as_deref(), Some("MOVIE"));

        inventory.remove_drive("/dev/sr0");
        assert_eq!(inventory.scan().unwrap().len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let inventory = SimulatedInventory::new();
        let controller = inventory.clone();

        controller.add_drive("/dev/sr0", Capability::Dvd, None);
        controller.set_disc_label("/dev/sr0", Some("BACKUP"));

        let drives = inventory.scan().unwrap();
        assert_eq!(drives[0].disc_label.as_deref(), Some("BACKUP"));
    }
}
