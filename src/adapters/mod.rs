use std::sync::Arc;

use crate::core::drives::DriveInventoryProvider;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::LinuxInventory;
pub use simulated::SimulatedInventory;

/// Select the inventory provider for this process. Called exactly once at
/// startup; nothing downstream ever re-selects a platform implementation.
pub fn get_provider(simulation: bool) -> Arc<dyn DriveInventoryProvider> {
    if simulation {
        return Arc::new(SimulatedInventory::with_default_drives());
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxInventory::new())
    }

    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("no native drive inventory for this platform, using simulated drives");
        Arc::new(SimulatedInventory::with_default_drives())
    }
}
