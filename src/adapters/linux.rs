//! Linux drive inventory via lsblk and udevadm.
//!
//! Optical drives show up in lsblk as `rom` block devices; udev properties
//! (`ID_CDROM_BD`, `ID_CDROM_DVD`, `ID_CDROM`) tell us the drive's top
//! capability tier. Enumeration order follows lsblk, which is stable across
//! scans on the same machine.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::core::drives::{DriveInfo, DriveInventoryProvider, normalize_path};
use crate::core::models::Capability;

#[derive(Debug, Deserialize)]
struct LsblkReport {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Default)]
pub struct LinuxInventory;

impl LinuxInventory {
    pub fn new() -> Self {
        Self
    }

    fn capability_for(&self, device_path: &str) -> Option<Capability> {
        let output = run_command(
            "udevadm",
            &["info", "--query=property", &format!("--name={}", device_path)],
        )
        .ok()?;

        if output.lines().any(|l| l == "ID_CDROM_BD=1") {
            Some(Capability::Bd)
        } else if output.lines().any(|l| l == "ID_CDROM_DVD=1") {
            Some(Capability::Dvd)
        } else if output.lines().any(|l| l == "ID_CDROM=1") {
            Some(Capability::Cd)
        } else {
            None
        }
    }

    fn disc_label_for(&self, device_path: &str) -> Option<String> {
        let output = run_command("lsblk", &["-no", "LABEL", device_path]).ok()?;
        let label = output.trim();
        if label.is_empty() {
            None
        } else {
            Some(label.to_string())
        }
    }
}

impl DriveInventoryProvider for LinuxInventory {
    fn scan(&self) -> Result<Vec<DriveInfo>> {
        let raw = run_command("lsblk", &["-J", "-o", "NAME,TYPE,MODEL"])
            .context("Failed to enumerate block devices")?;
        let report: LsblkReport =
            serde_json::from_str(&raw).context("Failed to parse lsblk output")?;

        let mut drives = Vec::new();
        for device in report.blockdevices {
            if device.device_type != "rom" {
                continue;
            }

            let device_path = format!("/dev/{}", device.name);
            let Some(capability) = self.capability_for(&device_path) else {
                warn!(device = %device_path, "optical drive with unknown capability, skipping");
                continue;
            };

            drives.push(DriveInfo {
                path: normalize_path(&PathBuf::from(&device_path)),
                model: device
                    .model
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string()),
                capability,
                disc_label: self.disc_label_for(&device_path),
            });
        }

        Ok(drives)
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;

    if !output.status.success() {
        anyhow::bail!("{} exited with {}", program, output.status);
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
