//! Runtime device discovery
//!
//! Scans `/sys/class/uio` for register windows bound to `uio_pdrv_genirq`
//! and `/sys/class/u-dma-buf` for the coherent buffer. Nothing is assumed
//! about which `uioN` carries which channel: the UIO backend matches them to
//! channel resources by physical base address.

use crate::error::{FpmError, Result};
use std::path::{Path, PathBuf};

/// Default sysfs mount point
pub const SYSFS_ROOT: &str = "/sys";

/// Default device directory
pub const DEV_ROOT: &str = "/dev";

/// Device manager for runtime discovery
#[derive(Debug)]
pub struct DeviceManager {
    devices: Vec<UioDevice>,
    buffers: Vec<UdmaBufInfo>,
}

/// A UIO device and its first memory map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UioDevice {
    /// N in `uioN`
    pub index: usize,

    /// Name the platform driver gave the device (device-tree node name)
    pub name: String,

    /// Device node (`/dev/uioN`)
    pub path: PathBuf,

    /// Physical address of map0
    pub map_addr: u64,

    /// Size of map0 in bytes
    pub map_size: usize,
}

/// A u-dma-buf coherent buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdmaBufInfo {
    /// Buffer name (`udmabuf_fpm`)
    pub name: String,

    /// Physical address
    pub phys_addr: u64,

    /// Size in bytes
    pub size: usize,
}

impl DeviceManager {
    /// Discover devices under the standard `/sys` and `/dev` roots
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no UIO device is present.
    pub fn discover() -> Result<Self> {
        Self::discover_in(Path::new(SYSFS_ROOT), Path::new(DEV_ROOT))
    }

    /// Discover devices under explicit roots
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no UIO device is present.
    pub fn discover_in(sysfs_root: &Path, dev_root: &Path) -> Result<Self> {
        tracing::info!("Discovering UIO devices under {}", sysfs_root.display());

        let class_dir = sysfs_root.join("class/uio");
        let entries = std::fs::read_dir(&class_dir)
            .map_err(|_| FpmError::device_not_found(&class_dir))?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(index) = file_name
                .strip_prefix("uio")
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };

            match Self::read_uio(&entry.path(), index, dev_root) {
                Ok(device) => {
                    tracing::debug!(
                        "uio{index}: {} map0 {:#x}+{:#x}",
                        device.name,
                        device.map_addr,
                        device.map_size
                    );
                    devices.push(device);
                }
                Err(e) => tracing::warn!("Skipping uio{index}: {e}"),
            }
        }

        if devices.is_empty() {
            tracing::error!("No UIO devices found");
            return Err(FpmError::device_not_found(class_dir));
        }
        devices.sort_by_key(|d| d.index);

        let buffers = Self::scan_udmabuf(sysfs_root);
        tracing::info!(
            "Discovered {} UIO device(s), {} u-dma-buf(s)",
            devices.len(),
            buffers.len()
        );

        Ok(Self { devices, buffers })
    }

    /// Get number of discovered devices
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Get slice of all devices
    #[must_use]
    pub fn devices(&self) -> &[UioDevice] {
        &self.devices
    }

    /// Coherent buffers found
    #[must_use]
    pub fn buffers(&self) -> &[UdmaBufInfo] {
        &self.buffers
    }

    /// Device whose map0 starts at `base`
    #[must_use]
    pub fn find_by_base(&self, base: u64) -> Option<&UioDevice> {
        self.devices.iter().find(|d| d.map_addr == base)
    }

    fn read_uio(dir: &Path, index: usize, dev_root: &Path) -> Result<UioDevice> {
        let name = read_sysfs(&dir.join("name"))?;
        let map_dir = dir.join("maps/map0");
        let map_addr = read_hex(&map_dir.join("addr"))?;
        let map_size = usize::try_from(read_hex(&map_dir.join("size"))?).map_err(|_| {
            FpmError::resource_unavailable(format!("uio{index}"), "map0 size does not fit usize")
        })?;

        Ok(UioDevice {
            index,
            name,
            path: dev_root.join(format!("uio{index}")),
            map_addr,
            map_size,
        })
    }

    fn scan_udmabuf(sysfs_root: &Path) -> Vec<UdmaBufInfo> {
        let Ok(entries) = std::fs::read_dir(sysfs_root.join("class/u-dma-buf")) else {
            return Vec::new();
        };

        let mut buffers: Vec<UdmaBufInfo> = entries
            .flatten()
            .filter_map(|entry| {
                let dir = entry.path();
                let phys_addr = read_hex(&dir.join("phys_addr")).ok()?;
                let size = read_sysfs(&dir.join("size")).ok()?.parse().ok()?;
                Some(UdmaBufInfo {
                    name: entry.file_name().to_string_lossy().to_string(),
                    phys_addr,
                    size,
                })
            })
            .collect();
        buffers.sort_by(|a, b| a.name.cmp(&b.name));
        buffers
    }
}

/// Read a trimmed sysfs attribute
fn read_sysfs(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            FpmError::resource_unavailable(path.display().to_string(), format!("unreadable: {e}"))
        })
}

/// Read a hexadecimal sysfs attribute (`0x` prefix optional)
fn read_hex(path: &Path) -> Result<u64> {
    let content = read_sysfs(path)?;
    let trimmed = content.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).map_err(|e| {
        FpmError::resource_unavailable(path.display().to_string(), format!("invalid hex: {e}"))
    })
}
