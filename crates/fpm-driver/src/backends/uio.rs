//! UIO backend
//!
//! Register windows and interrupts come from `uio_pdrv_genirq` devices,
//! coherent memory from a u-dma-buf node. The kernel side needs no custom
//! module: the device tree binds each AXI-DMA block to `generic-uio`.
//!
//! Interrupt protocol on `/dev/uioN`: write `1u32` to unmask, wait for the
//! fd to become readable, read the 4-byte event count, unmask again.

use crate::buffer::{TransferBuffer, UdmaBuffer};
use crate::discovery::{DeviceManager, UioDevice, DEV_ROOT, SYSFS_ROOT};
use crate::error::{FpmError, Result};
use crate::mmio::{MappedRegion, RegisterBlock};
use crate::platform::{ChannelResource, IrqHandler, IrqRegistration, Platform};
use fpm_chip::ip::UDMABUF_NAME;
use fpm_chip::regs::REGISTER_WINDOW;
use rustix::event::{poll, PollFd, PollFlags};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// How long an interrupt thread waits before re-checking its stop flag
const POLL_INTERVAL_MS: i32 = 100;

type ClaimSet = Arc<Mutex<HashSet<u64>>>;

fn release_claim(claims: &ClaimSet, key: u64) {
    claims
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&key);
}

/// Register window that gives its claim back when dropped
#[derive(Debug)]
struct ClaimedRegion {
    region: MappedRegion,
    claims: ClaimSet,
    base: u64,
}

impl RegisterBlock for ClaimedRegion {
    fn read32(&self, offset: usize) -> u32 {
        self.region.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.region.write32(offset, value);
    }
}

impl Drop for ClaimedRegion {
    fn drop(&mut self) {
        release_claim(&self.claims, self.base);
    }
}

/// Platform backed by UIO and u-dma-buf
#[derive(Debug)]
pub struct UioPlatform {
    manager: DeviceManager,
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    udmabuf: String,
    register_claims: ClaimSet,
    irq_claims: ClaimSet,
}

impl UioPlatform {
    /// Discover devices under `/sys` and `/dev`
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no UIO device is present.
    pub fn new() -> Result<Self> {
        Self::with_roots(Path::new(SYSFS_ROOT), Path::new(DEV_ROOT))
    }

    /// Discover devices under explicit roots
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no UIO device is present.
    pub fn with_roots(sysfs_root: &Path, dev_root: &Path) -> Result<Self> {
        let manager = DeviceManager::discover_in(sysfs_root, dev_root)?;
        Ok(Self {
            manager,
            sysfs_root: sysfs_root.to_path_buf(),
            dev_root: dev_root.to_path_buf(),
            udmabuf: UDMABUF_NAME.to_string(),
            register_claims: ClaimSet::default(),
            irq_claims: ClaimSet::default(),
        })
    }

    /// Use a differently named u-dma-buf
    #[must_use]
    pub fn with_udmabuf(mut self, name: impl Into<String>) -> Self {
        self.udmabuf = name.into();
        self
    }

    /// Discovered devices
    pub const fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    fn device_for(&self, resource: &ChannelResource) -> Result<&UioDevice> {
        self.manager.find_by_base(resource.base).ok_or_else(|| {
            FpmError::resource_unavailable(
                format!("{} at {:#x}", resource.role, resource.base),
                "no UIO device maps this address",
            )
        })
    }

    fn open(device: &UioDevice) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device.path)
            .map_err(|e| {
                FpmError::resource_unavailable(device.path.display().to_string(), e.to_string())
            })
    }
}

impl Platform for UioPlatform {
    fn name(&self) -> &'static str {
        "uio"
    }

    fn claim_registers(&mut self, resource: &ChannelResource) -> Result<Arc<dyn RegisterBlock>> {
        let device = self.device_for(resource)?.clone();
        if device.map_size < REGISTER_WINDOW {
            return Err(FpmError::resource_unavailable(
                &device.name,
                format!("map0 is {:#x} bytes, need {REGISTER_WINDOW:#x}", device.map_size),
            ));
        }

        if !self
            .register_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.base)
        {
            return Err(FpmError::resource_unavailable(&device.name, "already claimed"));
        }

        let mapped = Self::open(&device).and_then(|file| {
            MappedRegion::map(file, &device.name, 0, device.map_size.min(resource.span))
        });
        let region = match mapped {
            Ok(region) => region,
            Err(e) => {
                release_claim(&self.register_claims, resource.base);
                return Err(e);
            }
        };

        tracing::info!("{}: registers from uio{}", resource.role, device.index);
        Ok(Arc::new(ClaimedRegion {
            region,
            claims: Arc::clone(&self.register_claims),
            base: resource.base,
        }))
    }

    fn request_irq(
        &mut self,
        resource: &ChannelResource,
        handler: IrqHandler,
    ) -> Result<IrqRegistration> {
        let device = self.device_for(resource)?.clone();
        let irq = resource.irq;
        if !self
            .irq_claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(u64::from(irq))
        {
            return Err(FpmError::resource_unavailable(format!("irq {irq}"), "already claimed"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = Self::open(&device).and_then(|file| {
            let stop = Arc::clone(&stop);
            let label = format!("{} irq {irq}", resource.role);
            thread::Builder::new()
                .name(format!("fpm-irq-{}", resource.role))
                .spawn(move || irq_loop(file, &handler, &stop, &label))
                .map_err(FpmError::from)
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                release_claim(&self.irq_claims, u64::from(irq));
                return Err(e);
            }
        };

        let claims = Arc::clone(&self.irq_claims);
        Ok(IrqRegistration::new(irq, move || {
            stop.store(true, Ordering::Release);
            if worker.join().is_err() {
                tracing::error!("Interrupt thread for irq {irq} panicked");
            }
            release_claim(&claims, u64::from(irq));
        }))
    }

    fn alloc_coherent(&mut self, words: usize) -> Result<Arc<dyn TransferBuffer>> {
        let buffer = UdmaBuffer::open(&self.dev_root, &self.sysfs_root, &self.udmabuf, words)?;
        Ok(Arc::new(buffer))
    }
}

/// Service one UIO interrupt line until `stop` is set
fn irq_loop(mut file: File, handler: &IrqHandler, stop: &AtomicBool, label: &str) {
    if let Err(e) = unmask(&mut file) {
        tracing::error!("{label}: cannot unmask: {e}");
        return;
    }
    tracing::debug!("{label}: interrupt thread running");

    while !stop.load(Ordering::Acquire) {
        let ready = {
            let mut fds = [PollFd::new(&file, PollFlags::IN)];
            poll(&mut fds, POLL_INTERVAL_MS)
        };
        match ready {
            Ok(0) | Err(rustix::io::Errno::INTR) => continue,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("{label}: poll failed: {e}");
                return;
            }
        }

        let mut count = [0u8; 4];
        if let Err(e) = file.read_exact(&mut count) {
            tracing::error!("{label}: read failed: {e}");
            return;
        }
        tracing::trace!("{label}: event {}", u32::from_ne_bytes(count));

        handler();

        if let Err(e) = unmask(&mut file) {
            tracing::error!("{label}: cannot unmask: {e}");
            return;
        }
    }
    tracing::debug!("{label}: interrupt thread stopped");
}

fn unmask(file: &mut File) -> std::io::Result<()> {
    file.write_all(&1u32.to_ne_bytes())
}
