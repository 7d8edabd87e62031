//! Memory-Mapped I/O for the AXI-DMA register blocks
//!
//! [`RegisterBlock`] is the seam between the channel driver and whatever
//! backs the registers: a mapped UIO region on hardware, or the behavioural
//! model in [`crate::backends::sim`].
//!
//! Accessors have no error path. A register offset outside the mapped window
//! means the platform description is wrong, which is fatal.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{FpmError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// 32-bit register access to one AXI-DMA block
///
/// Every call is a direct access: no caching, no reordering.
pub trait RegisterBlock: std::fmt::Debug + Send + Sync {
    /// Read the register at `offset`
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`
    fn write32(&self, offset: usize, value: u32);
}

/// Register block mapped from a UIO device
pub struct MappedRegion {
    /// Memory-mapped pointer
    ptr: NonNull<u8>,
    /// Size of the mapping
    size: usize,
    /// Keeps the device open for the lifetime of the mapping
    _file: File,
    /// Device name for logs
    name: String,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("name", &self.name)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate the mapping (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - all accesses are single volatile 32-bit loads/stores on an aligned,
// bounds-checked offset. Ordering between channels is the controller's job.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes of UIO map `map_index` from an open `/dev/uioN`
    ///
    /// UIO selects map N through an mmap offset of N pages.
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the size is zero or mmap fails.
    pub fn map(file: File, name: &str, map_index: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(FpmError::resource_unavailable(name, "register map has size 0"));
        }

        let offset = (map_index * rustix::param::page_size()) as u64;

        // SAFETY: mmap necessary for MMIO - maps the UIO register window into the process.
        // Invariants: (1) file is an open UIO device; (2) size is non-zero and comes from the
        // UIO sysfs description; (3) offset selects an existing UIO map; (4) the mapping is
        // released in Drop with the same size. rustix returns Err instead of MAP_FAILED.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
        }
        .map_err(|e| FpmError::resource_unavailable(name, format!("mmap failed: {e}")))?;

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| FpmError::resource_unavailable(name, "mmap returned null"))?;

        tracing::info!("Mapped {name} map{map_index} at {ptr:p}, size={size:#x}");

        Ok(Self {
            ptr,
            size,
            _file: file,
            name: name.to_string(),
        })
    }

    /// Get region size
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get device name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl RegisterBlock for MappedRegion {
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap in map(), valid for self.size; (2) offset+4 <= size;
        // (3) AXI-DMA registers are u32 aligned.
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("{} read {offset:#04x} = {value:#010x}", self.name);
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        tracing::trace!("{} write {offset:#04x} = {value:#010x}", self.name);
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size; (3) u32 aligned.
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: munmap of the exact range mapped in map(); Drop runs once and no
        // references into the mapping outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::error!("munmap of {} failed during drop: {e}", self.name);
        }
        tracing::debug!("Unmapped {}", self.name);
    }
}
