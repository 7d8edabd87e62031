//! Transfer buffer: the one hardware-visible memory region all three channels
//! take turns on.
//!
//! On hardware the region is a u-dma-buf node opened with `O_SYNC`, which
//! gives an uncached, coherent mapping, so no cache maintenance is needed.
//! Ordering still is: on ARM the buffer is Normal non-cacheable memory and
//! the register windows are Device memory, so a store to a slot can become
//! visible after the `LENGTH` write that starts the engine. `UdmaBuffer`
//! issues a `dmb` on both sync hooks. The buffer is word-addressed; each
//! word is a "slot".

#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{FpmError, Result};
use fpm_chip::ip::{MAP_LIMIT, WORD_BYTES};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

/// Word-addressed coherent memory shared with the DMA engines
pub trait TransferBuffer: std::fmt::Debug + Send + Sync {
    /// Bus address of slot 0, as the DMA engines see it
    fn bus_address(&self) -> u64;

    /// Number of word slots
    fn len_words(&self) -> usize;

    /// Read one slot
    fn read_word(&self, slot: usize) -> u32;

    /// Write one slot
    fn write_word(&self, slot: usize, value: u32);

    /// Make CPU writes visible to the device
    ///
    /// # Errors
    ///
    /// Returns `BufferFault` if cache maintenance fails.
    fn sync_for_device(&self) -> Result<()> {
        Ok(())
    }

    /// Make device writes visible to the CPU
    ///
    /// # Errors
    ///
    /// Returns `BufferFault` if cache maintenance fails.
    fn sync_for_cpu(&self) -> Result<()> {
        Ok(())
    }
}

/// Order buffer accesses against register accesses to the DMA engines
#[cfg(target_arch = "aarch64")]
#[inline]
fn dma_barrier() {
    // SAFETY: a full-system data memory barrier; no operands, no stack use.
    unsafe { std::arch::asm!("dmb sy", options(nostack, preserves_flags)) }
}

#[cfg(target_arch = "arm")]
#[inline]
fn dma_barrier() {
    // SAFETY: as above.
    unsafe { std::arch::asm!("dmb", options(nostack, preserves_flags)) }
}

#[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
#[inline]
fn dma_barrier() {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Bus address of a slot
pub fn slot_address(buffer: &dyn TransferBuffer, slot: usize) -> u64 {
    buffer.bus_address() + (slot * WORD_BYTES) as u64
}

/// u-dma-buf backed transfer buffer
pub struct UdmaBuffer {
    ptr: NonNull<u32>,
    /// Mapped length in bytes
    size: usize,
    phys_addr: u64,
    _file: File,
    name: String,
}

impl std::fmt::Debug for UdmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdmaBuffer")
            .field("name", &self.name)
            .field("phys_addr", &format_args!("{:#x}", self.phys_addr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: Send - the mapping is owned by this value and valid from any thread.
unsafe impl Send for UdmaBuffer {}

// SAFETY: Sync - slot accesses are single volatile u32 loads/stores; the controller
// serialises which channel owns which slot.
unsafe impl Sync for UdmaBuffer {}

impl UdmaBuffer {
    /// Open u-dma-buf `name` and map at least `words` slots
    ///
    /// `dev_root` is normally `/dev`, `sysfs_root` normally `/sys`.
    ///
    /// # Errors
    ///
    /// Returns `BufferFault` if the node is missing, too small, or cannot be mapped.
    pub fn open(dev_root: &Path, sysfs_root: &Path, name: &str, words: usize) -> Result<Self> {
        let class_dir = sysfs_root.join("class/u-dma-buf").join(name);
        let phys_addr = read_sysfs_hex(&class_dir.join("phys_addr"))?;
        let size = read_sysfs_decimal(&class_dir.join("size"))?;

        let needed = words * WORD_BYTES;
        if words == 0 || size < needed {
            return Err(FpmError::buffer_fault(format!(
                "{name} holds {size} bytes, need {needed}"
            )));
        }

        let path = dev_root.join(name);
        // O_SYNC gives an uncached mapping: coherent without cache maintenance.
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(&path)
            .map_err(|e| FpmError::buffer_fault(format!("Cannot open {}: {e}", path.display())))?;

        // SAFETY: mmap of the u-dma-buf device. Invariants: (1) file open read/write;
        // (2) needed > 0 and <= the size the driver reports; (3) offset 0;
        // (4) unmapped in Drop with the same length.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                needed,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| FpmError::buffer_fault(format!("mmap of {name} failed: {e}")))?;

        let ptr = NonNull::new(ptr.cast::<u32>())
            .ok_or_else(|| FpmError::buffer_fault(format!("mmap of {name} returned null")))?;

        tracing::info!("Mapped {name}: phys={phys_addr:#x}, {words} word(s) at {ptr:p}");

        Ok(Self {
            ptr,
            size: needed,
            phys_addr,
            _file: file,
            name: name.to_string(),
        })
    }
}

impl TransferBuffer for UdmaBuffer {
    fn bus_address(&self) -> u64 {
        self.phys_addr
    }

    fn len_words(&self) -> usize {
        self.size / WORD_BYTES
    }

    fn read_word(&self, slot: usize) -> u32 {
        assert!(slot < self.len_words(), "Transfer slot out of bounds");
        // SAFETY: ptr valid for len_words() u32 slots (checked above), mapping alive.
        unsafe { self.ptr.as_ptr().add(slot).read_volatile() }
    }

    fn write_word(&self, slot: usize, value: u32) {
        assert!(slot < self.len_words(), "Transfer slot out of bounds");
        // SAFETY: as read_word; volatile so the store is not elided before the DMA kick.
        unsafe { self.ptr.as_ptr().add(slot).write_volatile(value) }
    }

    fn sync_for_device(&self) -> Result<()> {
        dma_barrier();
        Ok(())
    }

    fn sync_for_cpu(&self) -> Result<()> {
        dma_barrier();
        Ok(())
    }
}

impl Drop for UdmaBuffer {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the range mapped in open(); no slot references escape.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::error!("munmap of {} failed during drop: {e}", self.name);
        }
        tracing::debug!("Released transfer buffer {}", self.name);
    }
}

/// Caller-visible window onto slot 0 of the transfer buffer
///
/// This is the one-word region a caller may map: it always shows the
/// buffer's current contents, i.e. the last operand sent or result received.
#[derive(Debug, Clone)]
pub struct TransferWindow {
    buffer: Arc<dyn TransferBuffer>,
}

impl TransferWindow {
    /// Open a window of `length` bytes
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` unless `0 < length <= 4`.
    pub fn new(buffer: Arc<dyn TransferBuffer>, length: usize) -> Result<Self> {
        if length == 0 || length > MAP_LIMIT {
            return Err(FpmError::InvalidMapping {
                requested: length,
                limit: MAP_LIMIT,
            });
        }
        Ok(Self { buffer })
    }

    /// Current word
    pub fn read(&self) -> u32 {
        self.buffer.read_word(0)
    }

    /// Current word as native-endian bytes
    pub fn bytes(&self) -> [u8; WORD_BYTES] {
        self.read().to_ne_bytes()
    }

    /// Overwrite the word
    pub fn write(&self, value: u32) {
        self.buffer.write_word(0, value);
    }
}

fn read_sysfs(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| FpmError::buffer_fault(format!("Cannot read {}: {e}", path.display())))
}

fn read_sysfs_hex(path: &Path) -> Result<u64> {
    let content = read_sysfs(path)?;
    let digits = content.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16)
        .map_err(|e| FpmError::buffer_fault(format!("Invalid hex in {}: {e}", path.display())))
}

fn read_sysfs_decimal(path: &Path) -> Result<usize> {
    read_sysfs(path)?
        .parse::<usize>()
        .map_err(|e| FpmError::buffer_fault(format!("Invalid size in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct HeapBuffer(Vec<AtomicU32>);

    impl TransferBuffer for HeapBuffer {
        fn bus_address(&self) -> u64 {
            0x1000
        }
        fn len_words(&self) -> usize {
            self.0.len()
        }
        fn read_word(&self, slot: usize) -> u32 {
            self.0[slot].load(Ordering::SeqCst)
        }
        fn write_word(&self, slot: usize, value: u32) {
            self.0[slot].store(value, Ordering::SeqCst);
        }
    }

    fn heap(words: usize) -> Arc<dyn TransferBuffer> {
        Arc::new(HeapBuffer((0..words).map(|_| AtomicU32::new(0)).collect()))
    }

    #[test]
    fn slot_addresses_are_word_strided() {
        let buffer = heap(2);
        assert_eq!(slot_address(buffer.as_ref(), 0), 0x1000);
        assert_eq!(slot_address(buffer.as_ref(), 1), 0x1004);
    }

    #[test]
    fn window_rejects_more_than_one_word() {
        let buffer = heap(2);
        assert!(matches!(
            TransferWindow::new(Arc::clone(&buffer), 8),
            Err(FpmError::InvalidMapping { requested: 8, limit: 4 })
        ));
        assert!(TransferWindow::new(Arc::clone(&buffer), 0).is_err());
        assert!(TransferWindow::new(buffer, 4).is_ok());
    }

    #[test]
    fn window_mirrors_slot_zero() {
        let buffer = heap(2);
        let window = TransferWindow::new(Arc::clone(&buffer), 4).unwrap();
        buffer.write_word(0, 0x0480_0000);
        buffer.write_word(1, 0xDEAD_BEEF);
        assert_eq!(window.read(), 0x0480_0000);
        assert_eq!(window.bytes(), 0x0480_0000u32.to_ne_bytes());
        window.write(7);
        assert_eq!(buffer.read_word(0), 7);
    }

    #[test]
    fn missing_udmabuf_is_a_buffer_fault() {
        let root = tempfile::tempdir().unwrap();
        let err = UdmaBuffer::open(root.path(), root.path(), "udmabuf_fpm", 2).unwrap_err();
        assert!(matches!(err, FpmError::BufferFault { .. }));
    }

    #[test]
    fn undersized_udmabuf_is_a_buffer_fault() {
        let root = tempfile::tempdir().unwrap();
        let class = root.path().join("class/u-dma-buf/udmabuf_fpm");
        std::fs::create_dir_all(&class).unwrap();
        std::fs::write(class.join("phys_addr"), "0x3f000000\n").unwrap();
        std::fs::write(class.join("size"), "4\n").unwrap();

        let err = UdmaBuffer::open(root.path(), root.path(), "udmabuf_fpm", 2).unwrap_err();
        assert!(err.to_string().contains("need 8"), "{err}");
    }

    #[test]
    fn mapped_udmabuf_round_trips_across_syncs() {
        let root = tempfile::tempdir().unwrap();
        let class = root.path().join("class/u-dma-buf/udmabuf_fpm");
        std::fs::create_dir_all(&class).unwrap();
        std::fs::write(class.join("phys_addr"), "0x3f000000\n").unwrap();
        std::fs::write(class.join("size"), "8\n").unwrap();
        std::fs::write(root.path().join("udmabuf_fpm"), [0u8; 8]).unwrap();

        let buffer = UdmaBuffer::open(root.path(), root.path(), "udmabuf_fpm", 2).unwrap();
        assert_eq!(buffer.bus_address(), 0x3f00_0000);
        buffer.write_word(0, 0x0100_0000);
        buffer.write_word(1, 0x0200_0000);
        buffer.sync_for_device().unwrap();
        buffer.sync_for_cpu().unwrap();
        assert_eq!(buffer.read_word(0), 0x0100_0000);
        assert_eq!(buffer.read_word(1), 0x0200_0000);
    }
}
