//! Channel driver: one AXI-DMA direction, one completion flag.
//!
//! The controller arms a channel with [`Channel::start_transfer`] and blocks
//! in [`Channel::await_completion`]. The interrupt path calls
//! [`Channel::service_interrupt`], which acknowledges the hardware and
//! releases the waiter. A channel never has more than one transfer in flight.

use crate::error::{FpmError, Result};
use crate::mmio::RegisterBlock;
use fpm_chip::channel::RegisterLayout;
use fpm_chip::regs::{control, status};
use fpm_chip::ChannelRole;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Completion flag: set when a transfer is armed, cleared by the interrupt.
#[derive(Debug, Default)]
struct Completion {
    armed: Mutex<bool>,
    done: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Driver for one DMA channel
#[derive(Debug)]
pub struct Channel {
    role: ChannelRole,
    regs: Arc<dyn RegisterBlock>,
    layout: RegisterLayout,
    irq: u32,
    ack_mask: u32,
    completion: Completion,
    /// DMASR value latched by the interrupt path when an error bit was set
    fault: AtomicU32,
}

impl Channel {
    /// Bind a channel to its register block
    pub fn new(role: ChannelRole, regs: Arc<dyn RegisterBlock>, irq: u32, ack_mask: u32) -> Self {
        Self {
            role,
            regs,
            layout: role.layout(),
            irq,
            ack_mask,
            completion: Completion::default(),
            fault: AtomicU32::new(0),
        }
    }

    /// Channel role
    pub const fn role(&self) -> ChannelRole {
        self.role
    }

    /// Interrupt line
    pub const fn irq(&self) -> u32 {
        self.irq
    }

    /// Whether a transfer is armed and not yet completed
    pub fn is_armed(&self) -> bool {
        *self.completion.lock()
    }

    /// Raw register read at a byte offset into the block
    pub fn read_register(&self, offset: usize) -> u32 {
        self.regs.read32(offset)
    }

    /// Raw register write
    pub fn write_register(&self, offset: usize, value: u32) {
        self.regs.write32(offset, value);
    }

    /// Clear stale control state and enable completion and error interrupts
    ///
    /// Must run once before the first transfer.
    pub fn reset(&self) {
        self.write_register(self.layout.control, 0);
        self.write_register(self.layout.control, control::RESET);
        self.write_register(self.layout.control, control::IRQ_ENABLE);

        *self.completion.lock() = false;
        self.fault.store(0, Ordering::SeqCst);
        tracing::debug!("{}: reset, interrupts enabled", self.role);
    }

    /// Kick off one transfer of `length` bytes at bus address `address`
    ///
    /// The length register is written last; that write arms the hardware.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a transfer is already in flight on this channel.
    pub fn start_transfer(&self, address: u64, length: u32) -> Result<()> {
        {
            let mut armed = self.completion.lock();
            if *armed {
                return Err(FpmError::invalid_state(format!(
                    "{} already has a transfer in flight",
                    self.role
                )));
            }
            *armed = true;
        }

        let cr = self.read_register(self.layout.control);
        self.write_register(self.layout.control, cr | control::RUN_STOP);

        #[allow(clippy::cast_possible_truncation)]
        let (low, high) = (address as u32, (address >> 32) as u32);
        self.write_register(self.layout.address, low);
        if high != 0 {
            self.write_register(self.layout.address_msb, high);
        }
        self.write_register(self.layout.length, length);

        tracing::trace!("{}: armed {length} byte(s) at {address:#x}", self.role);
        Ok(())
    }

    /// Block until the interrupt for the armed transfer has fired
    ///
    /// `None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns `HardwareTimeout` if the interrupt did not arrive in time and
    /// `HardwareFault` if it arrived with an error bit set.
    pub fn await_completion(&self, timeout: Option<Duration>) -> Result<()> {
        let guard = self.completion.lock();
        let guard = match timeout {
            Some(limit) => {
                let (guard, wait) = self
                    .completion
                    .done
                    .wait_timeout_while(guard, limit, |armed| *armed)
                    .unwrap_or_else(PoisonError::into_inner);
                if wait.timed_out() && *guard {
                    tracing::error!("{}: no completion after {limit:?}", self.role);
                    return Err(FpmError::HardwareTimeout {
                        channel: self.role,
                        duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                guard
            }
            None => self
                .completion
                .done
                .wait_while(guard, |armed| *armed)
                .unwrap_or_else(PoisonError::into_inner),
        };
        drop(guard);

        match self.fault.swap(0, Ordering::SeqCst) {
            0 => Ok(()),
            status => Err(FpmError::HardwareFault {
                channel: self.role,
                status,
            }),
        }
    }

    /// Interrupt handler body
    ///
    /// Reads DMASR, writes it back OR-ed with the acknowledge pattern, latches
    /// any error bits, then clears the completion flag.
    pub fn service_interrupt(&self) {
        let sr = self.read_register(self.layout.status);
        self.write_register(self.layout.status, sr | self.ack_mask);

        if sr & status::ERROR_MASK != 0 {
            tracing::error!("{}: DMA error, DMASR={sr:#010x}", self.role);
            self.fault.store(sr, Ordering::SeqCst);
        }

        let mut armed = self.completion.lock();
        if !*armed {
            tracing::debug!("{}: interrupt with no transfer armed", self.role);
        }
        *armed = false;
        drop(armed);
        self.completion.done.notify_all();
    }

    /// Stop the channel and release any waiter
    pub fn halt(&self) {
        self.write_register(self.layout.control, 0);

        *self.completion.lock() = false;
        self.completion.done.notify_all();
        tracing::debug!("{}: halted", self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpm_chip::regs;
    use std::collections::HashMap;
    use std::thread;

    #[derive(Debug, Default)]
    struct RecordingRegisters {
        values: Mutex<HashMap<usize, u32>>,
        writes: Mutex<Vec<(usize, u32)>>,
    }

    impl RecordingRegisters {
        fn set(&self, offset: usize, value: u32) {
            self.values.lock().unwrap().insert(offset, value);
        }

        fn writes(&self) -> Vec<(usize, u32)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl RegisterBlock for RecordingRegisters {
        fn read32(&self, offset: usize) -> u32 {
            self.values.lock().unwrap().get(&offset).copied().unwrap_or(0)
        }

        fn write32(&self, offset: usize, value: u32) {
            self.writes.lock().unwrap().push((offset, value));
            self.values.lock().unwrap().insert(offset, value);
        }
    }

    fn channel(role: ChannelRole) -> (Arc<RecordingRegisters>, Channel) {
        let regs = Arc::new(RecordingRegisters::default());
        let channel = Channel::new(role, regs.clone(), 29, regs::ack::IOC_ERR);
        (regs, channel)
    }

    #[test]
    fn reset_writes_zero_then_reset_then_irq_enable() {
        let (regs, ch) = channel(ChannelRole::OutboundA);
        ch.reset();
        assert_eq!(
            regs.writes(),
            vec![
                (regs::MM2S_DMACR, 0),
                (regs::MM2S_DMACR, control::RESET),
                (regs::MM2S_DMACR, control::IRQ_ENABLE),
            ]
        );
    }

    #[test]
    fn raw_register_access_hits_the_block() {
        let (regs, ch) = channel(ChannelRole::Inbound);
        regs.set(regs::S2MM_DMASR, status::HALTED);
        assert_eq!(ch.read_register(regs::S2MM_DMASR), status::HALTED);

        ch.write_register(regs::S2MM_DA, 0x3F00_0004);
        assert_eq!(regs.writes(), vec![(regs::S2MM_DA, 0x3F00_0004)]);
        assert_eq!(ch.read_register(regs::S2MM_DA), 0x3F00_0004);
    }

    #[test]
    fn start_transfer_writes_length_last() {
        let (regs, ch) = channel(ChannelRole::Inbound);
        ch.reset();
        ch.start_transfer(0x3F00_0000, 4).unwrap();

        let writes = regs.writes();
        assert_eq!(
            &writes[3..],
            &[
                (regs::S2MM_DMACR, control::IRQ_ENABLE | control::RUN_STOP),
                (regs::S2MM_DA, 0x3F00_0000),
                (regs::S2MM_LENGTH, 4),
            ]
        );
        assert!(ch.is_armed());
    }

    #[test]
    fn high_address_goes_to_msb_register_before_length() {
        let (regs, ch) = channel(ChannelRole::OutboundB);
        ch.start_transfer(0x1_0000_0010, 4).unwrap();
        let offsets: Vec<usize> = regs.writes().iter().map(|(o, _)| *o).collect();
        assert_eq!(
            offsets,
            vec![regs::MM2S_DMACR, regs::MM2S_SA, regs::MM2S_SA_MSB, regs::MM2S_LENGTH]
        );
    }

    #[test]
    fn second_transfer_while_armed_is_rejected() {
        let (_regs, ch) = channel(ChannelRole::OutboundA);
        ch.start_transfer(0x1000, 4).unwrap();
        assert!(matches!(
            ch.start_transfer(0x1000, 4),
            Err(FpmError::InvalidState { .. })
        ));
    }

    #[test]
    fn interrupt_acknowledges_and_releases_waiter() {
        let (regs, ch) = channel(ChannelRole::OutboundA);
        let ch = Arc::new(ch);
        ch.start_transfer(0x1000, 4).unwrap();
        regs.set(regs::MM2S_DMASR, status::IOC_IRQ | status::IDLE);

        let irq = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                ch.service_interrupt();
            })
        };

        ch.await_completion(Some(Duration::from_secs(5))).unwrap();
        irq.join().unwrap();

        assert!(!ch.is_armed());
        assert!(regs.writes().contains(&(
            regs::MM2S_DMASR,
            status::IOC_IRQ | status::IDLE | regs::ack::IOC_ERR
        )));
    }

    #[test]
    fn missing_interrupt_times_out() {
        let (_regs, ch) = channel(ChannelRole::Inbound);
        ch.start_transfer(0x1000, 4).unwrap();
        let err = ch.await_completion(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(
            err,
            FpmError::HardwareTimeout {
                channel: ChannelRole::Inbound,
                duration_ms: 20
            }
        ));
    }

    #[test]
    fn error_status_is_reported_once() {
        let (regs, ch) = channel(ChannelRole::OutboundB);
        ch.start_transfer(0x1000, 4).unwrap();
        regs.set(regs::MM2S_DMASR, status::DMA_SLV_ERR | status::ERR_IRQ);
        ch.service_interrupt();

        let err = ch.await_completion(None).unwrap_err();
        assert!(matches!(err, FpmError::HardwareFault { status: sr, .. } if sr & status::DMA_SLV_ERR != 0));

        ch.start_transfer(0x1000, 4).unwrap();
        regs.set(regs::MM2S_DMASR, status::IOC_IRQ);
        ch.service_interrupt();
        assert!(ch.await_completion(None).is_ok());
    }

    #[test]
    fn halt_clears_run_stop_and_releases_waiter() {
        let (regs, ch) = channel(ChannelRole::OutboundA);
        ch.reset();
        ch.start_transfer(0x1000, 4).unwrap();
        ch.halt();
        assert!(!ch.is_armed());
        assert_eq!(regs.read32(regs::MM2S_DMACR), 0);
    }
}
