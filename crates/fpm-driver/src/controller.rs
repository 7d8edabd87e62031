//! Transaction queue and pipeline controller
//!
//! The controller owns the three channels, the transfer buffer and the batch
//! state. One cycle moves one operand pair through the hardware:
//!
//! ```text
//!   Idle ──pair queued──▶ OutboundArmed ──A and B done──▶ InboundArmed
//!    ▲                          ▲                              │
//!    │                          └────────more pairs────────────┤
//!    └──────read to end── Draining ◀──batch full, queue empty──┤
//!                                                              ▼
//!                                              Idle (queue empty)
//! ```
//!
//! A timeout or DMA error moves the controller to `Faulted`, where it stays.
//!
//! Writers only enqueue. The first writer to find the pipeline idle becomes
//! the driver and runs cycles until the pending queue is empty; pairs queued
//! by other writers meanwhile are picked up by the same loop. Because only
//! the driver touches the transfer buffer, at most one channel is armed
//! against any buffer word at a time.

use crate::buffer::{slot_address, TransferBuffer, TransferWindow};
use crate::channel::Channel;
use crate::config::{DriverConfig, OutboundSequencing};
use crate::error::{FpmError, Result};
use crate::framing;
use crate::platform::{ChannelResource, IrqHandler, IrqRegistration, Platform};
use crate::queue::PendingQueue;
use crate::results::ResultBuffer;
use fpm_chip::ip::WORD_BYTES;
use fpm_chip::ChannelRole;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Slot holding operand 1, and the result after the inbound transfer
const SLOT_A: usize = 0;
/// Slot holding operand 2 when outbound transfers use split slots
const SLOT_B: usize = 1;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No transfer in flight
    Idle,
    /// Outbound channels armed, waiting for both completions
    OutboundArmed,
    /// Inbound channel armed, waiting for its completion
    InboundArmed,
    /// Batch full and processed, waiting for the reader to drain it
    Draining,
    /// A channel timed out or reported an error
    Faulted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::OutboundArmed => "outbound armed",
            Self::InboundArmed => "inbound armed",
            Self::Draining => "draining",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Batch {
    pending: PendingQueue,
    results: ResultBuffer,
    state: PipelineState,
    /// A writer is running cycles
    driving: bool,
}

/// DMA transaction core for one FPM instance
#[derive(Debug)]
pub struct Controller {
    irqs: Vec<IrqRegistration>,
    channels: [Arc<Channel>; 3],
    buffer: Arc<dyn TransferBuffer>,
    config: DriverConfig,
    batch: Mutex<Batch>,
    result_ready: Condvar,
    cycles: AtomicU64,
}

impl Controller {
    /// Attach to the three channel resources in [`ChannelRole::ATTACH_ORDER`]
    ///
    /// For each role: claim registers, reset the channel, register its
    /// interrupt handler. Then allocate the transfer buffer. Any failure
    /// releases everything acquired so far.
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` for a missing or busy resource,
    /// `BufferFault` if coherent memory cannot be had, and `InvalidState`
    /// for an invalid configuration.
    pub fn attach(
        platform: &mut dyn Platform,
        resources: &[ChannelResource],
        config: DriverConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Attaching FPM on {} backend (queue depth {}, {:?})",
            platform.name(),
            config.queue_depth,
            config.outbound_sequencing
        );

        let mut channels = Vec::with_capacity(ChannelRole::ATTACH_ORDER.len());
        let mut irqs = Vec::with_capacity(ChannelRole::ATTACH_ORDER.len());

        for role in ChannelRole::ATTACH_ORDER {
            let (channel, irq) = Self::attach_channel(platform, resources, role, &config)
                .inspect_err(|e| error!("Attach of {role} failed, unwinding: {e}"))?;
            channels.push(channel);
            irqs.push(irq);
        }

        let buffer = platform
            .alloc_coherent(config.outbound_sequencing.transfer_slots())
            .inspect_err(|e| error!("Transfer buffer allocation failed, unwinding: {e}"))?;

        let channels: [Arc<Channel>; 3] = channels
            .try_into()
            .map_err(|_| FpmError::invalid_state("channel set incomplete"))?;

        let capacity = config
            .pending_capacity()
            .ok_or_else(|| FpmError::invalid_state("queue depth overflows the pending queue"))?;
        info!(
            "FPM attached: buffer at {:#x}, {} pair(s) per batch",
            buffer.bus_address(),
            config.queue_depth
        );

        Ok(Self {
            irqs,
            channels,
            buffer,
            batch: Mutex::new(Batch {
                pending: PendingQueue::new(capacity),
                results: ResultBuffer::new(config.queue_depth),
                state: PipelineState::Idle,
                driving: false,
            }),
            config,
            result_ready: Condvar::new(),
            cycles: AtomicU64::new(0),
        })
    }

    fn attach_channel(
        platform: &mut dyn Platform,
        resources: &[ChannelResource],
        role: ChannelRole,
        config: &DriverConfig,
    ) -> Result<(Arc<Channel>, IrqRegistration)> {
        let resource = resources
            .iter()
            .find(|r| r.role == role)
            .ok_or_else(|| FpmError::resource_unavailable(role.name(), "no platform resource"))?;

        let regs = platform.claim_registers(resource)?;
        let channel = Arc::new(Channel::new(role, regs, resource.irq, config.irq_ack_mask));
        channel.reset();

        let handler: IrqHandler = {
            let channel = Arc::clone(&channel);
            Arc::new(move || channel.service_interrupt())
        };
        let irq = platform.request_irq(resource, handler)?;

        debug!(
            "{role}: registers at {:#x}, irq {}",
            resource.base, resource.irq
        );
        Ok((channel, irq))
    }

    /// Queue the operand pairs of a write request and run them
    ///
    /// Returns the number of pairs accepted. If another caller is already
    /// driving the pipeline, the pairs are left for it and this returns at once.
    ///
    /// # Errors
    ///
    /// `MalformedRequest` and `QueueFull` leave the queue untouched.
    /// `InvalidState` once the controller has faulted. A hardware error hit
    /// while driving is returned to the driving caller.
    pub fn write(&self, request: &str) -> Result<usize> {
        let words = framing::parse_request(request, self.config.operand_format)
            .inspect_err(|e| warn!("Rejected request {request:?}: {e}"))?;
        let pairs = words.len() / 2;

        let mut batch = self.lock_batch();
        if batch.state == PipelineState::Faulted {
            return Err(FpmError::invalid_state(PipelineState::Faulted.to_string()));
        }
        batch
            .pending
            .try_enqueue(&words)
            .inspect_err(|e| warn!("Rejected request: {e}"))?;
        debug!(
            "Queued {pairs} pair(s), {} awaiting the pipeline, {} word(s) in batch",
            batch.pending.outstanding_pairs(),
            batch.pending.len()
        );

        if batch.driving {
            return Ok(pairs);
        }
        batch.driving = true;
        self.drive(batch).map(|()| pairs)
    }

    /// Next result line of the batch
    ///
    /// Blocks while the pipeline is still producing. `None` marks the end of
    /// the batch; queue and results are reset for the next one.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for backends that read through the buffer.
    pub fn read(&self) -> Result<Option<String>> {
        let mut batch = self.lock_batch();
        loop {
            if let Some((index, word)) = batch.results.next() {
                return Ok(Some(framing::format_result(index, word)));
            }
            if !batch.driving {
                break;
            }
            batch = self
                .result_ready
                .wait(batch)
                .unwrap_or_else(PoisonError::into_inner);
        }

        debug!(
            "End of batch after {} result(s)",
            batch.results.produced()
        );
        batch.pending.reset();
        batch.results.reset();
        match batch.state {
            PipelineState::Faulted => warn!("Batch drained on a faulted controller"),
            _ => batch.state = PipelineState::Idle,
        }
        Ok(None)
    }

    /// Map the caller-visible window onto the transfer buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` for any length other than 1 to 4 bytes.
    pub fn map(&self, length: usize) -> Result<TransferWindow> {
        TransferWindow::new(Arc::clone(&self.buffer), length)
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.lock_batch().state
    }

    /// Operand words queued in the current batch
    pub fn queued_words(&self) -> usize {
        self.lock_batch().pending.len()
    }

    /// Results produced but not yet read
    pub fn unread_results(&self) -> usize {
        self.lock_batch().results.unread()
    }

    /// Cycles completed since attach
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Active configuration
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Driver for `role`
    pub fn channel(&self, role: ChannelRole) -> &Channel {
        &self.channels[role.index()]
    }

    /// Interrupt lines registered at attach
    pub fn irq_lines(&self) -> Vec<u32> {
        self.irqs.iter().map(IrqRegistration::irq).collect()
    }

    fn lock_batch(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PipelineState) {
        self.lock_batch().state = state;
    }

    /// Run cycles until the pending queue is empty
    ///
    /// Entered with `driving` set. The batch lock is dropped while a cycle
    /// runs so other writers can enqueue and readers can drain.
    fn drive<'a>(&'a self, mut batch: MutexGuard<'a, Batch>) -> Result<()> {
        loop {
            let Some((lhs, rhs)) = batch.pending.next_pair() else {
                batch.driving = false;
                batch.state = if batch.pending.is_full() {
                    PipelineState::Draining
                } else {
                    PipelineState::Idle
                };
                drop(batch);
                self.result_ready.notify_all();
                return Ok(());
            };
            batch.state = PipelineState::OutboundArmed;
            drop(batch);

            let outcome = self.run_cycle(lhs, rhs);

            batch = self.lock_batch();
            match outcome.and_then(|word| batch.results.push(word)) {
                Ok(()) => {
                    let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "Cycle {cycle}: {lhs:#010x} x {rhs:#010x}, {} result(s) unread",
                        batch.results.unread()
                    );
                    self.result_ready.notify_all();
                }
                Err(e) => {
                    error!("Pipeline faulted: {e}");
                    batch.state = PipelineState::Faulted;
                    batch.driving = false;
                    drop(batch);
                    self.halt_all();
                    self.result_ready.notify_all();
                    return Err(e);
                }
            }
        }
    }

    /// Move one pair through the hardware and return the product word
    fn run_cycle(&self, lhs: u32, rhs: u32) -> Result<u32> {
        let timeout = self.config.completion_timeout();
        let [outbound_a, outbound_b, inbound] = &self.channels;
        let buffer = self.buffer.as_ref();
        #[allow(clippy::cast_possible_truncation)]
        let length = WORD_BYTES as u32;

        buffer.write_word(SLOT_A, lhs);
        match self.config.outbound_sequencing {
            OutboundSequencing::SplitSlots => {
                buffer.write_word(SLOT_B, rhs);
                buffer.sync_for_device()?;
                outbound_a.start_transfer(slot_address(buffer, SLOT_A), length)?;
                outbound_b.start_transfer(slot_address(buffer, SLOT_B), length)?;
                outbound_a.await_completion(timeout)?;
                outbound_b.await_completion(timeout)?;
            }
            OutboundSequencing::SharedSlot => {
                buffer.sync_for_device()?;
                outbound_a.start_transfer(slot_address(buffer, SLOT_A), length)?;
                outbound_a.await_completion(timeout)?;
                buffer.write_word(SLOT_A, rhs);
                buffer.sync_for_device()?;
                outbound_b.start_transfer(slot_address(buffer, SLOT_A), length)?;
                outbound_b.await_completion(timeout)?;
            }
        }

        self.set_state(PipelineState::InboundArmed);
        inbound.start_transfer(slot_address(buffer, SLOT_A), length)?;
        inbound.await_completion(timeout)?;
        buffer.sync_for_cpu()?;
        Ok(buffer.read_word(SLOT_A))
    }

    fn halt_all(&self) {
        for channel in &self.channels {
            channel.halt();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.halt_all();
        info!(
            "FPM detached after {} cycle(s)",
            self.cycles.load(Ordering::Relaxed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::{SimConfig, SimPlatform};
    use fpm_chip::codec;

    fn attach(config: DriverConfig) -> (SimPlatform, Controller) {
        let mut platform = SimPlatform::new(SimConfig::default());
        let controller =
            Controller::attach(&mut platform, &ChannelResource::reference_set(), config).unwrap();
        (platform, controller)
    }

    fn decode_line(line: &str) -> f64 {
        let hex = line.trim().rsplit("0x").next().unwrap();
        codec::decode(u32::from_str_radix(hex, 16).unwrap())
    }

    #[test]
    fn single_pair_returns_to_idle() {
        let (_platform, controller) = attach(DriverConfig::default());
        assert_eq!(controller.write("2.0, 2.0 ").unwrap(), 1);
        assert_eq!(controller.state(), PipelineState::Idle);
        assert_eq!(controller.unread_results(), 1);

        let line = controller.read().unwrap().unwrap();
        assert!(line.starts_with("RES 0: "));
        assert!((decode_line(&line) - 4.0).abs() <= codec::QUANTIZATION_STEP);
        assert_eq!(controller.read().unwrap(), None);
        assert_eq!(controller.queued_words(), 0);
    }

    #[test]
    fn full_batch_enters_draining_until_read_out() {
        let (_platform, controller) = attach(DriverConfig::default().with_queue_depth(2));
        controller.write("1, 1, 2, 2").unwrap();
        assert_eq!(controller.state(), PipelineState::Draining);

        while controller.read().unwrap().is_some() {}
        assert_eq!(controller.state(), PipelineState::Idle);
        controller.write("3, 3").unwrap();
    }

    #[test]
    fn missing_resource_fails_attach() {
        let mut platform = SimPlatform::new(SimConfig::default());
        let resources = vec![
            ChannelResource::reference(ChannelRole::OutboundA),
            ChannelResource::reference(ChannelRole::Inbound),
        ];
        let err = Controller::attach(&mut platform, &resources, DriverConfig::default())
            .unwrap_err();
        assert!(matches!(err, FpmError::ResourceUnavailable { .. }));
        assert_eq!(platform.probe().claimed_resources(), 0);
    }

    #[test]
    fn map_exposes_one_word() {
        let (_platform, controller) = attach(DriverConfig::default());
        controller.write("3.0, 1.5").unwrap();
        let window = controller.map(4).unwrap();
        assert_eq!(window.read(), codec::encode(4.5));
        assert!(controller.map(8).is_err());
    }

    #[test]
    fn irq_lines_follow_resources() {
        let (_platform, controller) = attach(DriverConfig::default());
        assert_eq!(controller.irq_lines(), vec![29, 30, 31]);
    }
}
