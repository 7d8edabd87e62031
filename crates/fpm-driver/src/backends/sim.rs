//! Simulated backend
//!
//! A behavioural model of the FPM block design: three AXI-DMA channels in
//! front of the fixed-point multiplier, plus the coherent buffer they share.
//! It lets the whole transaction core run in CI without an FPGA.
//!
//! ## What is modelled
//!
//! ```text
//!  write LENGTH (RUN_STOP set)      after channel latency
//!  ───────────────────────────▶ armed ─────────────────────▶ complete
//!                                 │                            │
//!                                 │ MM2S: fetch buffer word ◀──┤
//!                                 │ S2MM: store IP product  ◀──┤
//!                                 │                            ▼
//!                                 │              DMASR |= IOC, call irq handler
//! ```
//!
//! - DMACR: `RESET` clears the channel and cancels its transfer; `RUN_STOP`
//!   clears `HALTED`.
//! - DMASR: interrupt bits are write-one-to-clear.
//! - MM2S channels read their buffer word when the transfer completes, so a
//!   word overwritten while the transfer is armed is what reaches the IP.
//! - The IP multiplies with [`codec::fixed_mul`] once both inputs are in.
//!
//! Interrupts are delivered from a dedicated thread, never from the thread
//! that armed the transfer.
//!
//! ## Knobs and probe
//!
//! [`SimConfig`] sets per-channel latency and failure injection. [`SimProbe`]
//! exposes the ordered bus history ([`BusEvent`]), completed transfers, and
//! any exclusivity violation: two channels armed against one buffer word.

use crate::buffer::TransferBuffer;
use crate::error::{FpmError, Result};
use crate::mmio::RegisterBlock;
use crate::platform::{ChannelResource, IrqHandler, IrqRegistration, Platform};
use fpm_chip::channel::RegisterLayout;
use fpm_chip::regs::{self, control, status};
use fpm_chip::{codec, ip::WORD_BYTES, ChannelRole, Direction};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Bus address the simulated coherent buffer reports
pub const SIM_BUFFER_BASE: u64 = 0x3F00_0000;

/// Bus events kept in the probe history
const EVENT_LOG_LIMIT: usize = 4096;

/// Simulation knobs
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Delay between arming and completion, per channel role index
    pub latency: [Duration; 3],
    /// Channel whose completion interrupt never fires
    pub suppressed_irq: Option<ChannelRole>,
    /// Channel whose transfers end with a slave error
    pub slave_error: Option<ChannelRole>,
    /// Make coherent allocation fail
    pub fail_buffer_alloc: bool,
    /// Resources already claimed by someone else
    pub preclaimed: Vec<ChannelRole>,
}

impl SimConfig {
    /// Same latency on every channel
    #[must_use]
    pub fn with_uniform_latency(mut self, latency: Duration) -> Self {
        self.latency = [latency; 3];
        self
    }

    /// Latency of one channel
    #[must_use]
    pub fn with_latency(mut self, role: ChannelRole, latency: Duration) -> Self {
        self.latency[role.index()] = latency;
        self
    }

    /// Never raise the completion interrupt of `role`
    #[must_use]
    pub const fn with_suppressed_irq(mut self, role: ChannelRole) -> Self {
        self.suppressed_irq = Some(role);
        self
    }

    /// Finish every transfer of `role` with `DMA_SLV_ERR`
    #[must_use]
    pub const fn with_slave_error(mut self, role: ChannelRole) -> Self {
        self.slave_error = Some(role);
        self
    }

    /// Fail coherent memory allocation
    #[must_use]
    pub const fn with_failing_buffer(mut self) -> Self {
        self.fail_buffer_alloc = true;
        self
    }

    /// Treat `role`'s registers and interrupt as already claimed
    #[must_use]
    pub fn with_preclaimed(mut self, role: ChannelRole) -> Self {
        self.preclaimed.push(role);
        self
    }
}

/// One register write seen by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Channel whose block was written
    pub role: ChannelRole,
    /// Register offset
    pub offset: usize,
    /// Value written
    pub value: u32,
}

/// One event on the simulated bus, in the order the model saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Register write to a channel block
    Register(RegisterWrite),
    /// CPU store into a buffer slot
    BufferWrite(usize),
    /// Driver published its buffer stores to the device
    SyncForDevice,
    /// Driver took ownership of device stores
    SyncForCpu,
}

/// One finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedTransfer {
    /// Channel that moved the word
    pub role: ChannelRole,
    /// Buffer slot it targeted
    pub slot: usize,
    /// Word fetched (MM2S) or stored (S2MM)
    pub word: u32,
}

/// Two channels armed against one buffer word at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusivityViolation {
    /// Buffer slot
    pub slot: usize,
    /// Channel that was already armed
    pub holder: ChannelRole,
    /// Channel that armed on top of it
    pub intruder: ChannelRole,
}

#[derive(Debug)]
struct Completion {
    due: Instant,
    role: ChannelRole,
    generation: u64,
}

#[derive(Debug, Default)]
struct ChannelModel {
    registers: HashMap<usize, u32>,
    /// Bumped by reset so stale completions are dropped
    generation: u64,
    /// Slot of the armed transfer
    armed_slot: Option<usize>,
}

#[derive(Default)]
struct ModelState {
    channels: [ChannelModel; 3],
    memory: Option<Arc<SimMemory>>,
    ip_inputs: [Option<u32>; 2],
    product: Option<u32>,
    register_claims: HashSet<ChannelRole>,
    irq_claims: HashSet<u32>,
    handlers: HashMap<ChannelRole, IrqHandler>,
    latency: [Duration; 3],
    events: VecDeque<BusEvent>,
    completed: Vec<CompletedTransfer>,
    violations: Vec<ExclusivityViolation>,
}

struct Model {
    config: SimConfig,
    state: Mutex<ModelState>,
    completions: Sender<Completion>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("config", &self.config).finish()
    }
}

impl Model {
    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, role: ChannelRole, offset: usize) -> u32 {
        let state = self.lock();
        let channel = &state.channels[role.index()];
        let layout = role.layout();
        match channel.registers.get(&offset) {
            Some(&value) => value,
            None if offset == layout.status => status::HALTED,
            None => 0,
        }
    }

    fn write(&self, role: ChannelRole, offset: usize, value: u32) {
        let layout = role.layout();
        let mut state = self.lock();
        state.log(BusEvent::Register(RegisterWrite {
            role,
            offset,
            value,
        }));

        if offset == layout.control {
            Self::write_control(&mut state, role, layout, value);
        } else if offset == layout.status {
            let sr = state.status(role);
            state.set_status(role, sr & !(value & status::IRQ_MASK));
        } else if offset == layout.length {
            state.channels[role.index()].registers.insert(offset, value);
            self.arm(&mut state, role, layout, value);
        } else {
            state.channels[role.index()].registers.insert(offset, value);
        }
    }

    fn write_control(state: &mut ModelState, role: ChannelRole, layout: RegisterLayout, value: u32) {
        let channel = &mut state.channels[role.index()];
        if value & control::RESET != 0 {
            channel.registers.clear();
            channel.generation += 1;
            channel.armed_slot = None;
            channel.registers.insert(layout.status, status::HALTED);
            trace!("sim {role}: reset");
            return;
        }

        channel.registers.insert(layout.control, value);
        let sr = state.status(role);
        if value & control::RUN_STOP == 0 {
            state.set_status(role, sr | status::HALTED);
        } else {
            state.set_status(role, sr & !status::HALTED);
        }
    }

    fn arm(&self, state: &mut ModelState, role: ChannelRole, layout: RegisterLayout, length: u32) {
        let channel = &state.channels[role.index()];
        let running = channel.registers.get(&layout.control).copied().unwrap_or(0) & control::RUN_STOP;
        if running == 0 || length == 0 {
            warn!("sim {role}: length written while halted, ignored");
            return;
        }

        let low = u64::from(channel.registers.get(&layout.address).copied().unwrap_or(0));
        let high = u64::from(channel.registers.get(&layout.address_msb).copied().unwrap_or(0));
        let address = (high << 32) | low;
        let Some(slot) = state.memory.as_ref().and_then(|m| m.slot_of(address)) else {
            warn!("sim {role}: address {address:#x} is outside the transfer buffer");
            return;
        };

        if let Some(holder) = state
            .channels
            .iter()
            .zip(ChannelRole::ATTACH_ORDER)
            .find(|(c, r)| *r != role && c.armed_slot == Some(slot))
            .map(|(_, r)| r)
        {
            warn!("sim: {role} armed on slot {slot} while {holder} holds it");
            state.violations.push(ExclusivityViolation {
                slot,
                holder,
                intruder: role,
            });
        }

        let channel = &mut state.channels[role.index()];
        channel.armed_slot = Some(slot);
        let generation = channel.generation;
        let sr = state.status(role);
        state.set_status(role, sr & !status::IDLE);

        let due = Instant::now() + state.latency[role.index()];
        trace!("sim {role}: armed on slot {slot}");
        if self
            .completions
            .send(Completion {
                due,
                role,
                generation,
            })
            .is_err()
        {
            warn!("sim {role}: interrupt thread gone, transfer will not complete");
        }
    }

    /// Finish a transfer and return the handler to call, if any
    fn complete(&self, event: &Completion) -> Option<IrqHandler> {
        let role = event.role;
        let mut state = self.lock();
        let channel = &mut state.channels[role.index()];
        if channel.generation != event.generation {
            trace!("sim {role}: dropping completion cancelled by reset");
            return None;
        }
        let slot = channel.armed_slot.take()?;
        let memory = state.memory.clone()?;

        let failed = self.config.slave_error == Some(role);
        let sr = state.status(role);
        if failed {
            state.set_status(
                role,
                sr | status::DMA_SLV_ERR | status::ERR_IRQ | status::HALTED | status::IDLE,
            );
        } else {
            let word = match role.direction() {
                Direction::Mm2s => {
                    let word = memory.read_word(slot);
                    state.ip_inputs[role.index()] = Some(word);
                    if let [Some(lhs), Some(rhs)] = state.ip_inputs {
                        state.product = Some(codec::fixed_mul(lhs, rhs));
                        state.ip_inputs = [None, None];
                    }
                    word
                }
                Direction::S2mm => {
                    let word = state.product.take().unwrap_or_else(|| {
                        warn!("sim {role}: no product on the stream");
                        0
                    });
                    memory.store(slot, word);
                    word
                }
            };
            state.completed.push(CompletedTransfer { role, slot, word });
            state.set_status(role, sr | status::IOC_IRQ | status::IDLE);
        }

        if self.config.suppressed_irq == Some(role) {
            debug!("sim {role}: interrupt suppressed");
            return None;
        }
        let enabled = state.channels[role.index()]
            .registers
            .get(&role.layout().control)
            .copied()
            .unwrap_or(0);
        let wanted = if failed {
            control::ERR_IRQ_EN
        } else {
            control::IOC_IRQ_EN
        };
        if enabled & wanted == 0 {
            return None;
        }
        state.handlers.get(&role).cloned()
    }
}

impl ModelState {
    fn log(&mut self, event: BusEvent) {
        if self.events.len() == EVENT_LOG_LIMIT {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn status(&self, role: ChannelRole) -> u32 {
        self.channels[role.index()]
            .registers
            .get(&role.layout().status)
            .copied()
            .unwrap_or(status::HALTED)
    }

    fn set_status(&mut self, role: ChannelRole, value: u32) {
        self.channels[role.index()]
            .registers
            .insert(role.layout().status, value);
    }
}

/// Interrupt delivery loop: fires completions in due order
fn deliver(model: &Weak<Model>, completions: &Receiver<Completion>) {
    let mut pending: Vec<Completion> = Vec::new();
    loop {
        pending.sort_by_key(|c| c.due);
        while pending.first().is_some_and(|c| c.due <= Instant::now()) {
            let event = pending.remove(0);
            let Some(model) = model.upgrade() else {
                return;
            };
            if let Some(handler) = model.complete(&event) {
                handler();
            }
        }

        let received = match pending.first() {
            Some(next) => {
                completions.recv_timeout(next.due.saturating_duration_since(Instant::now()))
            }
            None => completions
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(event) => pending.push(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Register block of one simulated channel
#[derive(Debug)]
pub struct SimRegisters {
    model: Arc<Model>,
    role: ChannelRole,
}

impl RegisterBlock for SimRegisters {
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= regs::REGISTER_WINDOW, "Register offset out of bounds");
        self.model.read(self.role, offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= regs::REGISTER_WINDOW, "Register offset out of bounds");
        self.model.write(self.role, offset, value);
    }
}

impl Drop for SimRegisters {
    fn drop(&mut self) {
        self.model.lock().register_claims.remove(&self.role);
        trace!("sim {}: registers released", self.role);
    }
}

/// Simulated coherent memory
#[derive(Debug)]
pub struct SimMemory {
    base: u64,
    words: Vec<AtomicU32>,
    model: Weak<Model>,
}

impl SimMemory {
    /// Device-side store; not logged
    fn store(&self, slot: usize, value: u32) {
        self.words[slot].store(value, Ordering::SeqCst);
    }

    fn log(&self, event: BusEvent) {
        if let Some(model) = self.model.upgrade() {
            model.lock().log(event);
        }
    }

    fn slot_of(&self, address: u64) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let slot = offset / WORD_BYTES;
        (offset % WORD_BYTES == 0 && slot < self.words.len()).then_some(slot)
    }
}

impl TransferBuffer for SimMemory {
    fn bus_address(&self) -> u64 {
        self.base
    }

    fn len_words(&self) -> usize {
        self.words.len()
    }

    fn read_word(&self, slot: usize) -> u32 {
        self.words[slot].load(Ordering::SeqCst)
    }

    fn write_word(&self, slot: usize, value: u32) {
        self.store(slot, value);
        self.log(BusEvent::BufferWrite(slot));
    }

    fn sync_for_device(&self) -> Result<()> {
        self.log(BusEvent::SyncForDevice);
        Ok(())
    }

    fn sync_for_cpu(&self) -> Result<()> {
        self.log(BusEvent::SyncForCpu);
        Ok(())
    }
}

/// Simulated platform
#[derive(Debug)]
pub struct SimPlatform {
    model: Arc<Model>,
}

impl SimPlatform {
    /// Build the model and start its interrupt thread
    pub fn new(config: SimConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let model = Arc::new(Model {
            state: Mutex::new(ModelState {
                latency: config.latency,
                ..ModelState::default()
            }),
            config,
            completions: tx,
        });

        let weak = Arc::downgrade(&model);
        let spawned = thread::Builder::new()
            .name("fpm-sim-irq".into())
            .spawn(move || deliver(&weak, &rx));
        if let Err(e) = spawned {
            warn!("sim: cannot start interrupt thread: {e}");
        }

        Self { model }
    }

    /// Observation handle onto the model
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            model: Arc::clone(&self.model),
        }
    }
}

impl Platform for SimPlatform {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn claim_registers(&mut self, resource: &ChannelResource) -> Result<Arc<dyn RegisterBlock>> {
        let role = resource.role;
        let mut state = self.model.lock();
        if self.model.config.preclaimed.contains(&role) || !state.register_claims.insert(role) {
            return Err(FpmError::resource_unavailable(
                format!("{role} registers at {:#x}", resource.base),
                "already claimed",
            ));
        }
        drop(state);

        debug!("sim {role}: registers claimed at {:#x}", resource.base);
        Ok(Arc::new(SimRegisters {
            model: Arc::clone(&self.model),
            role,
        }))
    }

    fn request_irq(
        &mut self,
        resource: &ChannelResource,
        handler: IrqHandler,
    ) -> Result<IrqRegistration> {
        let role = resource.role;
        let irq = resource.irq;
        let mut state = self.model.lock();
        if self.model.config.preclaimed.contains(&role) || !state.irq_claims.insert(irq) {
            return Err(FpmError::resource_unavailable(
                format!("irq {irq}"),
                "already claimed",
            ));
        }
        state.handlers.insert(role, handler);
        drop(state);

        let model = Arc::downgrade(&self.model);
        Ok(IrqRegistration::new(irq, move || {
            if let Some(model) = model.upgrade() {
                let mut state = model.lock();
                state.handlers.remove(&role);
                state.irq_claims.remove(&irq);
            }
        }))
    }

    fn alloc_coherent(&mut self, words: usize) -> Result<Arc<dyn TransferBuffer>> {
        if self.model.config.fail_buffer_alloc {
            return Err(FpmError::buffer_fault("simulated allocation failure"));
        }
        let memory = Arc::new(SimMemory {
            base: SIM_BUFFER_BASE,
            words: (0..words).map(|_| AtomicU32::new(0)).collect(),
            model: Arc::downgrade(&self.model),
        });
        self.model.lock().memory = Some(Arc::clone(&memory));
        Ok(memory)
    }
}

/// Read-only view of the model for tests and the CLI
#[derive(Debug, Clone)]
pub struct SimProbe {
    model: Arc<Model>,
}

impl SimProbe {
    /// Register writes to `role`'s block, oldest first
    pub fn register_writes(&self, role: ChannelRole) -> Vec<RegisterWrite> {
        self.model
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Register(write) if write.role == role => Some(*write),
                _ => None,
            })
            .collect()
    }

    /// Every bus event, oldest first
    pub fn bus_events(&self) -> Vec<BusEvent> {
        self.model.lock().events.iter().copied().collect()
    }

    /// Transfers completed so far
    pub fn completed_transfers(&self) -> Vec<CompletedTransfer> {
        self.model.lock().completed.clone()
    }

    /// Exclusivity violations seen so far
    pub fn violations(&self) -> Vec<ExclusivityViolation> {
        self.model.lock().violations.clone()
    }

    /// Register ranges and interrupt lines currently claimed
    pub fn claimed_resources(&self) -> usize {
        let state = self.model.lock();
        state.register_claims.len() + state.irq_claims.len()
    }

    /// Change a channel's latency for transfers armed from now on
    pub fn set_latency(&self, role: ChannelRole, latency: Duration) {
        self.model.lock().latency[role.index()] = latency;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(config: SimConfig) -> (SimPlatform, Arc<dyn RegisterBlock>, Arc<dyn TransferBuffer>) {
        let mut platform = SimPlatform::new(config);
        let block = platform
            .claim_registers(&ChannelResource::reference(ChannelRole::OutboundA))
            .unwrap();
        let buffer = platform.alloc_coherent(2).unwrap();
        (platform, block, buffer)
    }

    #[test]
    fn reset_leaves_channel_halted() {
        let (_platform, block, _buffer) = attached(SimConfig::default());
        block.write32(regs::MM2S_DMACR, control::RESET);
        assert_eq!(block.read32(regs::MM2S_DMACR), 0);
        assert_eq!(block.read32(regs::MM2S_DMASR) & status::HALTED, status::HALTED);
    }

    #[test]
    fn status_interrupt_bits_are_write_one_to_clear() {
        let (platform, block, buffer) = attached(SimConfig::default());
        block.write32(regs::MM2S_DMACR, control::IRQ_ENABLE | control::RUN_STOP);
        block.write32(regs::MM2S_SA, buffer.bus_address() as u32);
        block.write32(regs::MM2S_LENGTH, 4);

        let deadline = Instant::now() + Duration::from_secs(5);
        while platform.probe().completed_transfers().is_empty() {
            assert!(Instant::now() < deadline, "transfer never completed");
            thread::sleep(Duration::from_millis(1));
        }

        let sr = block.read32(regs::MM2S_DMASR);
        assert_ne!(sr & status::IOC_IRQ, 0);
        block.write32(regs::MM2S_DMASR, sr | regs::ack::IOC_ERR);
        let sr = block.read32(regs::MM2S_DMASR);
        assert_eq!(sr & status::IRQ_MASK, 0);
        assert_ne!(sr & status::IDLE, 0);
    }

    #[test]
    fn length_while_halted_does_not_arm() {
        let (platform, block, _buffer) = attached(SimConfig::default());
        block.write32(regs::MM2S_SA, SIM_BUFFER_BASE as u32);
        block.write32(regs::MM2S_LENGTH, 4);
        thread::sleep(Duration::from_millis(20));
        assert!(platform.probe().completed_transfers().is_empty());
    }

    #[test]
    fn cpu_stores_and_syncs_are_logged_in_order() {
        let (platform, block, buffer) = attached(SimConfig::default());
        buffer.write_word(1, 7);
        buffer.sync_for_device().unwrap();
        block.write32(regs::MM2S_DMACR, 0);
        buffer.sync_for_cpu().unwrap();

        assert_eq!(
            platform.probe().bus_events(),
            vec![
                BusEvent::BufferWrite(1),
                BusEvent::SyncForDevice,
                BusEvent::Register(RegisterWrite {
                    role: ChannelRole::OutboundA,
                    offset: regs::MM2S_DMACR,
                    value: 0,
                }),
                BusEvent::SyncForCpu,
            ]
        );
    }

    #[test]
    fn double_claim_is_refused_until_release() {
        let mut platform = SimPlatform::new(SimConfig::default());
        let resource = ChannelResource::reference(ChannelRole::Inbound);
        let block = platform.claim_registers(&resource).unwrap();
        assert!(matches!(
            platform.claim_registers(&resource),
            Err(FpmError::ResourceUnavailable { .. })
        ));
        drop(block);
        assert!(platform.claim_registers(&resource).is_ok());
    }

    #[test]
    fn failing_allocation_is_a_buffer_fault() {
        let mut platform = SimPlatform::new(SimConfig::default().with_failing_buffer());
        assert!(matches!(
            platform.alloc_coherent(2),
            Err(FpmError::BufferFault { .. })
        ));
    }

    #[test]
    fn memory_maps_only_aligned_in_range_addresses() {
        let memory = SimMemory {
            base: SIM_BUFFER_BASE,
            words: vec![AtomicU32::new(0), AtomicU32::new(0)],
            model: Weak::new(),
        };
        assert_eq!(memory.slot_of(SIM_BUFFER_BASE), Some(0));
        assert_eq!(memory.slot_of(SIM_BUFFER_BASE + 4), Some(1));
        assert_eq!(memory.slot_of(SIM_BUFFER_BASE + 2), None);
        assert_eq!(memory.slot_of(SIM_BUFFER_BASE + 8), None);
        assert_eq!(memory.slot_of(0), None);
    }
}
