//! AXI-DMA register map for the FPM design.
//!
//! Each channel of the design is its own AXI-DMA block. Outbound channels
//! only use the MM2S half of the block, the inbound channel only the S2MM
//! half. Offsets follow the direct-register-mode layout of the AXI DMA
//! v7.1 product guide.
//!
//! ```text
//! 0x00  MM2S_DMACR    control           0x30  S2MM_DMACR    control
//! 0x04  MM2S_DMASR    status            0x34  S2MM_DMASR    status
//! 0x18  MM2S_SA       source address    0x48  S2MM_DA       destination address
//! 0x1C  MM2S_SA_MSB   source addr hi    0x4C  S2MM_DA_MSB   destination addr hi
//! 0x28  MM2S_LENGTH   bytes, arms       0x58  S2MM_LENGTH   bytes, arms
//! ```

// ── MM2S (memory to stream) ──────────────────────────────────────────────────

/// MM2S control register.
pub const MM2S_DMACR: usize = 0x00;
/// MM2S status register.
pub const MM2S_DMASR: usize = 0x04;
/// MM2S source address (low 32 bits).
pub const MM2S_SA: usize = 0x18;
/// MM2S source address (high 32 bits).
pub const MM2S_SA_MSB: usize = 0x1C;
/// MM2S transfer length in bytes. Writing it starts the transfer.
pub const MM2S_LENGTH: usize = 0x28;

// ── S2MM (stream to memory) ──────────────────────────────────────────────────

/// S2MM control register.
pub const S2MM_DMACR: usize = 0x30;
/// S2MM status register.
pub const S2MM_DMASR: usize = 0x34;
/// S2MM destination address (low 32 bits).
pub const S2MM_DA: usize = 0x48;
/// S2MM destination address (high 32 bits).
pub const S2MM_DA_MSB: usize = 0x4C;
/// S2MM transfer length in bytes. Writing it starts the transfer.
pub const S2MM_LENGTH: usize = 0x58;

/// Bytes of register space decoded by one AXI-DMA block.
pub const REGISTER_SPAN: usize = 0x1_0000;

/// Highest register offset used by the driver, plus one word.
pub const REGISTER_WINDOW: usize = S2MM_LENGTH + 4;

// ── Control register bits ────────────────────────────────────────────────────

/// DMACR bit definitions.
pub mod control {
    /// Run / stop.
    pub const RUN_STOP: u32 = 1 << 0;
    /// Soft reset. Self-clearing.
    pub const RESET: u32 = 1 << 2;
    /// Interrupt on complete enable.
    pub const IOC_IRQ_EN: u32 = 1 << 12;
    /// Delay interrupt enable.
    pub const DLY_IRQ_EN: u32 = 1 << 13;
    /// Error interrupt enable.
    pub const ERR_IRQ_EN: u32 = 1 << 14;
    /// Interrupts the driver enables after reset: completion and error.
    pub const IRQ_ENABLE: u32 = IOC_IRQ_EN | ERR_IRQ_EN;
}

// ── Status register bits ─────────────────────────────────────────────────────

/// DMASR bit definitions.
pub mod status {
    /// Channel halted.
    pub const HALTED: u32 = 1 << 0;
    /// Channel idle (last transfer finished).
    pub const IDLE: u32 = 1 << 1;
    /// Internal DMA error.
    pub const DMA_INT_ERR: u32 = 1 << 4;
    /// AXI slave error on the memory side.
    pub const DMA_SLV_ERR: u32 = 1 << 5;
    /// Address decode error.
    pub const DMA_DEC_ERR: u32 = 1 << 6;
    /// Interrupt on complete.
    pub const IOC_IRQ: u32 = 1 << 12;
    /// Delay interrupt.
    pub const DLY_IRQ: u32 = 1 << 13;
    /// Error interrupt.
    pub const ERR_IRQ: u32 = 1 << 14;
    /// All error conditions the driver reports.
    pub const ERROR_MASK: u32 = DMA_INT_ERR | DMA_SLV_ERR | DMA_DEC_ERR;
    /// Write-one-to-clear interrupt bits.
    pub const IRQ_MASK: u32 = IOC_IRQ | DLY_IRQ | ERR_IRQ;
}

// ── Interrupt acknowledge patterns ───────────────────────────────────────────
// Two driver revisions shipped different patterns. Both are write-one-to-clear
// masks over DMASR; which one the IP core needs is not documented.

/// Interrupt acknowledge patterns written back to DMASR.
pub mod ack {
    /// Clears IOC and error interrupts.
    pub const IOC_ERR: u32 = 0x0000_5000;
    /// Clears IOC, delay and error interrupts.
    pub const IOC_DLY_ERR: u32 = 0x0000_7000;
}
