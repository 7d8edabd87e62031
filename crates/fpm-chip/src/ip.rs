//! Identity, sizing and reference resources of the FPM design.
//!
//! Source: the block design's device-tree overlay (three `uio_pdrv_genirq`
//! AXI-DMA nodes plus one u-dma-buf node) and the character-device naming
//! used by the test application.

use crate::channel::ChannelRole;
use crate::regs::REGISTER_SPAN;

/// Character-device node the test application opens.
pub const DEVICE_NODE: &str = "/dev/fpmult";

/// Maximum operand pairs in flight per batch (N).
pub const QUEUE_DEPTH: usize = 5;

/// Largest queue depth a driver configuration may ask for.
pub const MAX_QUEUE_DEPTH: usize = 4096;

/// Bytes in one operand / result word.
pub const WORD_BYTES: usize = 4;

/// Largest caller mapping of the transfer buffer, in bytes.
pub const MAP_LIMIT: usize = WORD_BYTES;

/// Name of the u-dma-buf node backing the transfer buffer.
pub const UDMABUF_NAME: &str = "udmabuf_fpm";

/// One AXI-DMA block as the device tree describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLayout {
    /// Channel role this block serves.
    pub role: ChannelRole,
    /// Physical base address of the register block.
    pub base: u64,
    /// Size of the register block in bytes.
    pub span: usize,
    /// Interrupt line (GIC SPI number).
    pub irq: u32,
}

/// Reference placement of the three AXI-DMA blocks.
pub const REFERENCE_RESOURCES: [ResourceLayout; 3] = [
    ResourceLayout {
        role: ChannelRole::OutboundA,
        base: 0x4040_0000,
        span: REGISTER_SPAN,
        irq: 29,
    },
    ResourceLayout {
        role: ChannelRole::OutboundB,
        base: 0x4041_0000,
        span: REGISTER_SPAN,
        irq: 30,
    },
    ResourceLayout {
        role: ChannelRole::Inbound,
        base: 0x4042_0000,
        span: REGISTER_SPAN,
        irq: 31,
    },
];

/// Reference resource for a role.
#[must_use]
pub fn reference_resource(role: ChannelRole) -> ResourceLayout {
    REFERENCE_RESOURCES[role.index()]
}
