//! Channel roles of the FPM design.
//!
//! The design instantiates three AXI-DMA blocks. Two push operands into the
//! multiplier (memory to stream), one pulls the product back (stream to
//! memory). The roles are fixed by the block design; there is exactly one
//! channel per role.

use crate::regs;

/// Transfer direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory to stream (host memory -> IP).
    Mm2s,
    /// Stream to memory (IP -> host memory).
    S2mm,
}

/// Register offsets one channel uses inside its AXI-DMA block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    /// DMACR offset.
    pub control: usize,
    /// DMASR offset.
    pub status: usize,
    /// Source / destination address offset (low 32 bits).
    pub address: usize,
    /// Source / destination address offset (high 32 bits).
    pub address_msb: usize,
    /// Length offset. Writing it arms the transfer.
    pub length: usize,
}

/// MM2S half of an AXI-DMA block.
pub const MM2S_LAYOUT: RegisterLayout = RegisterLayout {
    control: regs::MM2S_DMACR,
    status: regs::MM2S_DMASR,
    address: regs::MM2S_SA,
    address_msb: regs::MM2S_SA_MSB,
    length: regs::MM2S_LENGTH,
};

/// S2MM half of an AXI-DMA block.
pub const S2MM_LAYOUT: RegisterLayout = RegisterLayout {
    control: regs::S2MM_DMACR,
    status: regs::S2MM_DMASR,
    address: regs::S2MM_DA,
    address_msb: regs::S2MM_DA_MSB,
    length: regs::S2MM_LENGTH,
};

/// Role of a channel in the multiply pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRole {
    /// Carries the first operand into the multiplier.
    OutboundA,
    /// Carries the second operand into the multiplier.
    OutboundB,
    /// Carries the product back to host memory.
    Inbound,
}

impl ChannelRole {
    /// Order in which platform resources are attached.
    pub const ATTACH_ORDER: [Self; 3] = [Self::OutboundA, Self::OutboundB, Self::Inbound];

    /// Transfer direction of this role.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::OutboundA | Self::OutboundB => Direction::Mm2s,
            Self::Inbound => Direction::S2mm,
        }
    }

    /// Register layout this role drives.
    #[must_use]
    pub const fn layout(self) -> RegisterLayout {
        match self.direction() {
            Direction::Mm2s => MM2S_LAYOUT,
            Direction::S2mm => S2MM_LAYOUT,
        }
    }

    /// Dense index (0..3), stable across the crate.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::OutboundA => 0,
            Self::OutboundB => 1,
            Self::Inbound => 2,
        }
    }

    /// Short name used in logs and thread names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OutboundA => "mm2s-a",
            Self::OutboundB => "mm2s-b",
            Self::Inbound => "s2mm",
        }
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_order_visits_each_role_once() {
        let mut seen = [false; 3];
        for role in ChannelRole::ATTACH_ORDER {
            assert!(!seen[role.index()], "{role} listed twice");
            seen[role.index()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn outbound_roles_use_mm2s_registers() {
        assert_eq!(ChannelRole::OutboundA.layout(), MM2S_LAYOUT);
        assert_eq!(ChannelRole::OutboundB.layout(), MM2S_LAYOUT);
        assert_eq!(ChannelRole::Inbound.layout(), S2MM_LAYOUT);
        assert_eq!(ChannelRole::Inbound.direction(), Direction::S2mm);
    }

    #[test]
    fn length_register_is_last_in_each_layout() {
        for layout in [MM2S_LAYOUT, S2MM_LAYOUT] {
            assert!(layout.length > layout.address);
            assert!(layout.length > layout.control);
        }
    }
}
