//! Driver configuration
//!
//! Defaults mirror the reference build: five pairs per batch, hex or decimal
//! operands, completion and error interrupts acknowledged with `0x5000`.
//! Every field can be overridden from the environment so the CLI and tests
//! can run the same binary against different IP revisions.

use crate::error::{FpmError, Result};
use fpm_chip::{ip, regs};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// How operand tokens in a write request are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    /// Decimal literals, encoded through the Q8.24 codec
    Decimal,
    /// `0x`-prefixed raw words, passed through unchanged
    Hex,
    /// Per token: `0x` prefix means raw word, anything else decimal
    Auto,
}

impl FromStr for OperandFormat {
    type Err = FpmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decimal" | "dec" => Ok(Self::Decimal),
            "hex" | "raw" => Ok(Self::Hex),
            "auto" => Ok(Self::Auto),
            other => Err(FpmError::invalid_state(format!(
                "unknown operand format '{other}'"
            ))),
        }
    }
}

/// How the two outbound transfers share the transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundSequencing {
    /// One buffer word per outbound channel; both channels armed together
    SplitSlots,
    /// One buffer word; outbound B armed only after outbound A completes
    SharedSlot,
}

impl OutboundSequencing {
    /// Words of coherent memory this mode needs
    pub const fn transfer_slots(self) -> usize {
        match self {
            Self::SplitSlots => 2,
            Self::SharedSlot => 1,
        }
    }
}

impl FromStr for OutboundSequencing {
    type Err = FpmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "split" | "split-slots" => Ok(Self::SplitSlots),
            "shared" | "shared-slot" => Ok(Self::SharedSlot),
            other => Err(FpmError::invalid_state(format!(
                "unknown outbound sequencing '{other}'"
            ))),
        }
    }
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Maximum operand pairs per batch (N)
    pub queue_depth: usize,

    /// Completion wait limit per channel; `None` waits forever
    pub completion_timeout_ms: Option<u64>,

    /// Operand token interpretation
    pub operand_format: OperandFormat,

    /// Transfer buffer sharing between the outbound channels
    pub outbound_sequencing: OutboundSequencing,

    /// Pattern OR-ed into DMASR by the interrupt handler
    pub irq_ack_mask: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            queue_depth: ip::QUEUE_DEPTH,
            completion_timeout_ms: Some(1000),
            operand_format: OperandFormat::Auto,
            outbound_sequencing: OutboundSequencing::SplitSlots,
            irq_ack_mask: regs::ack::IOC_ERR,
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by `FPM_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `FPM_*` key.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("FPM_QUEUE_DEPTH") {
            match raw.trim().parse::<usize>() {
                Ok(depth) => config.queue_depth = depth,
                Err(e) => warn!("Ignoring FPM_QUEUE_DEPTH={raw}: {e}"),
            }
        }

        if let Some(raw) = lookup("FPM_COMPLETION_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.completion_timeout_ms = None,
                Ok(ms) => config.completion_timeout_ms = Some(ms),
                Err(e) => warn!("Ignoring FPM_COMPLETION_TIMEOUT_MS={raw}: {e}"),
            }
        }

        if let Some(raw) = lookup("FPM_OPERAND_FORMAT") {
            match raw.parse() {
                Ok(format) => config.operand_format = format,
                Err(e) => warn!("Ignoring FPM_OPERAND_FORMAT: {e}"),
            }
        }

        if let Some(raw) = lookup("FPM_OUTBOUND_SEQUENCING") {
            match raw.parse() {
                Ok(mode) => config.outbound_sequencing = mode,
                Err(e) => warn!("Ignoring FPM_OUTBOUND_SEQUENCING: {e}"),
            }
        }

        if let Some(raw) = lookup("FPM_IRQ_ACK_MASK") {
            let digits = raw.trim().trim_start_matches("0x");
            match u32::from_str_radix(digits, 16) {
                Ok(mask) => config.irq_ack_mask = mask,
                Err(e) => warn!("Ignoring FPM_IRQ_ACK_MASK={raw}: {e}"),
            }
        }

        config
    }

    /// Set the batch depth
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the completion timeout (`None` waits forever)
    #[must_use]
    pub const fn with_completion_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.completion_timeout_ms = timeout_ms;
        self
    }

    /// Set the operand format
    #[must_use]
    pub const fn with_operand_format(mut self, format: OperandFormat) -> Self {
        self.operand_format = format;
        self
    }

    /// Set the outbound sequencing mode
    #[must_use]
    pub const fn with_outbound_sequencing(mut self, mode: OutboundSequencing) -> Self {
        self.outbound_sequencing = mode;
        self
    }

    /// Set the interrupt acknowledge pattern
    #[must_use]
    pub const fn with_irq_ack_mask(mut self, mask: u32) -> Self {
        self.irq_ack_mask = mask;
        self
    }

    /// Completion timeout as a `Duration`
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Pending queue capacity in words (2N), `None` on overflow
    pub const fn pending_capacity(&self) -> Option<usize> {
        self.queue_depth.checked_mul(2)
    }

    /// Check the configuration can drive a pipeline
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the queue depth is zero or above
    /// [`ip::MAX_QUEUE_DEPTH`], or the acknowledge pattern clears no
    /// interrupt bit.
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(FpmError::invalid_state("queue depth must be at least 1"));
        }
        if self.queue_depth > ip::MAX_QUEUE_DEPTH {
            return Err(FpmError::invalid_state(format!(
                "queue depth {} exceeds {}",
                self.queue_depth,
                ip::MAX_QUEUE_DEPTH
            )));
        }
        if self.irq_ack_mask & regs::status::IRQ_MASK == 0 {
            return Err(FpmError::invalid_state(format!(
                "interrupt acknowledge mask {:#x} clears no interrupt bit",
                self.irq_ack_mask
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_build() {
        let config = DriverConfig::default();
        assert_eq!(config.queue_depth, 5);
        assert_eq!(config.pending_capacity(), Some(10));
        assert_eq!(config.irq_ack_mask, 0x5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = DriverConfig::from_lookup(lookup_from(&[
            ("FPM_QUEUE_DEPTH", "8"),
            ("FPM_COMPLETION_TIMEOUT_MS", "0"),
            ("FPM_OPERAND_FORMAT", "hex"),
            ("FPM_OUTBOUND_SEQUENCING", "shared"),
            ("FPM_IRQ_ACK_MASK", "0x7000"),
        ]));
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.completion_timeout(), None);
        assert_eq!(config.operand_format, OperandFormat::Hex);
        assert_eq!(config.outbound_sequencing, OutboundSequencing::SharedSlot);
        assert_eq!(config.irq_ack_mask, 0x7000);
    }

    #[test]
    fn bad_env_values_keep_defaults() {
        let config = DriverConfig::from_lookup(lookup_from(&[
            ("FPM_QUEUE_DEPTH", "many"),
            ("FPM_OPERAND_FORMAT", "octal"),
            ("FPM_IRQ_ACK_MASK", "zz"),
        ]));
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let config = DriverConfig::default().with_queue_depth(0);
        assert!(matches!(config.validate(), Err(FpmError::InvalidState { .. })));
    }

    #[test]
    fn oversized_depth_is_rejected() {
        let config = DriverConfig::default().with_queue_depth(1 << 40);
        assert!(matches!(config.validate(), Err(FpmError::InvalidState { .. })));
        assert!(DriverConfig::default()
            .with_queue_depth(ip::MAX_QUEUE_DEPTH)
            .validate()
            .is_ok());
        assert_eq!(
            DriverConfig::default()
                .with_queue_depth(usize::MAX)
                .pending_capacity(),
            None
        );
    }

    #[test]
    fn ack_mask_must_clear_an_interrupt() {
        let config = DriverConfig::default().with_irq_ack_mask(0x1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn sequencing_slots() {
        assert_eq!(OutboundSequencing::SplitSlots.transfer_slots(), 2);
        assert_eq!(OutboundSequencing::SharedSlot.transfer_slots(), 1);
    }
}
