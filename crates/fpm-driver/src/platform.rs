//! Platform seam: what the transaction core needs from its environment.
//!
//! A [`Platform`] hands out register blocks, interrupt registrations and
//! coherent memory for the three channel resources. The UIO backend gets
//! them from the kernel; the simulated backend models them.

use crate::buffer::TransferBuffer;
use crate::error::Result;
use crate::mmio::RegisterBlock;
use fpm_chip::ip::{self, ResourceLayout};
use fpm_chip::ChannelRole;
use std::sync::Arc;

/// Interrupt callback bound to one channel
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Register range and interrupt line of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelResource {
    /// Role this resource is attached as
    pub role: ChannelRole,
    /// Physical base address of the register block
    pub base: u64,
    /// Register span in bytes
    pub span: usize,
    /// Interrupt line
    pub irq: u32,
}

impl From<ResourceLayout> for ChannelResource {
    fn from(layout: ResourceLayout) -> Self {
        Self {
            role: layout.role,
            base: layout.base,
            span: layout.span,
            irq: layout.irq,
        }
    }
}

impl ChannelResource {
    /// Resource of `role` in the reference block design
    pub fn reference(role: ChannelRole) -> Self {
        ip::reference_resource(role).into()
    }

    /// All three reference resources in attach order
    pub fn reference_set() -> Vec<Self> {
        ChannelRole::ATTACH_ORDER
            .iter()
            .map(|&role| Self::reference(role))
            .collect()
    }
}

/// Live interrupt registration; dropping it unregisters the handler
pub struct IrqRegistration {
    irq: u32,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl IrqRegistration {
    /// Registration that runs `release` when dropped
    pub fn new(irq: u32, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            irq,
            release: Some(Box::new(release)),
        }
    }

    /// Interrupt line
    pub const fn irq(&self) -> u32 {
        self.irq
    }
}

impl std::fmt::Debug for IrqRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqRegistration").field("irq", &self.irq).finish()
    }
}

impl Drop for IrqRegistration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!("Released irq {}", self.irq);
        }
    }
}

/// Source of hardware resources for one controller
pub trait Platform {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Claim the register range of `resource` exclusively
    ///
    /// The claim is released when the returned block is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the range is missing or already claimed.
    fn claim_registers(&mut self, resource: &ChannelResource) -> Result<Arc<dyn RegisterBlock>>;

    /// Register `handler` on the interrupt line of `resource`
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the line is missing or already claimed.
    fn request_irq(
        &mut self,
        resource: &ChannelResource,
        handler: IrqHandler,
    ) -> Result<IrqRegistration>;

    /// Allocate `words` words of coherent memory
    ///
    /// # Errors
    ///
    /// Returns `BufferFault` if no coherent memory is available.
    fn alloc_coherent(&mut self, words: usize) -> Result<Arc<dyn TransferBuffer>>;
}
