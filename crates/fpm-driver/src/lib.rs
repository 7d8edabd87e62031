//! Userspace driver for the FPM fixed-point multiplier IP.
//!
//! The IP sits behind three AXI-DMA channels: two push operands into the
//! multiplier, one pulls the product back. This crate is the transaction
//! core that drives them: request framing, the pending queue, the
//! interrupt-driven pipeline, and the result buffer.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   UioPlatform  - uio_pdrv_genirq register windows + u-dma-buf coherent memory
//!
//! Development / CI:
//!   SimPlatform  - behavioural model of the channels and the multiplier
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use fpm_driver::{ChannelResource, DriverConfig, FpmDevice, UioPlatform};
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut platform = UioPlatform::new()?;
//! let mut dev = FpmDevice::attach(
//!     &mut platform,
//!     &ChannelResource::reference_set(),
//!     DriverConfig::from_env(),
//! )?;
//!
//! dev.write(b"2.0, 2.0, 3.0, 1.5 ")?;
//! let mut results = String::new();
//! dev.read_to_string(&mut results)?;
//! print!("{results}"); // RES 0: 0x04000000 / RES 1: 0x04800000
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod controller;
mod device;
pub mod discovery;
mod error;
pub mod framing;
pub mod mmio;
pub mod platform;
pub mod queue;
pub mod results;

pub use backends::{SimConfig, SimPlatform, SimProbe, UioPlatform};
pub use buffer::{TransferBuffer, TransferWindow, UdmaBuffer};
pub use channel::Channel;
pub use config::{DriverConfig, OperandFormat, OutboundSequencing};
pub use controller::{Controller, PipelineState};
pub use device::FpmDevice;
pub use discovery::{DeviceManager, UdmaBufInfo, UioDevice};
pub use error::{FpmError, Result};
pub use fpm_chip::ChannelRole;
pub use platform::{ChannelResource, IrqHandler, IrqRegistration, Platform};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ChannelResource, ChannelRole, Controller, DriverConfig, FpmDevice, FpmError,
        OperandFormat, OutboundSequencing, PipelineState, Platform, Result, SimConfig,
        SimPlatform, UioPlatform,
    };
}
