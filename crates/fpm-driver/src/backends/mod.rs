//! Platform backends
//!
//! Two backends available:
//! - **UIO**: register windows and interrupts from `uio_pdrv_genirq`,
//!   coherent memory from u-dma-buf (real hardware)
//! - **Simulated**: behavioural model of the AXI-DMA channels and the
//!   multiplier (CI, development)

pub mod sim;
pub mod uio;

pub use sim::{SimConfig, SimPlatform, SimProbe};
pub use uio::UioPlatform;
