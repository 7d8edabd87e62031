//! Silicon model for the FPM floating-point multiplier IP.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the programmable-logic design: the AXI-DMA register map
//! that fronts the multiplier, the three channel roles, the Q8.24 wire
//! format the multiplier consumes and produces, and the reference platform
//! resources from the device tree.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | AXI-DMA MM2S / S2MM register offsets and bit definitions |
//! | [`channel`] | Channel roles, directions and per-role register layouts |
//! | [`codec`] | Q8.24 encode / decode and the IP's fixed-point multiply |
//! | [`ip`] | Device names, queue sizing and reference platform resources |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod codec;
pub mod ip;
pub mod regs;

pub use channel::{ChannelRole, Direction};
