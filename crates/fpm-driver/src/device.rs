//! FPM device handle
//!
//! Wraps a [`Controller`] the way the `/dev/fpmult` character device exposes
//! it: byte-oriented writes of request text, byte-oriented reads of result
//! lines, and a one-word mapping of the transfer buffer.

use crate::buffer::TransferWindow;
use crate::config::DriverConfig;
use crate::controller::Controller;
use crate::error::{FpmError, Result};
use crate::platform::{ChannelResource, Platform};
use fpm_chip::ip::DEVICE_NODE;

/// FPM device handle
#[derive(Debug)]
pub struct FpmDevice {
    controller: Controller,
    /// Part of the current result line that did not fit the caller's buffer
    carry: Vec<u8>,
}

impl FpmDevice {
    /// Open a device over an attached controller
    pub fn open(controller: Controller) -> Self {
        tracing::info!("Opened {DEVICE_NODE}");
        Self {
            controller,
            carry: Vec::new(),
        }
    }

    /// Attach a controller and open it
    ///
    /// # Errors
    ///
    /// Returns any error from [`Controller::attach`].
    pub fn attach(
        platform: &mut dyn Platform,
        resources: &[ChannelResource],
        config: DriverConfig,
    ) -> Result<Self> {
        Controller::attach(platform, resources, config).map(Self::open)
    }

    /// Write a request; returns the number of bytes consumed
    ///
    /// # Errors
    ///
    /// Returns `MalformedRequest` for non-UTF-8 input, otherwise whatever
    /// [`Controller::write`] returns.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(data)
            .map_err(|e| FpmError::malformed_request(format!("request is not UTF-8: {e}")))?;
        self.controller.write(text)?;
        Ok(data.len())
    }

    /// Read result text; 0 marks the end of the batch
    ///
    /// A line longer than `buffer` is continued on the next call.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Controller::read`] returns.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        if self.carry.is_empty() {
            match self.controller.read()? {
                Some(line) => self.carry = line.into_bytes(),
                None => return Ok(0),
            }
        }

        let n = buffer.len().min(self.carry.len());
        buffer[..n].copy_from_slice(&self.carry[..n]);
        self.carry.drain(..n);
        Ok(n)
    }

    /// Map `length` bytes of the transfer buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` unless `0 < length <= 4`.
    pub fn mmap(&self, length: usize) -> Result<TransferWindow> {
        self.controller.map(length)
    }

    /// Underlying controller
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }
}

impl std::io::Read for FpmDevice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Self::read(self, buf).map_err(std::io::Error::other)
    }
}

impl Drop for FpmDevice {
    fn drop(&mut self) {
        tracing::info!("Closed {DEVICE_NODE}");
    }
}
