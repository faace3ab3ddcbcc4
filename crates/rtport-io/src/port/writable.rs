//! MIDI output port. Sending is stateless byte marshaling: one native write per call.

use super::handle::{HandleOptions, PortHandle, PortState};
use super::info::{Direction, PortInfo};
use crate::api::Api;
use crate::driver::Driver;
use crate::error::{Error, Result};
use rtport_midi::OutgoingMessage;
use std::fmt;
use std::sync::Arc;

pub struct WritablePort {
    handle: PortHandle,
    info: Option<PortInfo>,
    /// Grow-only scratch space for `send`.
    buffer: Vec<u8>,
}

impl WritablePort {
    pub fn new(driver: Arc<dyn Driver>, options: &HandleOptions) -> Result<Self> {
        Ok(Self {
            handle: PortHandle::create(driver, Direction::Writable, options)?,
            info: None,
            buffer: Vec::new(),
        })
    }

    /// Create and open the port described by `info`.
    pub fn from_info(
        driver: Arc<dyn Driver>,
        info: &PortInfo,
        options: &HandleOptions,
    ) -> Result<Self> {
        if info.direction != Direction::Writable {
            return Err(Error::DirectionMismatch {
                expected: Direction::Writable,
                actual: info.direction,
            });
        }
        let mut port = Self::new(driver, options)?;
        port.open(info)?;
        Ok(port)
    }

    pub fn open(&mut self, info: &PortInfo) -> Result<()> {
        self.handle.open(info)?;
        self.info = Some(info.clone());
        Ok(())
    }

    pub fn open_virtual(&mut self, name: &str) -> Result<()> {
        self.handle.open_virtual(name)?;
        self.info = None;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }

    pub fn destroy(&mut self) -> Result<()> {
        self.handle.destroy()
    }

    /// Send one message, each value truncated to its low 8 bits.
    ///
    /// Returns the driver's status code: negative means the driver rejected the
    /// write (e.g. the port is closed), which is not an error here.
    pub fn send(&mut self, message: &[i32]) -> Result<i32> {
        let raw = self.handle.live("send on")?;
        if self.buffer.len() < message.len() {
            self.buffer.resize(message.len(), 0);
        }
        let bytes = &mut self.buffer[..message.len()];
        for (byte, &value) in bytes.iter_mut().zip(message) {
            *byte = value as u8;
        }
        Ok(self.handle.driver().send_message(raw, bytes))
    }

    pub fn send_bytes(&mut self, message: &[u8]) -> Result<i32> {
        let raw = self.handle.live("send on")?;
        Ok(self.handle.driver().send_message(raw, message))
    }

    pub fn send_message(&mut self, message: &OutgoingMessage) -> Result<i32> {
        self.send_bytes(message.as_bytes())
    }

    /// The port this handle was opened on; `None` when virtual or not open yet.
    pub fn info(&self) -> Option<&PortInfo> {
        self.info.as_ref()
    }

    pub fn handle(&self) -> &PortHandle {
        &self.handle
    }

    pub fn state(&self) -> PortState {
        self.handle.state()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn api(&self) -> Result<Api> {
        self.handle.api()
    }

    pub fn supports_virtual_ports(&self) -> bool {
        self.handle.supports_virtual_ports()
    }
}

impl fmt::Debug for WritablePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritablePort")
            .field("handle", &self.handle)
            .field("info", &self.info)
            .finish()
    }
}
