//! MIDI ports over a native driver handle.
//!
//! A [`MidiPort`] is either readable (handle + callback bridge) or writable
//! (handle + send path). Both share the [`PortHandle`] lifecycle by composition.

mod bridge;
mod handle;
mod info;
mod readable;
mod writable;

pub use bridge::{DeliveryStats, Handler};
pub use handle::{HandleOptions, PortHandle, PortState};
pub use info::{Direction, PortInfo};
pub use readable::{DeliveryMode, ReadablePort};
pub use writable::WritablePort;

use crate::api::Api;
use crate::driver::Driver;
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug)]
pub enum MidiPort {
    Readable(ReadablePort),
    Writable(WritablePort),
}

impl MidiPort {
    /// Create a port of `direction` without opening it.
    pub fn new(
        driver: Arc<dyn Driver>,
        direction: Direction,
        options: &HandleOptions,
    ) -> Result<Self> {
        Ok(match direction {
            Direction::Readable => MidiPort::Readable(ReadablePort::new(driver, options)?),
            Direction::Writable => MidiPort::Writable(WritablePort::new(driver, options)?),
        })
    }

    /// Create a port matching `info.direction` and open it.
    pub fn from_info(
        driver: Arc<dyn Driver>,
        info: &PortInfo,
        options: &HandleOptions,
    ) -> Result<Self> {
        Ok(match info.direction {
            Direction::Readable => {
                MidiPort::Readable(ReadablePort::from_info(driver, info, options)?)
            }
            Direction::Writable => {
                MidiPort::Writable(WritablePort::from_info(driver, info, options)?)
            }
        })
    }

    pub fn direction(&self) -> Direction {
        match self {
            MidiPort::Readable(_) => Direction::Readable,
            MidiPort::Writable(_) => Direction::Writable,
        }
    }

    pub fn open(&mut self, info: &PortInfo) -> Result<()> {
        match self {
            MidiPort::Readable(p) => p.open(info),
            MidiPort::Writable(p) => p.open(info),
        }
    }

    pub fn open_virtual(&mut self, name: &str) -> Result<()> {
        match self {
            MidiPort::Readable(p) => p.open_virtual(name),
            MidiPort::Writable(p) => p.open_virtual(name),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            MidiPort::Readable(p) => p.close(),
            MidiPort::Writable(p) => p.close(),
        }
    }

    pub fn destroy(&mut self) -> Result<()> {
        match self {
            MidiPort::Readable(p) => p.destroy(),
            MidiPort::Writable(p) => p.destroy(),
        }
    }

    pub fn handle(&self) -> &PortHandle {
        match self {
            MidiPort::Readable(p) => p.handle(),
            MidiPort::Writable(p) => p.handle(),
        }
    }

    pub fn info(&self) -> Option<&PortInfo> {
        match self {
            MidiPort::Readable(p) => p.info(),
            MidiPort::Writable(p) => p.info(),
        }
    }

    pub fn state(&self) -> PortState {
        self.handle().state()
    }

    pub fn is_open(&self) -> bool {
        self.handle().is_open()
    }

    pub fn api(&self) -> Result<Api> {
        self.handle().api()
    }

    pub fn as_readable(&mut self) -> Option<&mut ReadablePort> {
        match self {
            MidiPort::Readable(p) => Some(p),
            MidiPort::Writable(_) => None,
        }
    }

    pub fn as_writable(&mut self) -> Option<&mut WritablePort> {
        match self {
            MidiPort::Writable(p) => Some(p),
            MidiPort::Readable(_) => None,
        }
    }
}

impl From<ReadablePort> for MidiPort {
    fn from(port: ReadablePort) -> Self {
        MidiPort::Readable(port)
    }
}

impl From<WritablePort> for MidiPort {
    fn from(port: WritablePort) -> Self {
        MidiPort::Writable(port)
    }
}
