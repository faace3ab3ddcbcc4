//! Application entry point: one driver plus the configuration every port is
//! created with.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rtport_io::{Handler, MidiContext};
//!
//! let midi = MidiContext::builder().client_name("Sequencer").build()?;
//!
//! let inputs = midi.list_readable_ports()?;
//! let mut keys = midi.open_readable(&inputs[0])?;
//! keys.set_callback(Handler::message(|msg| {
//!     if let Some(note) = msg.note() {
//!         // runs on the driver thread
//!     }
//! }))?;
//!
//! let outputs = midi.list_writable_ports()?;
//! let mut synth = midi.open_writable(&outputs[0])?;
//! synth.send(&[0x90, 60, 100])?;
//! ```

mod builder;
mod config;

pub use builder::MidiContextBuilder;
pub use config::MidiConfig;

use crate::api::Api;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::port::{Direction, MidiPort, PortInfo, ReadablePort, WritablePort};
use crate::registry;
use std::fmt;
use std::sync::Arc;

/// Whether this build talks to a native MIDI API at all.
pub fn is_platform_supported() -> bool {
    #[cfg(feature = "midi-io")]
    {
        crate::driver::platform_api() != Api::Dummy
    }
    #[cfg(not(feature = "midi-io"))]
    {
        false
    }
}

/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct MidiContext {
    inner: Arc<MidiContextInner>,
}

struct MidiContextInner {
    driver: Arc<dyn Driver>,
    config: MidiConfig,
}

impl MidiContext {
    pub fn builder() -> MidiContextBuilder {
        MidiContextBuilder::default()
    }

    /// Context over the platform driver with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub fn config(&self) -> &MidiConfig {
        &self.inner.config
    }

    // ==================== Enumeration ====================

    pub fn list_readable_ports(&self) -> Result<Vec<PortInfo>> {
        registry::list_readable_ports(&self.inner.driver)
    }

    pub fn list_writable_ports(&self) -> Result<Vec<PortInfo>> {
        registry::list_writable_ports(&self.inner.driver)
    }

    pub fn list_available_apis(&self) -> Vec<Api> {
        self.inner.driver.compiled_apis()
    }

    pub fn supports_virtual_ports(&self) -> bool {
        !self.inner.config.disallow_virtual_ports && self.inner.driver.supports_virtual_ports()
    }

    // ==================== Port Construction ====================

    /// Unopened input with the configured ignore flags applied.
    pub fn create_readable(&self) -> Result<ReadablePort> {
        let options = self.inner.config.handle_options();
        let mut port = ReadablePort::new(Arc::clone(&self.inner.driver), &options)?;
        port.set_ignore_flags(self.inner.config.ignore)?;
        Ok(port)
    }

    pub fn create_writable(&self) -> Result<WritablePort> {
        let options = self.inner.config.handle_options();
        WritablePort::new(Arc::clone(&self.inner.driver), &options)
    }

    pub fn open_readable(&self, info: &PortInfo) -> Result<ReadablePort> {
        expect_direction(info, Direction::Readable)?;
        let mut port = self.create_readable()?;
        port.open(info)?;
        Ok(port)
    }

    pub fn open_writable(&self, info: &PortInfo) -> Result<WritablePort> {
        expect_direction(info, Direction::Writable)?;
        let mut port = self.create_writable()?;
        port.open(info)?;
        Ok(port)
    }

    /// Open whichever kind of port `info` describes.
    pub fn open_port(&self, info: &PortInfo) -> Result<MidiPort> {
        Ok(match info.direction {
            Direction::Readable => MidiPort::Readable(self.open_readable(info)?),
            Direction::Writable => MidiPort::Writable(self.open_writable(info)?),
        })
    }

    pub fn open_virtual_readable(&self, name: &str) -> Result<ReadablePort> {
        let mut port = self.create_readable()?;
        port.open_virtual(name)?;
        Ok(port)
    }

    pub fn open_virtual_writable(&self, name: &str) -> Result<WritablePort> {
        let mut port = self.create_writable()?;
        port.open_virtual(name)?;
        Ok(port)
    }
}

fn expect_direction(info: &PortInfo, expected: Direction) -> Result<()> {
    if info.direction == expected {
        Ok(())
    } else {
        Err(Error::DirectionMismatch {
            expected,
            actual: info.direction,
        })
    }
}

impl fmt::Debug for MidiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiContext")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, IgnoreFlags, MemoryDriver};

    fn context(memory: &Arc<MemoryDriver>) -> MidiContext {
        MidiContext::builder()
            .driver(memory.clone())
            .ignore(IgnoreFlags::NONE)
            .build()
            .unwrap()
    }

    #[test]
    fn test_enumerate_and_open() {
        let memory = Arc::new(MemoryDriver::new());
        memory.add_port(Direction::Readable, "Keys");
        memory.add_port(Direction::Writable, "Synth");
        let midi = context(&memory);

        let inputs = midi.list_readable_ports().unwrap();
        let outputs = midi.list_writable_ports().unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(outputs[0].name, "Synth");

        let mut port = midi.open_port(&inputs[0]).unwrap();
        assert_eq!(port.direction(), Direction::Readable);
        assert!(memory.calls().iter().any(|c| matches!(
            c,
            DriverCall::IgnoreTypes { flags, .. } if *flags == IgnoreFlags::NONE
        )));
        port.destroy().unwrap();
    }

    #[test]
    fn test_direction_checked_before_allocation() {
        let memory = Arc::new(MemoryDriver::new());
        let midi = context(&memory);
        let info = PortInfo::new("Synth", 0, Direction::Writable);
        assert!(matches!(
            midi.open_readable(&info),
            Err(Error::DirectionMismatch { .. })
        ));
        assert!(memory.calls().is_empty());
    }

    #[test]
    fn test_apis_and_virtual_support() {
        let memory = Arc::new(MemoryDriver::new());
        let midi = context(&memory);
        assert_eq!(midi.list_available_apis(), vec![Api::Dummy]);
        assert!(midi.supports_virtual_ports());

        let strict = MidiContext::builder()
            .driver(memory.clone())
            .disallow_virtual_ports(true)
            .build()
            .unwrap();
        assert!(!strict.supports_virtual_ports());
        assert!(matches!(
            strict.open_virtual_writable("out"),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_clone_shares_driver() {
        let memory = Arc::new(MemoryDriver::new());
        let midi = context(&memory);
        let other = midi.clone();
        assert!(Arc::ptr_eq(midi.driver(), other.driver()));
    }
}
