//! MIDI port management over native, callback-driven drivers.
//!
//! Provides port enumeration, a port lifecycle that can never touch a released
//! native handle, and a real-time-safe bridge from the driver's delivery thread
//! to one application callback per input.
//!
//! Feature gates: `midi-io` (real devices via midir, default), `jack` (JACK backend).

pub mod error;
pub use error::{Error, Result};

mod api;
pub use api::Api;

pub mod driver;
pub use driver::{Driver, IgnoreFlags, MemoryDriver, RawHandle, Trampoline};

#[cfg(feature = "midi-io")]
pub use driver::MidirDriver;

pub mod port;
pub use port::{
    DeliveryMode, DeliveryStats, Direction, Handler, MidiPort, PortInfo, PortState, ReadablePort,
    WritablePort,
};

pub mod registry;
pub use registry::{list_readable_ports, list_writable_ports};

mod system;
pub use system::{is_platform_supported, MidiConfig, MidiContext, MidiContextBuilder};

pub use rtport_midi::{MessageKind, MidiMessage, OutgoingMessage, SystemKind};
