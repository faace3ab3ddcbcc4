//! # rtport - MIDI ports with real-time-safe callbacks
//!
//! Umbrella crate over:
//! - **rtport-io** - Driver seam, port lifecycle, callback bridge, enumeration
//! - **rtport-midi** - Message views and outgoing message builders
//!
//! ## Quick Start
//!
//! ```ignore
//! use rtport::prelude::*;
//!
//! let midi = MidiContext::new()?;
//! for info in midi.list_readable_ports()? {
//!     println!("{}", info);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-io` (default) - Real devices through midir
//! - `jack` - JACK backend on Unix

/// Re-export of rtport-io for direct access
pub use rtport_io as io;

/// Re-export of rtport-midi for direct access
pub use rtport_midi as midi;

pub use rtport_io::{
    is_platform_supported, list_readable_ports, list_writable_ports, Api, DeliveryMode,
    DeliveryStats, Direction, Error, Handler, IgnoreFlags, MemoryDriver, MidiConfig, MidiContext,
    MidiContextBuilder, MidiPort, PortInfo, PortState, ReadablePort, Result, WritablePort,
};

#[cfg(feature = "midi-io")]
pub use rtport_io::MidirDriver;

pub use rtport_midi::{MessageKind, MidiMessage, OutgoingMessage};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{
        Direction, Handler, IgnoreFlags, MessageKind, MidiContext, MidiMessage, MidiPort,
        OutgoingMessage, PortInfo, ReadablePort, WritablePort,
    };
}
