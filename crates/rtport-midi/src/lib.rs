//! MIDI message types for rtport.
//!
//! - [`MidiMessage`]: borrowed, allocation-free view over a delivered message
//! - [`OutgoingMessage`]: channel-voice builders for writable ports

mod message;
mod outgoing;

pub use message::{normalize_status, MessageKind, MidiMessage, SystemKind};
pub use outgoing::OutgoingMessage;

pub use midi_msg::{Channel, ChannelVoiceMsg, MidiMsg};
