//! Channel-voice message construction for writable ports.

use midi_msg::MidiMsg;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Bytes of one outgoing message. Short messages stay inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    bytes: SmallVec<[u8; 3]>,
}

impl OutgoingMessage {
    #[inline]
    fn channel_voice(status: u8, channel: u8, data: &[u8]) -> Self {
        let mut bytes = SmallVec::new();
        bytes.push(status | channel.min(15));
        bytes.extend(data.iter().map(|b| b & 0x7F));
        Self { bytes }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(0x90, channel, &[note, velocity])
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::channel_voice(0x80, channel, &[note, velocity])
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::channel_voice(0xB0, channel, &[controller, value])
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::channel_voice(0xC0, channel, &[program])
    }

    pub fn channel_pressure(channel: u8, pressure: u8) -> Self {
        Self::channel_voice(0xD0, channel, &[pressure])
    }

    /// `value`: signed 14-bit (-8192 to 8191).
    pub fn pitch_bend(channel: u8, value: i16) -> Self {
        let unsigned = (value as i32 + 8192).clamp(0, 16383) as u16;
        let lsb = (unsigned & 0x7F) as u8;
        let msb = ((unsigned >> 7) & 0x7F) as u8;
        Self::channel_voice(0xE0, channel, &[lsb, msb])
    }

    /// Unchecked bytes, e.g. SysEx.
    pub fn raw(bytes: &[u8]) -> Self {
        Self {
            bytes: SmallVec::from_slice(bytes),
        }
    }

    pub fn from_midi_msg(msg: &MidiMsg) -> Self {
        Self {
            bytes: SmallVec::from_vec(msg.to_midi()),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&MidiMsg> for OutgoingMessage {
    fn from(msg: &MidiMsg) -> Self {
        Self::from_midi_msg(msg)
    }
}

impl AsRef<[u8]> for OutgoingMessage {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
