//! Borrowed, allocation-free views over incoming MIDI bytes.
//!
//! Decoding never fails: malformed or truncated input degrades to a partial view
//! (`MessageKind::Unknown`, short `data`) instead of an error, so it is safe to run
//! on a driver thread.

use midi_msg::{Channel, MidiMsg};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Mask a status byte down to its message-type nibble.
#[inline]
pub fn normalize_status(byte: u8) -> u8 {
    byte & 0xF0
}

/// System message subtype, taken from the low nibble of an `0xF_` status byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemKind {
    SysEx,
    TimeCode,
    SongPosition,
    SongSelect,
    TuneRequest,
    EndOfExclusive,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
    Undefined(u8),
}

impl SystemKind {
    #[inline]
    pub fn from_low_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => SystemKind::SysEx,
            0x1 => SystemKind::TimeCode,
            0x2 => SystemKind::SongPosition,
            0x3 => SystemKind::SongSelect,
            0x6 => SystemKind::TuneRequest,
            0x7 => SystemKind::EndOfExclusive,
            0x8 => SystemKind::TimingClock,
            0xA => SystemKind::Start,
            0xB => SystemKind::Continue,
            0xC => SystemKind::Stop,
            0xE => SystemKind::ActiveSensing,
            0xF => SystemKind::Reset,
            other => SystemKind::Undefined(other),
        }
    }

    /// Data bytes following the status byte, `None` for variable length (SysEx).
    #[inline]
    pub fn data_len(self) -> Option<usize> {
        match self {
            SystemKind::SysEx => None,
            SystemKind::TimeCode | SystemKind::SongSelect => Some(1),
            SystemKind::SongPosition => Some(2),
            _ => Some(0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    System(SystemKind),
    /// First byte was not a status byte (running status, garbage, empty input).
    Unknown,
}

impl MessageKind {
    /// Classify from the raw (un-normalized) status byte.
    #[inline]
    pub fn from_status(raw_status: u8) -> Self {
        match normalize_status(raw_status) {
            0x80 => MessageKind::NoteOff,
            0x90 => MessageKind::NoteOn,
            0xA0 => MessageKind::PolyPressure,
            0xB0 => MessageKind::ControlChange,
            0xC0 => MessageKind::ProgramChange,
            0xD0 => MessageKind::ChannelPressure,
            0xE0 => MessageKind::PitchBend,
            0xF0 => MessageKind::System(SystemKind::from_low_nibble(raw_status)),
            _ => MessageKind::Unknown,
        }
    }

    #[inline]
    pub fn is_channel_voice(self) -> bool {
        !matches!(self, MessageKind::System(_) | MessageKind::Unknown)
    }

    /// Expected number of data bytes, `None` when the length is open-ended.
    #[inline]
    pub fn data_len(self) -> Option<usize> {
        match self {
            MessageKind::ProgramChange | MessageKind::ChannelPressure => Some(1),
            MessageKind::System(kind) => kind.data_len(),
            MessageKind::Unknown => None,
            _ => Some(2),
        }
    }
}

/// Structured view of one delivered message.
///
/// Borrows the delivery buffer; it is only valid for the duration of the callback
/// that received it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MidiMessage<'a> {
    /// Normalized status (type nibble only).
    pub status: u8,
    pub kind: MessageKind,
    /// Channel from the raw status byte; 0 for system and unknown messages.
    pub channel: u8,
    pub data: &'a [u8],
    /// Seconds since the previous message on the same port.
    pub timestamp: f64,
}

impl<'a> MidiMessage<'a> {
    /// Decode a delivery whose first byte may already be normalized.
    ///
    /// `raw_status` is the status byte as it arrived from the driver, before masking;
    /// it is the only place the channel (or system subtype) survives.
    pub fn decode(raw_status: u8, bytes: &'a [u8], timestamp: f64) -> Self {
        if bytes.is_empty() {
            return Self {
                status: 0,
                kind: MessageKind::Unknown,
                channel: 0,
                data: &[],
                timestamp,
            };
        }

        let kind = MessageKind::from_status(raw_status);
        let channel = if kind.is_channel_voice() {
            raw_status & 0x0F
        } else {
            0
        };
        let data = match kind {
            // Without a status byte every byte is data.
            MessageKind::Unknown => bytes,
            _ => &bytes[1..],
        };

        Self {
            status: normalize_status(bytes[0]),
            kind,
            channel,
            data,
            timestamp,
        }
    }

    /// Decode straight from raw driver bytes.
    pub fn from_bytes(bytes: &'a [u8], timestamp: f64) -> Self {
        Self::decode(bytes.first().copied().unwrap_or(0), bytes, timestamp)
    }

    /// Whether all expected data bytes were present.
    pub fn is_complete(&self) -> bool {
        match self.kind.data_len() {
            Some(expected) => self.data.len() >= expected,
            None => !matches!(self.kind, MessageKind::Unknown),
        }
    }

    #[inline]
    fn data_byte(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.kind == MessageKind::NoteOn && self.data_byte(1).is_some_and(|v| v > 0)
    }

    /// Note off, or note on with zero velocity.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        match self.kind {
            MessageKind::NoteOff => true,
            MessageKind::NoteOn => self.data_byte(1) == Some(0),
            _ => false,
        }
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn | MessageKind::NoteOff | MessageKind::PolyPressure => {
                self.data_byte(0)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn | MessageKind::NoteOff => self.data_byte(1),
            _ => None,
        }
    }

    /// `(controller, value)` for control change messages.
    #[inline]
    pub fn control(&self) -> Option<(u8, u8)> {
        match self.kind {
            MessageKind::ControlChange => Some((self.data_byte(0)?, self.data_byte(1)?)),
            _ => None,
        }
    }

    /// 14-bit pitch bend (8192 = center).
    #[inline]
    pub fn pitch_bend(&self) -> Option<u16> {
        match self.kind {
            MessageKind::PitchBend => {
                let lsb = self.data_byte(0)? as u16 & 0x7F;
                let msb = self.data_byte(1)? as u16 & 0x7F;
                Some((msb << 7) | lsb)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn midi_channel(&self) -> Channel {
        Channel::from_u8(self.channel)
    }

    /// Full parse through `midi-msg`. Allocates; keep it off the driver thread.
    pub fn to_midi_msg(&self) -> Option<MidiMsg> {
        if !self.kind.is_channel_voice() || !self.is_complete() {
            return None;
        }
        let mut bytes: SmallVec<[u8; 4]> = SmallVec::new();
        bytes.push(self.status | self.channel);
        bytes.extend_from_slice(self.data);
        MidiMsg::from_midi(&bytes).ok().map(|(msg, _)| msg)
    }
}
