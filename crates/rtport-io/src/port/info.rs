use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// MIDI input: messages flow from the device to the application.
    Readable,
    /// MIDI output.
    Writable,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Readable => f.write_str("readable"),
            Direction::Writable => f.write_str("writable"),
        }
    }
}

/// Identity of one port in a driver enumeration.
///
/// `index` is the position in the enumeration that produced this value. It is
/// not stable across hotplug events; re-enumerate after the device set changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub index: usize,
    pub direction: Direction,
}

impl PortInfo {
    pub fn new(name: impl Into<String>, index: usize, direction: Direction) -> Self {
        Self {
            name: name.into(),
            index,
            direction,
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.index, self.direction)
    }
}
