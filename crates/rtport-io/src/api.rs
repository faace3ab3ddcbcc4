//! MIDI backend identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A MIDI backend a driver can be built against. Discriminants follow the native
/// library's numbering so they survive a round trip through `i32`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Api {
    #[default]
    Unspecified = 0,
    MacosxCore = 1,
    LinuxAlsa = 2,
    UnixJack = 3,
    WindowsMm = 4,
    Dummy = 5,
}

impl Api {
    pub const ALL: [Api; 6] = [
        Api::Unspecified,
        Api::MacosxCore,
        Api::LinuxAlsa,
        Api::UnixJack,
        Api::WindowsMm,
        Api::Dummy,
    ];

    /// Unknown numbers map to `Unspecified`.
    pub fn from_i32(value: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|api| *api as i32 == value)
            .unwrap_or(Api::Unspecified)
    }

    /// Short identifier, e.g. `"alsa"`.
    pub fn name(self) -> &'static str {
        match self {
            Api::Unspecified => "unspecified",
            Api::MacosxCore => "core",
            Api::LinuxAlsa => "alsa",
            Api::UnixJack => "jack",
            Api::WindowsMm => "winmm",
            Api::Dummy => "dummy",
        }
    }

    /// Human readable name, e.g. `"ALSA"`.
    pub fn display_name(self) -> &'static str {
        match self {
            Api::Unspecified => "Unknown",
            Api::MacosxCore => "CoreMidi",
            Api::LinuxAlsa => "ALSA",
            Api::UnixJack => "Jack",
            Api::WindowsMm => "Windows MultiMedia",
            Api::Dummy => "Dummy",
        }
    }

    /// Inverse of [`Api::name`], case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|api| api.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_names() {
        assert_eq!(Api::Unspecified.name(), "unspecified");
        assert_eq!(Api::Unspecified.display_name(), "Unknown");
        assert_eq!(Api::MacosxCore.name(), "core");
        assert_eq!(Api::MacosxCore.display_name(), "CoreMidi");
        assert_eq!(Api::LinuxAlsa.name(), "alsa");
        assert_eq!(Api::LinuxAlsa.display_name(), "ALSA");
        assert_eq!(Api::UnixJack.name(), "jack");
        assert_eq!(Api::UnixJack.display_name(), "Jack");
        assert_eq!(Api::WindowsMm.name(), "winmm");
        assert_eq!(Api::WindowsMm.display_name(), "Windows MultiMedia");
        assert_eq!(Api::Dummy.name(), "dummy");
        assert_eq!(Api::Dummy.display_name(), "Dummy");
    }

    #[test]
    fn test_from_i32() {
        for api in Api::ALL {
            assert_eq!(Api::from_i32(api as i32), api);
        }
        assert_eq!(Api::from_i32(42), Api::Unspecified);
        assert_eq!(Api::from_i32(-1), Api::Unspecified);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Api::from_name("ALSA"), Some(Api::LinuxAlsa));
        assert_eq!(Api::from_name("winmm"), Some(Api::WindowsMm));
        assert_eq!(Api::from_name("coreaudio"), None);
    }
}
