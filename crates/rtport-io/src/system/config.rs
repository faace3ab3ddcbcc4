use crate::api::Api;
use crate::driver::{IgnoreFlags, DEFAULT_QUEUE_SIZE_LIMIT};
use crate::error::{Error, Result};
use crate::port::HandleOptions;
use serde::{Deserialize, Serialize};

/// Settings applied to every port a [`super::MidiContext`] creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Backend to request; `None` lets the driver choose.
    pub api: Option<Api>,
    pub client_name: Option<String>,
    /// Capacity of each input's polling queue.
    pub queue_size_limit: usize,
    /// Refuse virtual ports even where available, for portable applications.
    pub disallow_virtual_ports: bool,
    /// Applied to readable ports on creation.
    pub ignore: IgnoreFlags,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            api: None,
            client_name: None,
            queue_size_limit: DEFAULT_QUEUE_SIZE_LIMIT,
            disallow_virtual_ports: false,
            ignore: IgnoreFlags::default(),
        }
    }
}

impl MidiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size_limit == 0 {
            return Err(Error::InvalidConfig("queue_size_limit must be at least 1".to_string()));
        }
        if matches!(self.client_name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(Error::InvalidConfig("client_name is empty".to_string()));
        }
        Ok(())
    }

    /// Driver default allocation unless something differs from the defaults.
    pub(crate) fn handle_options(&self) -> HandleOptions {
        let custom_queue = self.queue_size_limit != DEFAULT_QUEUE_SIZE_LIMIT;
        HandleOptions {
            api: self.api,
            client_name: self.client_name.clone(),
            queue_size_limit: custom_queue.then_some(self.queue_size_limit),
            disallow_virtual_ports: self.disallow_virtual_ports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_driver_default_handle() {
        let options = MidiConfig::default().handle_options();
        assert_eq!(options, HandleOptions::default());
    }

    #[test]
    fn test_custom_queue_is_forwarded() {
        let config = MidiConfig {
            queue_size_limit: 512,
            ..Default::default()
        };
        assert_eq!(config.handle_options().queue_size_limit, Some(512));
    }

    #[test]
    fn test_validate() {
        assert!(MidiConfig::default().validate().is_ok());
        let zero = MidiConfig {
            queue_size_limit: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(Error::InvalidConfig(_))));
        let blank = MidiConfig {
            client_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(Error::InvalidConfig(_))));
    }
}
