//! MidiContext builder.

use std::sync::Arc;

use crate::api::Api;
use crate::driver::{Driver, IgnoreFlags};
use crate::error::Result;
use tracing::debug;

use super::{MidiConfig, MidiContext, MidiContextInner};

#[derive(Default)]
pub struct MidiContextBuilder {
    config: MidiConfig,
    driver: Option<Arc<dyn Driver>>,
}

impl MidiContextBuilder {
    pub fn api(mut self, api: Api) -> Self {
        self.config.api = Some(api);
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    pub fn queue_size_limit(mut self, limit: usize) -> Self {
        self.config.queue_size_limit = limit;
        self
    }

    pub fn disallow_virtual_ports(mut self, disallow: bool) -> Self {
        self.config.disallow_virtual_ports = disallow;
        self
    }

    /// Message classes readable ports drop before delivery.
    pub fn ignore(mut self, flags: IgnoreFlags) -> Self {
        self.config.ignore = flags;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: MidiConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific driver instead of the platform one.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn build(self) -> Result<MidiContext> {
        self.config.validate()?;
        let driver = match self.driver {
            Some(driver) => driver,
            None => platform_driver(&self.config),
        };
        debug!("MIDI context ready: {:?}", self.config);
        Ok(MidiContext {
            inner: Arc::new(MidiContextInner {
                driver,
                config: self.config,
            }),
        })
    }
}

#[cfg(feature = "midi-io")]
fn platform_driver(config: &MidiConfig) -> Arc<dyn Driver> {
    let client_name = config
        .client_name
        .as_deref()
        .unwrap_or(crate::driver::DEFAULT_CLIENT_NAME);
    Arc::new(crate::driver::MidirDriver::with_defaults(client_name, config.queue_size_limit))
}

#[cfg(not(feature = "midi-io"))]
fn platform_driver(_config: &MidiConfig) -> Arc<dyn Driver> {
    debug!("Built without midi-io, using the in-memory driver");
    Arc::new(crate::driver::MemoryDriver::new())
}
