//! MIDI input port: a [`PortHandle`] plus the [`CallbackBridge`] that feeds the
//! application handler.

use super::bridge::{CallbackBridge, DeliveryStats, Handler};
use super::handle::{HandleOptions, PortHandle, PortState};
use super::info::{Direction, PortInfo};
use crate::api::Api;
use crate::driver::{Driver, IgnoreFlags};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How incoming messages reach the application. A port uses one or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Neither a callback nor polling has been used yet.
    Undecided,
    Callback,
    Polling,
}

impl DeliveryMode {
    fn name(self) -> &'static str {
        match self {
            DeliveryMode::Undecided => "undecided",
            DeliveryMode::Callback => "callback",
            DeliveryMode::Polling => "polling",
        }
    }
}

pub struct ReadablePort {
    bridge: CallbackBridge,
    handle: PortHandle,
    info: Option<PortInfo>,
    mode: DeliveryMode,
}

impl ReadablePort {
    pub fn new(driver: Arc<dyn Driver>, options: &HandleOptions) -> Result<Self> {
        Ok(Self {
            bridge: CallbackBridge::new(),
            handle: PortHandle::create(driver, Direction::Readable, options)?,
            info: None,
            mode: DeliveryMode::Undecided,
        })
    }

    /// Create and open the port described by `info`.
    pub fn from_info(
        driver: Arc<dyn Driver>,
        info: &PortInfo,
        options: &HandleOptions,
    ) -> Result<Self> {
        if info.direction != Direction::Readable {
            return Err(Error::DirectionMismatch {
                expected: Direction::Readable,
                actual: info.direction,
            });
        }
        let mut port = Self::new(driver, options)?;
        port.open(info)?;
        Ok(port)
    }

    // ==================== Lifecycle ====================

    pub fn open(&mut self, info: &PortInfo) -> Result<()> {
        self.handle.open(info)?;
        self.info = Some(info.clone());
        Ok(())
    }

    pub fn open_virtual(&mut self, name: &str) -> Result<()> {
        self.handle.open_virtual(name)?;
        self.info = None;
        Ok(())
    }

    /// Unbind from the device. A registered callback stays registered and resumes
    /// receiving after the next open; polling mode is released.
    pub fn close(&mut self) -> Result<()> {
        self.handle.close()?;
        if self.mode == DeliveryMode::Polling {
            self.mode = DeliveryMode::Undecided;
        }
        Ok(())
    }

    /// Remove the callback, then release the native handle.
    ///
    /// The handle is released even if removing the callback fails; that failure is
    /// still reported.
    pub fn destroy(&mut self) -> Result<()> {
        if self.handle.is_destroyed() {
            return Err(Error::AlreadyDestroyed);
        }
        let removed = self.bridge.uninstall(&self.handle);
        if let Err(e) = &removed {
            warn!("Destroying MIDI input with callback removal failure: {}", e);
        }
        let destroyed = self.handle.destroy();
        // No delivery can run once the driver freed the handle.
        self.bridge.detach();
        self.mode = DeliveryMode::Undecided;
        removed.and(destroyed)
    }

    // ==================== Delivery ====================

    /// Register `handler` for every incoming message.
    ///
    /// The handler runs on the driver's thread and must not block.
    pub fn set_callback(&mut self, handler: Handler) -> Result<()> {
        if self.mode == DeliveryMode::Polling {
            return Err(Error::DeliveryModeConflict {
                active: self.mode.name(),
            });
        }
        self.bridge.install(&self.handle, handler)?;
        self.mode = DeliveryMode::Callback;
        Ok(())
    }

    /// Once this returns, the previous handler will not be called again.
    pub fn remove_callback(&mut self) -> Result<()> {
        self.bridge.uninstall(&self.handle)?;
        if self.mode == DeliveryMode::Callback {
            self.mode = DeliveryMode::Undecided;
        }
        Ok(())
    }

    #[inline]
    pub fn has_callback(&self) -> bool {
        self.bridge.is_installed()
    }

    pub fn ignore_types(&mut self, sysex: bool, time: bool, active_sensing: bool) -> Result<()> {
        self.set_ignore_flags(IgnoreFlags::new(sysex, time, active_sensing))
    }

    pub fn set_ignore_flags(&mut self, flags: IgnoreFlags) -> Result<()> {
        let raw = self.handle.live("set ignored message types on")?;
        self.handle.driver().ignore_types(raw, flags)?;
        debug!("MIDI input {} now ignores {:?}", raw, flags);
        Ok(())
    }

    /// Pop the oldest queued message into `buffer` (bytes exactly as the device
    /// sent them) and return its timestamp, or `None` when nothing is queued.
    pub fn get_next_queued_message(&mut self, buffer: &mut Vec<u8>) -> Result<Option<f64>> {
        let raw = self.handle.live("poll")?;
        if self.mode == DeliveryMode::Callback {
            return Err(Error::DeliveryModeConflict {
                active: self.mode.name(),
            });
        }
        self.mode = DeliveryMode::Polling;
        Ok(self.handle.driver().get_message(raw, buffer)?)
    }

    // ==================== Accessors ====================

    #[inline]
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Bridge counters plus the driver's queue overflow count, which reads zero
    /// once the port is destroyed.
    pub fn stats(&self) -> DeliveryStats {
        let queue_overflows = match self.handle.live("read the statistics of") {
            Ok(raw) => self.handle.driver().queue_overflows(raw).unwrap_or(0),
            Err(_) => 0,
        };
        DeliveryStats {
            queue_overflows,
            ..self.bridge.stats()
        }
    }

    /// The port this handle was opened on; `None` when virtual or not open yet.
    pub fn info(&self) -> Option<&PortInfo> {
        self.info.as_ref()
    }

    pub fn handle(&self) -> &PortHandle {
        &self.handle
    }

    pub fn state(&self) -> PortState {
        self.handle.state()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn api(&self) -> Result<Api> {
        self.handle.api()
    }

    pub fn supports_virtual_ports(&self) -> bool {
        self.handle.supports_virtual_ports()
    }
}

impl Drop for ReadablePort {
    fn drop(&mut self) {
        if !self.handle.is_destroyed() {
            if let Err(e) = self.destroy() {
                warn!("MIDI input teardown on drop reported: {}", e);
            }
        }
    }
}

impl fmt::Debug for ReadablePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadablePort")
            .field("handle", &self.handle)
            .field("info", &self.info)
            .field("mode", &self.mode)
            .field("bridge", &self.bridge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, MemoryDriver};

    fn setup() -> (Arc<MemoryDriver>, ReadablePort) {
        let driver = Arc::new(MemoryDriver::new());
        driver.add_port(Direction::Readable, "Keys");
        let port = ReadablePort::from_info(
            driver.clone(),
            &PortInfo::new("Keys", 0, Direction::Readable),
            &HandleOptions::default(),
        )
        .unwrap();
        (driver, port)
    }

    #[test]
    fn test_from_info_rejects_writable_info() {
        let driver = Arc::new(MemoryDriver::new());
        let err = ReadablePort::from_info(
            driver.clone(),
            &PortInfo::new("Out", 0, Direction::Writable),
            &HandleOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DirectionMismatch { .. }));
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn test_destroy_cancels_callback_before_free() {
        let (driver, mut port) = setup();
        port.set_callback(Handler::raw(|_, _| {})).unwrap();
        driver.clear_calls();

        port.destroy().unwrap();

        let calls = driver.calls();
        let cancel = calls
            .iter()
            .position(|c| matches!(c, DriverCall::CancelCallback(_)))
            .unwrap();
        let free = calls
            .iter()
            .position(|c| matches!(c, DriverCall::Free(_)))
            .unwrap();
        assert!(cancel < free);
        assert!(!port.has_callback());
        assert!(matches!(port.destroy(), Err(Error::AlreadyDestroyed)));
    }

    #[test]
    fn test_callback_and_polling_are_exclusive() {
        let (driver, mut port) = setup();
        let mut buf = Vec::new();

        port.set_callback(Handler::raw(|_, _| {})).unwrap();
        assert_eq!(port.delivery_mode(), DeliveryMode::Callback);
        assert!(matches!(
            port.get_next_queued_message(&mut buf),
            Err(Error::DeliveryModeConflict { active: "callback" })
        ));

        port.remove_callback().unwrap();
        assert_eq!(port.delivery_mode(), DeliveryMode::Undecided);

        driver.inject(0, 0.5, &[0x91, 60, 100]);
        assert_eq!(port.get_next_queued_message(&mut buf).unwrap(), Some(0.5));
        assert_eq!(buf, vec![0x91, 60, 100]);
        assert_eq!(port.get_next_queued_message(&mut buf).unwrap(), None);
        assert!(matches!(
            port.set_callback(Handler::raw(|_, _| {})),
            Err(Error::DeliveryModeConflict { active: "polling" })
        ));

        port.close().unwrap();
        assert_eq!(port.delivery_mode(), DeliveryMode::Undecided);
        port.set_callback(Handler::raw(|_, _| {})).unwrap();
    }

    #[test]
    fn test_stats_count_polling_queue_overflow() {
        let driver = Arc::new(MemoryDriver::new());
        driver.add_port(Direction::Readable, "Keys");
        let options = HandleOptions {
            queue_size_limit: Some(2),
            ..Default::default()
        };
        let info = PortInfo::new("Keys", 0, Direction::Readable);
        let mut port = ReadablePort::from_info(driver.clone(), &info, &options).unwrap();

        for note in 60..65 {
            driver.inject(0, 0.0, &[0x90, note, 100]);
        }
        let mut buf = Vec::new();
        let mut received = 0;
        while port.get_next_queued_message(&mut buf).unwrap().is_some() {
            received += 1;
        }

        assert_eq!(received, 2);
        let stats = port.stats();
        assert_eq!(stats.queue_overflows, 3);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_ignore_types_reaches_driver() {
        let (driver, mut port) = setup();
        port.ignore_types(false, true, true).unwrap();
        assert!(driver.calls().iter().any(|c| matches!(
            c,
            DriverCall::IgnoreTypes { flags, .. } if *flags == IgnoreFlags::new(false, true, true)
        )));

        let mut buf = Vec::new();
        driver.inject(0, 0.0, &[0xF0, 0x7E, 0xF7]);
        assert_eq!(port.get_next_queued_message(&mut buf).unwrap(), Some(0.0));
        assert_eq!(buf[0], 0xF0);
    }

    #[test]
    fn test_operations_after_destroy() {
        let (_driver, mut port) = setup();
        port.destroy().unwrap();
        let mut buf = Vec::new();
        assert!(matches!(
            port.set_callback(Handler::raw(|_, _| {})),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(port.remove_callback(), Err(Error::InvalidState { .. })));
        assert!(matches!(
            port.get_next_queued_message(&mut buf),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            port.ignore_types(true, true, true),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_drop_tears_down() {
        let (driver, mut port) = setup();
        port.set_callback(Handler::raw(|_, _| {})).unwrap();
        drop(port);
        assert_eq!(driver.live_handles(), 0);
        let cancels = driver.count_calls(|c| matches!(c, DriverCall::CancelCallback(_)));
        let frees = driver.count_calls(|c| matches!(c, DriverCall::Free(_)));
        assert_eq!(cancels, 1);
        assert_eq!(frees, 1);
    }

    #[test]
    fn test_remove_without_callback_is_noop() {
        let (driver, mut port) = setup();
        driver.clear_calls();
        port.remove_callback().unwrap();
        assert!(driver.calls().is_empty());
    }
}
