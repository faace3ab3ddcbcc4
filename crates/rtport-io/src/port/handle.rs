//! Native handle ownership and the port lifecycle state machine.
//!
//! ```text
//! Created ──open──▶ Open ────────┐
//!    │  └─open_virtual─▶ OpenVirtual ──close──▶ Closed ──open/open_virtual──▶ …
//!    └──────────────── destroy (from any live state) ──────────────▶ Destroyed
//! ```
//!
//! Every operation that reaches the driver checks for `Destroyed` first.

use super::info::{Direction, PortInfo};
use crate::api::Api;
use crate::driver::{Driver, RawHandle, DEFAULT_CLIENT_NAME, DEFAULT_QUEUE_SIZE_LIMIT};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    Created,
    Open,
    OpenVirtual,
    Closed,
    Destroyed,
}

impl PortState {
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, PortState::Open | PortState::OpenVirtual)
    }
}

/// How a native handle is allocated.
///
/// With every field unset the driver's default handle is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleOptions {
    pub api: Option<Api>,
    pub client_name: Option<String>,
    pub queue_size_limit: Option<usize>,
    /// Refuse `open_virtual` even where the platform supports it.
    pub disallow_virtual_ports: bool,
}

impl HandleOptions {
    fn uses_driver_default(&self) -> bool {
        self.api.is_none() && self.client_name.is_none() && self.queue_size_limit.is_none()
    }
}

/// Sole owner of one native handle.
///
/// Neither the handle id nor a context's driver is reachable from outside the
/// crate, so nothing can free the handle behind the port's back:
///
/// ```compile_fail
/// fn free_behind_port(midi: &rtport_io::MidiContext, port: &rtport_io::ReadablePort) {
///     let raw = port.handle().raw().unwrap();
///     midi.driver().free(raw).unwrap();
/// }
/// ```
pub struct PortHandle {
    driver: Arc<dyn Driver>,
    raw: RawHandle,
    state: PortState,
    direction: Direction,
    disallow_virtual_ports: bool,
}

impl PortHandle {
    pub fn create(
        driver: Arc<dyn Driver>,
        direction: Direction,
        options: &HandleOptions,
    ) -> Result<Self> {
        let created = if options.uses_driver_default() {
            driver.create_default(direction)
        } else {
            let client_name = options.client_name.as_deref();
            driver.create(
                direction,
                options.api.unwrap_or_default(),
                client_name.unwrap_or(DEFAULT_CLIENT_NAME),
                options.queue_size_limit.unwrap_or(DEFAULT_QUEUE_SIZE_LIMIT),
            )
        };

        let raw = created.map_err(|e| Error::NativeAllocation {
            direction,
            reason: e.0,
        })?;
        debug!("Created {} MIDI handle {}", direction, raw);

        Ok(Self {
            driver,
            raw,
            state: PortState::Created,
            direction,
            disallow_virtual_ports: options.disallow_virtual_ports,
        })
    }

    /// The single use-after-free guard: every driver call goes through here.
    #[inline]
    pub(crate) fn live(&self, operation: &'static str) -> Result<RawHandle> {
        if self.state == PortState::Destroyed {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(self.raw)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn open(&mut self, info: &PortInfo) -> Result<()> {
        let raw = self.live("open")?;
        if info.direction != self.direction {
            return Err(Error::DirectionMismatch {
                expected: self.direction,
                actual: info.direction,
            });
        }
        self.ensure_openable("open")?;

        self.driver
            .open_port(raw, info.index, &info.name)
            .map_err(|e| Error::PortUnavailable(format!("{}: {}", info, e)))?;
        self.state = PortState::Open;
        debug!("Opened MIDI port {} on handle {}", info, raw);
        Ok(())
    }

    pub fn open_virtual(&mut self, name: &str) -> Result<()> {
        let raw = self.live("open_virtual")?;
        if !self.supports_virtual_ports() {
            return Err(Error::UnsupportedOperation(
                "virtual MIDI ports are not available here".to_string(),
            ));
        }
        self.ensure_openable("open_virtual")?;

        self.driver
            .open_virtual_port(raw, name)
            .map_err(|e| Error::PortUnavailable(format!("virtual port '{}': {}", name, e)))?;
        self.state = PortState::OpenVirtual;
        debug!(
            "Opened virtual {} MIDI port '{}' on handle {}",
            self.direction, name, raw
        );
        Ok(())
    }

    fn ensure_openable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            PortState::Created | PortState::Closed => Ok(()),
            state => Err(Error::InvalidState { operation, state }),
        }
    }

    /// No-op unless the handle is open.
    pub fn close(&mut self) -> Result<()> {
        let raw = self.live("close")?;
        if !self.state.is_open() {
            return Ok(());
        }
        self.driver.close_port(raw)?;
        self.state = PortState::Closed;
        debug!("Closed MIDI handle {}", raw);
        Ok(())
    }

    /// Release the native handle. A second call fails without touching the driver.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == PortState::Destroyed {
            return Err(Error::AlreadyDestroyed);
        }
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let raw = self.raw;
        if self.state.is_open() {
            if let Err(e) = self.driver.close_port(raw) {
                warn!("Failed to close MIDI handle {} before release: {}", raw, e);
            }
        }
        // Marked first so a failing free is never retried.
        self.state = PortState::Destroyed;
        self.driver.free(raw)?;
        debug!("Destroyed MIDI handle {}", raw);
        Ok(())
    }

    pub fn api(&self) -> Result<Api> {
        let raw = self.live("query the api of")?;
        Ok(self.driver.current_api(raw)?)
    }

    pub fn supports_virtual_ports(&self) -> bool {
        !self.disallow_virtual_ports && self.driver.supports_virtual_ports()
    }

    #[inline]
    pub fn state(&self) -> PortState {
        self.state
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.state == PortState::OpenVirtual
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.state == PortState::Destroyed
    }
}

impl Drop for PortHandle {
    fn drop(&mut self) {
        if self.state != PortState::Destroyed {
            if let Err(e) = self.release() {
                warn!("Failed to release MIDI handle {} on drop: {}", self.raw, e);
            }
        }
    }
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("raw", &self.raw)
            .field("state", &self.state)
            .field("direction", &self.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, MemoryDriver};

    fn setup() -> (Arc<MemoryDriver>, PortHandle) {
        let driver = Arc::new(MemoryDriver::new());
        driver.add_port(Direction::Readable, "Keys");
        let options = HandleOptions::default();
        let handle = PortHandle::create(driver.clone(), Direction::Readable, &options).unwrap();
        (driver, handle)
    }

    fn keys() -> PortInfo {
        PortInfo::new("Keys", 0, Direction::Readable)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (_driver, mut handle) = setup();
        assert_eq!(handle.state(), PortState::Created);

        handle.open(&keys()).unwrap();
        assert_eq!(handle.state(), PortState::Open);
        assert!(handle.is_open());

        handle.close().unwrap();
        assert_eq!(handle.state(), PortState::Closed);

        handle.open_virtual("Virtual Keys").unwrap();
        assert!(handle.is_virtual());

        handle.close().unwrap();
        handle.close().unwrap();
        assert_eq!(handle.state(), PortState::Closed);

        handle.destroy().unwrap();
        assert!(handle.is_destroyed());
    }

    #[test]
    fn test_open_twice_is_invalid() {
        let (_driver, mut handle) = setup();
        handle.open(&keys()).unwrap();
        let err = handle.open(&keys()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: PortState::Open,
                ..
            }
        ));
    }

    #[test]
    fn test_operations_after_destroy_are_rejected() {
        let (driver, mut handle) = setup();
        handle.destroy().unwrap();
        let calls_before = driver.calls().len();

        assert!(matches!(handle.open(&keys()), Err(Error::InvalidState { .. })));
        assert!(matches!(handle.open_virtual("v"), Err(Error::InvalidState { .. })));
        assert!(matches!(handle.close(), Err(Error::InvalidState { .. })));
        assert!(matches!(handle.api(), Err(Error::InvalidState { .. })));
        assert!(matches!(handle.destroy(), Err(Error::AlreadyDestroyed)));

        assert_eq!(
            driver.calls().len(),
            calls_before,
            "no native call after destroy"
        );
    }

    #[test]
    fn test_destroy_closes_open_handle_once() {
        let (driver, mut handle) = setup();
        handle.open(&keys()).unwrap();
        handle.destroy().unwrap();

        let closes = driver.count_calls(|c| matches!(c, DriverCall::ClosePort(_)));
        let frees = driver.count_calls(|c| matches!(c, DriverCall::Free(_)));
        assert_eq!(closes, 1);
        assert_eq!(frees, 1);
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn test_drop_releases_handle() {
        let (driver, mut handle) = setup();
        handle.open(&keys()).unwrap();
        assert_eq!(driver.live_handles(), 1);
        drop(handle);
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn test_drop_after_destroy_does_not_free_again() {
        let (driver, mut handle) = setup();
        handle.destroy().unwrap();
        drop(handle);
        let frees = driver.count_calls(|c| matches!(c, DriverCall::Free(_)));
        assert_eq!(frees, 1);
    }

    #[test]
    fn test_open_failure_is_port_unavailable() {
        let (driver, mut handle) = setup();
        driver.set_port_busy(Direction::Readable, 0, true);
        assert!(matches!(handle.open(&keys()), Err(Error::PortUnavailable(_))));
        assert_eq!(handle.state(), PortState::Created);

        let missing = PortInfo::new("Gone", 7, Direction::Readable);
        assert!(matches!(handle.open(&missing), Err(Error::PortUnavailable(_))));
    }

    #[test]
    fn test_direction_mismatch() {
        let (_driver, mut handle) = setup();
        let out = PortInfo::new("Keys", 0, Direction::Writable);
        assert!(matches!(
            handle.open(&out),
            Err(Error::DirectionMismatch {
                expected: Direction::Readable,
                actual: Direction::Writable
            })
        ));
    }

    #[test]
    fn test_allocation_failure() {
        let driver = Arc::new(MemoryDriver::new());
        driver.fail_next_allocation();
        let err = PortHandle::create(driver, Direction::Writable, &HandleOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NativeAllocation {
                direction: Direction::Writable,
                ..
            }
        ));
    }

    #[test]
    fn test_virtual_ports_unsupported() {
        let driver = Arc::new(MemoryDriver::new());
        driver.set_virtual_ports_supported(false);
        let mut handle =
            PortHandle::create(driver, Direction::Readable, &HandleOptions::default()).unwrap();
        assert!(!handle.supports_virtual_ports());
        assert!(matches!(
            handle.open_virtual("v"),
            Err(Error::UnsupportedOperation(_))
        ));
        assert_eq!(handle.state(), PortState::Created);
    }

    #[test]
    fn test_virtual_ports_disallowed_by_options() {
        let driver = Arc::new(MemoryDriver::new());
        let options = HandleOptions {
            disallow_virtual_ports: true,
            ..Default::default()
        };
        let mut handle = PortHandle::create(driver, Direction::Writable, &options).unwrap();
        assert!(matches!(
            handle.open_virtual("v"),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_create_with_options_uses_explicit_allocation() {
        let driver = Arc::new(MemoryDriver::new());
        let options = HandleOptions {
            client_name: Some("Sequencer".to_string()),
            ..Default::default()
        };
        let handle = PortHandle::create(driver.clone(), Direction::Readable, &options).unwrap();
        assert_eq!(handle.api().unwrap(), Api::Dummy);
        assert!(driver.calls().iter().any(|c| matches!(
            c,
            DriverCall::Create { client_name, queue_size_limit: DEFAULT_QUEUE_SIZE_LIMIT, .. }
                if client_name == "Sequencer"
        )));
    }
}
