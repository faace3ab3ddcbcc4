//! The native driver seam.
//!
//! Everything the port layer needs from a MIDI backend goes through [`Driver`]:
//! handle allocation, enumeration, binding, the delivery trampoline, and writes.
//! Two backends ship with the crate:
//!
//! - [`MidirDriver`]: real devices via midir (feature `midi-io`)
//! - [`MemoryDriver`]: in-memory ports with injectable input, reports [`Api::Dummy`]

mod memory;
#[cfg(feature = "midi-io")]
mod midir_backend;

pub use memory::{DriverCall, MemoryDriver};
#[cfg(feature = "midi-io")]
pub(crate) use midir_backend::platform_api;
#[cfg(feature = "midi-io")]
pub use midir_backend::MidirDriver;

use crate::api::Api;
use crate::port::Direction;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ffi::c_void;
use std::fmt;

/// Default size of a driver's input polling queue.
pub const DEFAULT_QUEUE_SIZE_LIMIT: usize = 100;

/// Client name used when a caller picks an API but no name.
pub const DEFAULT_CLIENT_NAME: &str = "rtport";

/// Failure reported by a backend. The port layer maps it onto [`crate::Error`]
/// depending on which operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<DriverError> for crate::Error {
    fn from(e: DriverError) -> Self {
        crate::Error::Driver(e.0)
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Entry of a backend's input polling queue.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub timestamp: f64,
    pub bytes: SmallVec<[u8; 4]>,
}

impl QueuedMessage {
    pub fn new(timestamp: f64, bytes: &[u8]) -> Self {
        Self {
            timestamp,
            bytes: SmallVec::from_slice(bytes),
        }
    }

    /// Move into a caller buffer, returning the timestamp.
    pub fn write_into(self, buffer: &mut Vec<u8>) -> f64 {
        buffer.clear();
        buffer.extend_from_slice(&self.bytes);
        self.timestamp
    }
}

/// Opaque identity of one native handle, issued by the driver that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    #[inline]
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Signature a driver calls for every incoming message.
///
/// Must not unwind: a panic escaping an `extern "C"` function aborts the process.
pub type RawCallback =
    unsafe extern "C" fn(timestamp: f64, message: *const u8, len: usize, user_data: *mut c_void);

/// A delivery entry point plus the context pointer handed back on every call.
#[derive(Clone, Copy)]
pub struct Trampoline {
    callback: RawCallback,
    user_data: *mut c_void,
}

// SAFETY: `user_data` is only dereferenced by `callback`, whose owner guarantees it
// stays valid and thread-safe until the driver's `cancel_callback` returns.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// # Safety
    /// `user_data` must remain valid, and safe to use from the driver's delivery
    /// thread, until `cancel_callback` (or `free`) has returned for the handle this
    /// trampoline is installed on.
    pub unsafe fn new(callback: RawCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data,
        }
    }

    #[inline]
    pub fn invoke(&self, timestamp: f64, message: &[u8]) {
        // SAFETY: pointer/length come from a live slice; `user_data` validity is
        // the contract of `Trampoline::new`.
        unsafe {
            (self.callback)(timestamp, message.as_ptr(), message.len(), self.user_data);
        }
    }

    /// # Safety
    /// `message` must be null or valid for reads of `len` bytes.
    #[inline]
    pub unsafe fn invoke_raw(&self, timestamp: f64, message: *const u8, len: usize) {
        (self.callback)(timestamp, message, len, self.user_data);
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("user_data", &self.user_data)
            .finish()
    }
}

/// Message classes an input handle drops before delivery. All set by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IgnoreFlags {
    pub sysex: bool,
    /// MIDI time code (`0xF1`) and timing clock (`0xF8`).
    pub time: bool,
    pub active_sensing: bool,
}

impl IgnoreFlags {
    pub const NONE: IgnoreFlags = IgnoreFlags {
        sysex: false,
        time: false,
        active_sensing: false,
    };

    pub fn new(sysex: bool, time: bool, active_sensing: bool) -> Self {
        Self {
            sysex,
            time,
            active_sensing,
        }
    }

    /// Whether a message starting with `status` is filtered out.
    #[inline]
    pub fn should_ignore(&self, status: u8) -> bool {
        match status {
            0xF0 => self.sysex,
            0xF1 | 0xF8 => self.time,
            0xFE => self.active_sensing,
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn to_bits(self) -> u8 {
        (self.sysex as u8) | ((self.time as u8) << 1) | ((self.active_sensing as u8) << 2)
    }

    #[inline]
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            sysex: bits & 0b001 != 0,
            time: bits & 0b010 != 0,
            active_sensing: bits & 0b100 != 0,
        }
    }
}

impl Default for IgnoreFlags {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

/// The fixed capability set of a native MIDI backend.
///
/// # Safety
/// Once `cancel_callback` or `free` returns for a handle, no trampoline invocation
/// for it may still be running and none may start. Ports free the memory behind
/// the trampoline's `user_data` right after.
pub unsafe trait Driver: Send + Sync {
    /// Handle with the backend's default API and client name.
    fn create_default(&self, direction: Direction) -> DriverResult<RawHandle>;

    fn create(
        &self,
        direction: Direction,
        api: Api,
        client_name: &str,
        queue_size_limit: usize,
    ) -> DriverResult<RawHandle>;

    /// Release a handle, closing it first if needed.
    fn free(&self, handle: RawHandle) -> DriverResult<()>;

    fn open_port(&self, handle: RawHandle, index: usize, name: &str) -> DriverResult<()>;

    fn open_virtual_port(&self, handle: RawHandle, name: &str) -> DriverResult<()>;

    fn close_port(&self, handle: RawHandle) -> DriverResult<()>;

    fn current_api(&self, handle: RawHandle) -> DriverResult<Api>;

    /// Number of ports visible to `handle`; negative on failure.
    fn port_count(&self, handle: RawHandle) -> i32;

    fn port_name(&self, handle: RawHandle, index: usize) -> DriverResult<String>;

    fn set_callback(&self, handle: RawHandle, trampoline: Trampoline) -> DriverResult<()>;

    fn cancel_callback(&self, handle: RawHandle) -> DriverResult<()>;

    /// Write one message. Non-negative on success, negative on failure.
    fn send_message(&self, handle: RawHandle, message: &[u8]) -> i32;

    fn compiled_apis(&self) -> Vec<Api>;

    fn ignore_types(&self, handle: RawHandle, flags: IgnoreFlags) -> DriverResult<()>;

    /// Pop the oldest queued input message into `buffer`, returning its timestamp.
    /// `Ok(None)` when the queue is empty.
    fn get_message(&self, handle: RawHandle, buffer: &mut Vec<u8>) -> DriverResult<Option<f64>>;

    /// Messages dropped so far because the input queue of `handle` was full.
    fn queue_overflows(&self, handle: RawHandle) -> DriverResult<u64>;

    fn supports_virtual_ports(&self) -> bool;
}
