//! Real-time-safe adapter between a driver's delivery thread and one application
//! callback.
//!
//! - Steady state allocates nothing: the message buffer only grows, and only when a
//!   longer message than ever before arrives.
//! - The handler and buffer sit behind one lock. The delivery path only `try_lock`s
//!   it, so the driver thread never blocks; a delivery that lands while the
//!   application is swapping the handler is dropped and counted.
//! - Nothing unwinds back into the driver: handler panics are caught and counted.

use super::handle::PortHandle;
use crate::driver::Trampoline;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rtport_midi::{normalize_status, MidiMessage};
use serde::Serialize;
use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Buffer length reserved on registration; covers every channel-voice message.
pub(crate) const INITIAL_BUFFER_LEN: usize = 3;

type RawFn = dyn FnMut(&[u8], f64) + Send;
type MessageFn = dyn FnMut(&MidiMessage<'_>) + Send;

/// An application callback for a readable port.
///
/// Runs on the driver's thread. Anything it borrows (the byte slice, the
/// message) is only valid until it returns.
pub enum Handler {
    /// `(bytes, seconds since the previous message)`, status byte normalized.
    Raw(Box<RawFn>),
    /// Structured view of the normalized message.
    Message(Box<MessageFn>),
}

impl Handler {
    pub fn raw<F>(f: F) -> Self
    where
        F: FnMut(&[u8], f64) + Send + 'static,
    {
        Handler::Raw(Box::new(f))
    }

    pub fn message<F>(f: F) -> Self
    where
        F: FnMut(&MidiMessage<'_>) + Send + 'static,
    {
        Handler::Message(Box::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Raw(_) => f.write_str("Handler::Raw"),
            Handler::Message(_) => f.write_str("Handler::Message"),
        }
    }
}

/// Aggregate delivery counters. Deliveries have no per-message error channel, so
/// anomalies only show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Messages handed to the handler.
    pub delivered: u64,
    /// Null or empty deliveries from the driver.
    pub malformed: u64,
    /// Dropped because the handler was being replaced at that moment.
    pub contended: u64,
    /// Arrived while no handler was registered.
    pub unhandled: u64,
    pub handler_panics: u64,
    pub buffer_growths: u64,
    /// Dropped by the driver because the polling queue was full.
    pub queue_overflows: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    malformed: AtomicU64,
    contended: AtomicU64,
    unhandled: AtomicU64,
    handler_panics: AtomicU64,
    buffer_growths: AtomicU64,
}

struct Slot {
    handler: Option<Handler>,
    buffer: Vec<u8>,
}

struct BridgeShared {
    slot: Mutex<Slot>,
    counters: Counters,
}

impl BridgeShared {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn deliver(&self, timestamp: f64, bytes: &[u8]) {
        let Some(mut slot) = self.slot.try_lock() else {
            Self::bump(&self.counters.contended);
            return;
        };
        let Slot { handler, buffer } = &mut *slot;
        let Some(handler) = handler.as_mut() else {
            Self::bump(&self.counters.unhandled);
            return;
        };

        if buffer.len() < bytes.len() {
            // The one allocation on this path; converges to zero.
            buffer.resize(bytes.len(), 0);
            Self::bump(&self.counters.buffer_growths);
        }
        let view = &mut buffer[..bytes.len()];
        view.copy_from_slice(bytes);
        let raw_status = view[0];
        view[0] = normalize_status(raw_status);
        let view: &[u8] = view;

        let outcome = catch_unwind(AssertUnwindSafe(|| match handler {
            Handler::Raw(f) => f(view, timestamp),
            Handler::Message(f) => f(&MidiMessage::decode(raw_status, view, timestamp)),
        }));
        match outcome {
            Ok(()) => Self::bump(&self.counters.delivered),
            Err(_) => Self::bump(&self.counters.handler_panics),
        }
    }
}

/// Entry point registered with the driver.
unsafe extern "C" fn bridge_trampoline(
    timestamp: f64,
    message: *const u8,
    len: usize,
    user_data: *mut c_void,
) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` is the `BridgeShared` owned by the installing bridge,
    // which outlives the installation (see `CallbackBridge::uninstall`).
    let shared = unsafe { &*(user_data as *const BridgeShared) };
    if message.is_null() || len == 0 {
        BridgeShared::bump(&shared.counters.malformed);
        return;
    }
    // SAFETY: the driver hands us `len` readable bytes for the duration of the call.
    let bytes = unsafe { std::slice::from_raw_parts(message, len) };
    shared.deliver(timestamp, bytes);
}

pub(crate) struct CallbackBridge {
    // Boxed so the address given to the driver stays put when the port moves.
    shared: Box<BridgeShared>,
    installed: bool,
}

impl CallbackBridge {
    pub(crate) fn new() -> Self {
        Self {
            shared: Box::new(BridgeShared {
                slot: Mutex::new(Slot {
                    handler: None,
                    buffer: Vec::new(),
                }),
                counters: Counters::default(),
            }),
            installed: false,
        }
    }

    #[inline]
    pub(crate) fn is_installed(&self) -> bool {
        self.installed
    }

    pub(crate) fn trampoline(&self) -> Trampoline {
        let user_data = &*self.shared as *const BridgeShared as *mut c_void;
        // SAFETY: `shared` lives as long as `self`, and the owning port cancels
        // or frees the native handle before dropping the bridge.
        unsafe { Trampoline::new(bridge_trampoline, user_data) }
    }

    pub(crate) fn install(&mut self, handle: &PortHandle, handler: Handler) -> Result<()> {
        let raw = handle.live("set a callback on")?;
        if self.installed {
            return Err(Error::CallbackAlreadyRegistered);
        }

        {
            let mut slot = self.shared.slot.lock();
            if slot.buffer.len() < INITIAL_BUFFER_LEN {
                slot.buffer.resize(INITIAL_BUFFER_LEN, 0);
            }
            slot.handler = Some(handler);
        }

        if let Err(e) = handle.driver().set_callback(raw, self.trampoline()) {
            self.shared.slot.lock().handler = None;
            return Err(e.into());
        }
        self.installed = true;
        debug!("Installed MIDI input callback on handle {}", raw);
        Ok(())
    }

    /// Driver side first, then the handler: once the driver has cancelled, no
    /// delivery can observe the cleared slot half-way.
    pub(crate) fn uninstall(&mut self, handle: &PortHandle) -> Result<()> {
        let raw = handle.live("remove the callback of")?;
        if !self.installed {
            return Ok(());
        }
        handle.driver().cancel_callback(raw)?;
        self.installed = false;
        self.clear();
        debug!("Removed MIDI input callback from handle {}", raw);
        Ok(())
    }

    /// Drop handler and buffer after the driver released the native handle.
    pub(crate) fn detach(&mut self) {
        self.installed = false;
        self.clear();
    }

    fn clear(&mut self) {
        let mut slot = self.shared.slot.lock();
        slot.handler = None;
        slot.buffer = Vec::new();
    }

    #[cfg(test)]
    fn buffer_len(&self) -> usize {
        self.shared.slot.lock().buffer.len()
    }

    pub(crate) fn stats(&self) -> DeliveryStats {
        let c = &self.shared.counters;
        DeliveryStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            contended: c.contended.load(Ordering::Relaxed),
            unhandled: c.unhandled.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
            buffer_growths: c.buffer_growths.load(Ordering::Relaxed),
            queue_overflows: 0,
        }
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge")
            .field("installed", &self.installed)
            .field("stats", &self.stats())
            .finish()
    }
}
