//! In-memory MIDI backend.
//!
//! Ports are declared programmatically, input is injected from any thread with
//! [`MemoryDriver::inject`], and everything the port layer asks of the driver is
//! recorded in a call log. Reports [`Api::Dummy`].

use super::{
    Driver, DriverError, DriverResult, IgnoreFlags, QueuedMessage, RawHandle, Trampoline,
    DEFAULT_QUEUE_SIZE_LIMIT,
};
use crate::api::Api;
use crate::port::Direction;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use ringbuf::{
    traits::{Consumer, Producer},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreateDefault(Direction),
    Create {
        direction: Direction,
        api: Api,
        client_name: String,
        queue_size_limit: usize,
    },
    Free(RawHandle),
    OpenPort {
        handle: RawHandle,
        index: usize,
        name: String,
    },
    OpenVirtualPort {
        handle: RawHandle,
        name: String,
    },
    ClosePort(RawHandle),
    CurrentApi(RawHandle),
    PortCount(RawHandle),
    PortName {
        handle: RawHandle,
        index: usize,
    },
    SetCallback(RawHandle),
    CancelCallback(RawHandle),
    SendMessage {
        handle: RawHandle,
        len: usize,
    },
    IgnoreTypes {
        handle: RawHandle,
        flags: IgnoreFlags,
    },
    GetMessage(RawHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Unbound,
    Port(usize),
    Virtual(String),
}

/// Delivery state shared between an endpoint and injecting threads.
struct InputSlot {
    trampoline: Mutex<Option<Trampoline>>,
    queue: Mutex<HeapRb<QueuedMessage>>,
    ignore: AtomicU8,
    overflows: AtomicU64,
}

impl InputSlot {
    fn new(queue_size_limit: usize) -> Self {
        Self {
            trampoline: Mutex::new(None),
            queue: Mutex::new(HeapRb::new(queue_size_limit.max(1))),
            ignore: AtomicU8::new(IgnoreFlags::default().to_bits()),
            overflows: AtomicU64::new(0),
        }
    }

    /// Returns true if the message was delivered or queued.
    fn deliver(&self, timestamp: f64, message: &[u8]) -> bool {
        let Some(&status) = message.first() else {
            return false;
        };
        if IgnoreFlags::from_bits(self.ignore.load(Ordering::Acquire)).should_ignore(status) {
            return false;
        }

        // Held across the invocation: cancel/free wait for it.
        let trampoline = self.trampoline.lock();
        match trampoline.as_ref() {
            Some(t) => {
                t.invoke(timestamp, message);
                true
            }
            None => {
                let queued = QueuedMessage::new(timestamp, message);
                let pushed = self.queue.lock().try_push(queued).is_ok();
                if !pushed {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                }
                pushed
            }
        }
    }
}

struct Endpoint {
    direction: Direction,
    binding: Binding,
    input: Arc<InputSlot>,
}

#[derive(Debug, Clone)]
struct MemoryPort {
    name: String,
    busy: bool,
}

#[derive(Default)]
struct PortTable {
    readable: Vec<MemoryPort>,
    writable: Vec<MemoryPort>,
}

impl PortTable {
    fn list(&self, direction: Direction) -> &Vec<MemoryPort> {
        match direction {
            Direction::Readable => &self.readable,
            Direction::Writable => &self.writable,
        }
    }

    fn list_mut(&mut self, direction: Direction) -> &mut Vec<MemoryPort> {
        match direction {
            Direction::Readable => &mut self.readable,
            Direction::Writable => &mut self.writable,
        }
    }
}

pub struct MemoryDriver {
    next_id: AtomicU64,
    endpoints: DashMap<u64, Endpoint>,
    ports: RwLock<PortTable>,
    calls: Mutex<Vec<DriverCall>>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_next_allocation: AtomicBool,
    port_count_override: Mutex<Option<i32>>,
    virtual_ports: AtomicBool,
    send_status: AtomicI32,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            endpoints: DashMap::new(),
            ports: RwLock::new(PortTable::default()),
            calls: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            fail_next_allocation: AtomicBool::new(false),
            port_count_override: Mutex::new(None),
            virtual_ports: AtomicBool::new(true),
            send_status: AtomicI32::new(0),
        }
    }

    // ==================== Setup ====================

    /// Append a port to the enumeration, returning its index.
    pub fn add_port(&self, direction: Direction, name: impl Into<String>) -> usize {
        let mut ports = self.ports.write();
        let list = ports.list_mut(direction);
        list.push(MemoryPort {
            name: name.into(),
            busy: false,
        });
        list.len() - 1
    }

    /// Remove a port (simulated unplug). Later ports shift down one index.
    pub fn remove_port(&self, direction: Direction, index: usize) -> bool {
        let mut ports = self.ports.write();
        let list = ports.list_mut(direction);
        if index < list.len() {
            list.remove(index);
            true
        } else {
            false
        }
    }

    /// A busy port refuses `open_port`.
    pub fn set_port_busy(&self, direction: Direction, index: usize, busy: bool) {
        if let Some(port) = self.ports.write().list_mut(direction).get_mut(index) {
            port.busy = busy;
        }
    }

    pub fn fail_next_allocation(&self) {
        self.fail_next_allocation.store(true, Ordering::SeqCst);
    }

    /// Force `port_count` to report this value (e.g. a negative error code).
    pub fn set_port_count_override(&self, count: Option<i32>) {
        *self.port_count_override.lock() = count;
    }

    pub fn set_virtual_ports_supported(&self, supported: bool) {
        self.virtual_ports.store(supported, Ordering::SeqCst);
    }

    /// Status returned by subsequent successful-path sends.
    pub fn set_send_status(&self, status: i32) {
        self.send_status.store(status, Ordering::SeqCst);
    }

    // ==================== Input injection ====================

    /// Deliver `message` to every readable handle opened on port `index`, on the
    /// calling thread. Returns how many handles received or queued it.
    pub fn inject(&self, index: usize, timestamp: f64, message: &[u8]) -> usize {
        let on_port = |binding: &Binding| *binding == Binding::Port(index);
        self.inject_where(on_port, timestamp, message)
    }

    /// Deliver to readable handles opened as virtual port `name`.
    pub fn inject_virtual(&self, name: &str, timestamp: f64, message: &[u8]) -> usize {
        let on_virtual = |binding: &Binding| matches!(binding, Binding::Virtual(n) if n == name);
        self.inject_where(on_virtual, timestamp, message)
    }

    fn inject_where(
        &self,
        matches: impl Fn(&Binding) -> bool,
        timestamp: f64,
        message: &[u8],
    ) -> usize {
        // Collected first: no map guard may be held while a trampoline runs.
        let targets: Vec<Arc<InputSlot>> = self
            .endpoints
            .iter()
            .filter(|e| e.direction == Direction::Readable && matches(&e.binding))
            .map(|e| Arc::clone(&e.input))
            .collect();

        targets
            .iter()
            .filter(|slot| slot.deliver(timestamp, message))
            .count()
    }

    // ==================== Inspection ====================

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Every message accepted by `send_message`, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn live_handles(&self) -> usize {
        self.endpoints.len()
    }

    pub fn has_callback(&self, handle: RawHandle) -> bool {
        self.endpoints
            .get(&handle.as_raw())
            .map(|e| Arc::clone(&e.input))
            .is_some_and(|slot| slot.trampoline.lock().is_some())
    }

    // ==================== Internals ====================

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    fn allocate(&self, direction: Direction, queue_size_limit: usize) -> DriverResult<RawHandle> {
        if self.fail_next_allocation.swap(false, Ordering::SeqCst) {
            return Err(DriverError::new("out of MIDI client handles"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.endpoints.insert(
            id,
            Endpoint {
                direction,
                binding: Binding::Unbound,
                input: Arc::new(InputSlot::new(queue_size_limit)),
            },
        );
        Ok(RawHandle::from_raw(id))
    }

    fn unknown(handle: RawHandle) -> DriverError {
        DriverError::new(format!("unknown handle {}", handle))
    }

    fn input_slot(&self, handle: RawHandle) -> DriverResult<Arc<InputSlot>> {
        let endpoint = self
            .endpoints
            .get(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        if endpoint.direction != Direction::Readable {
            return Err(DriverError::new("not an input handle"));
        }
        Ok(Arc::clone(&endpoint.input))
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `cancel_callback` and `free` take the trampoline under the lock every
// delivery holds while invoking it.
unsafe impl Driver for MemoryDriver {
    fn create_default(&self, direction: Direction) -> DriverResult<RawHandle> {
        self.record(DriverCall::CreateDefault(direction));
        self.allocate(direction, DEFAULT_QUEUE_SIZE_LIMIT)
    }

    fn create(
        &self,
        direction: Direction,
        api: Api,
        client_name: &str,
        queue_size_limit: usize,
    ) -> DriverResult<RawHandle> {
        self.record(DriverCall::Create {
            direction,
            api,
            client_name: client_name.to_string(),
            queue_size_limit,
        });
        if !matches!(api, Api::Unspecified | Api::Dummy) {
            return Err(DriverError::new(format!("{} is not compiled in", api)));
        }
        self.allocate(direction, queue_size_limit)
    }

    fn free(&self, handle: RawHandle) -> DriverResult<()> {
        self.record(DriverCall::Free(handle));
        let (_, endpoint) = self
            .endpoints
            .remove(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        // Waits for an in-flight delivery.
        endpoint.input.trampoline.lock().take();
        Ok(())
    }

    fn open_port(&self, handle: RawHandle, index: usize, name: &str) -> DriverResult<()> {
        self.record(DriverCall::OpenPort {
            handle,
            index,
            name: name.to_string(),
        });
        let mut endpoint = self
            .endpoints
            .get_mut(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        let ports = self.ports.read();
        match ports.list(endpoint.direction).get(index) {
            None => Err(DriverError::new(format!("no port at index {}", index))),
            Some(port) if port.busy => Err(DriverError::new(format!("'{}' is in use", port.name))),
            Some(_) => {
                endpoint.binding = Binding::Port(index);
                Ok(())
            }
        }
    }

    fn open_virtual_port(&self, handle: RawHandle, name: &str) -> DriverResult<()> {
        self.record(DriverCall::OpenVirtualPort {
            handle,
            name: name.to_string(),
        });
        if !self.supports_virtual_ports() {
            return Err(DriverError::new("virtual ports are not supported"));
        }
        let mut endpoint = self
            .endpoints
            .get_mut(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        endpoint.binding = Binding::Virtual(name.to_string());
        Ok(())
    }

    fn close_port(&self, handle: RawHandle) -> DriverResult<()> {
        self.record(DriverCall::ClosePort(handle));
        let mut endpoint = self
            .endpoints
            .get_mut(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        endpoint.binding = Binding::Unbound;
        Ok(())
    }

    fn current_api(&self, handle: RawHandle) -> DriverResult<Api> {
        self.record(DriverCall::CurrentApi(handle));
        if self.endpoints.contains_key(&handle.as_raw()) {
            Ok(Api::Dummy)
        } else {
            Err(Self::unknown(handle))
        }
    }

    fn port_count(&self, handle: RawHandle) -> i32 {
        self.record(DriverCall::PortCount(handle));
        if let Some(count) = *self.port_count_override.lock() {
            return count;
        }
        match self.endpoints.get(&handle.as_raw()) {
            Some(endpoint) => self.ports.read().list(endpoint.direction).len() as i32,
            None => -1,
        }
    }

    fn port_name(&self, handle: RawHandle, index: usize) -> DriverResult<String> {
        self.record(DriverCall::PortName { handle, index });
        let direction = self
            .endpoints
            .get(&handle.as_raw())
            .map(|e| e.direction)
            .ok_or_else(|| Self::unknown(handle))?;
        self.ports
            .read()
            .list(direction)
            .get(index)
            .map(|p| p.name.clone())
            .ok_or_else(|| DriverError::new(format!("no port at index {}", index)))
    }

    fn set_callback(&self, handle: RawHandle, trampoline: Trampoline) -> DriverResult<()> {
        self.record(DriverCall::SetCallback(handle));
        let slot = self.input_slot(handle)?;
        let mut current = slot.trampoline.lock();
        if current.is_some() {
            return Err(DriverError::new("a callback is already set"));
        }
        *current = Some(trampoline);
        Ok(())
    }

    fn cancel_callback(&self, handle: RawHandle) -> DriverResult<()> {
        self.record(DriverCall::CancelCallback(handle));
        self.input_slot(handle)?.trampoline.lock().take();
        Ok(())
    }

    fn send_message(&self, handle: RawHandle, message: &[u8]) -> i32 {
        self.record(DriverCall::SendMessage {
            handle,
            len: message.len(),
        });
        let bound = self
            .endpoints
            .get(&handle.as_raw())
            .is_some_and(|e| e.direction == Direction::Writable && e.binding != Binding::Unbound);
        if !bound || message.is_empty() {
            return -1;
        }
        let status = self.send_status.load(Ordering::SeqCst);
        if status >= 0 {
            self.written.lock().push(message.to_vec());
        }
        status
    }

    fn compiled_apis(&self) -> Vec<Api> {
        vec![Api::Dummy]
    }

    fn ignore_types(&self, handle: RawHandle, flags: IgnoreFlags) -> DriverResult<()> {
        self.record(DriverCall::IgnoreTypes { handle, flags });
        self.input_slot(handle)?
            .ignore
            .store(flags.to_bits(), Ordering::Release);
        Ok(())
    }

    fn get_message(&self, handle: RawHandle, buffer: &mut Vec<u8>) -> DriverResult<Option<f64>> {
        self.record(DriverCall::GetMessage(handle));
        let slot = self.input_slot(handle)?;
        let popped = slot.queue.lock().try_pop();
        Ok(popped.map(|m| m.write_into(buffer)))
    }

    fn queue_overflows(&self, handle: RawHandle) -> DriverResult<u64> {
        Ok(self.input_slot(handle)?.overflows.load(Ordering::Relaxed))
    }

    fn supports_virtual_ports(&self) -> bool {
        self.virtual_ports.load(Ordering::SeqCst)
    }
}
