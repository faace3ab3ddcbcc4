//! Hardware MIDI through midir.
//!
//! Each handle owns either an idle midir client or a live connection. Input
//! connections run a closure on midir's thread that applies the ignore filter,
//! converts midir's microsecond stamps to seconds since the previous message, and
//! either invokes the installed trampoline or queues for polling.

use super::{Driver, DriverError, DriverResult, IgnoreFlags, QueuedMessage, RawHandle, Trampoline};
use crate::api::Api;
use crate::port::Direction;
use dashmap::DashMap;
use midir::{MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Producer},
    HeapRb,
};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The API midir was built against on this target.
pub(crate) fn platform_api() -> Api {
    if cfg!(feature = "jack") {
        Api::UnixJack
    } else if cfg!(target_os = "linux") {
        Api::LinuxAlsa
    } else if cfg!(target_os = "macos") {
        Api::MacosxCore
    } else if cfg!(target_os = "windows") {
        Api::WindowsMm
    } else {
        Api::Dummy
    }
}

struct InputShared {
    trampoline: Mutex<Option<Trampoline>>,
    queue: Mutex<HeapRb<QueuedMessage>>,
    ignore: AtomicU8,
    overflows: AtomicU64,
}

impl InputShared {
    fn new(queue_size_limit: usize) -> Self {
        Self {
            trampoline: Mutex::new(None),
            queue: Mutex::new(HeapRb::new(queue_size_limit.max(1))),
            ignore: AtomicU8::new(IgnoreFlags::default().to_bits()),
            overflows: AtomicU64::new(0),
        }
    }

    fn on_message(&self, stamp_us: u64, last_stamp: &mut Option<u64>, message: &[u8]) {
        let Some(&status) = message.first() else {
            return;
        };
        if IgnoreFlags::from_bits(self.ignore.load(Ordering::Acquire)).should_ignore(status) {
            return;
        }
        let delta = match last_stamp.replace(stamp_us) {
            Some(prev) => stamp_us.saturating_sub(prev) as f64 * 1e-6,
            None => 0.0,
        };

        // Held across the invocation: cancel/free wait for it.
        let trampoline = self.trampoline.lock();
        match trampoline.as_ref() {
            Some(t) => t.invoke(delta, message),
            None => {
                // Full queue drops the newest message.
                let queued = QueuedMessage::new(delta, message);
                if self.queue.lock().try_push(queued).is_err() {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

type InputConnection = MidiInputConnection<Option<u64>>;

enum Endpoint {
    Input {
        client: Option<MidiInput>,
        /// Enumerates while `client` is consumed by the connection.
        scanner: Option<MidiInput>,
        connection: Option<InputConnection>,
        shared: Arc<InputShared>,
        client_name: String,
    },
    Output {
        client: Option<MidiOutput>,
        scanner: Option<MidiOutput>,
        connection: Option<MidiOutputConnection>,
        client_name: String,
    },
}

impl Endpoint {
    fn close(&mut self) {
        match self {
            Endpoint::Input {
                client,
                scanner,
                connection,
                ..
            } => {
                if let Some(conn) = connection.take() {
                    let (input, _) = conn.close();
                    *client = Some(input);
                }
                *scanner = None;
            }
            Endpoint::Output {
                client,
                scanner,
                connection,
                ..
            } => {
                if let Some(conn) = connection.take() {
                    *client = Some(conn.close());
                }
                *scanner = None;
            }
        }
    }

    fn port_count(&mut self) -> DriverResult<usize> {
        match self {
            Endpoint::Input {
                client,
                scanner,
                client_name,
                ..
            } => {
                let io = enumerator(client, scanner, || MidiInput::new(client_name))?;
                Ok(io.port_count())
            }
            Endpoint::Output {
                client,
                scanner,
                client_name,
                ..
            } => {
                let io = enumerator(client, scanner, || MidiOutput::new(client_name))?;
                Ok(io.port_count())
            }
        }
    }

    fn port_name(&mut self, index: usize) -> DriverResult<String> {
        match self {
            Endpoint::Input {
                client,
                scanner,
                client_name,
                ..
            } => {
                let io = enumerator(client, scanner, || MidiInput::new(client_name))?;
                name_at(io, index)
            }
            Endpoint::Output {
                client,
                scanner,
                client_name,
                ..
            } => {
                let io = enumerator(client, scanner, || MidiOutput::new(client_name))?;
                name_at(io, index)
            }
        }
    }
}

/// The idle client, or a scanner client created once and kept while connected.
fn enumerator<'a, T: MidiIO>(
    client: &'a Option<T>,
    scanner: &'a mut Option<T>,
    make: impl FnOnce() -> Result<T, midir::InitError>,
) -> DriverResult<&'a T> {
    if let Some(c) = client {
        return Ok(c);
    }
    if scanner.is_none() {
        *scanner = Some(make().map_err(|e| DriverError::new(e.to_string()))?);
    }
    scanner
        .as_ref()
        .ok_or_else(|| DriverError::new("no client to enumerate with"))
}

fn name_at<T: MidiIO>(io: &T, index: usize) -> DriverResult<String> {
    let ports = io.ports();
    let port = ports
        .get(index)
        .ok_or_else(|| DriverError::new(format!("no port at index {}", index)))?;
    match io.port_name(port) {
        Ok(name) => Ok(name),
        Err(_) => Ok(format!("Unknown Device {}", index)),
    }
}

/// Driver over the platform's native MIDI API.
pub struct MidirDriver {
    next_id: AtomicU64,
    endpoints: DashMap<u64, Mutex<Endpoint>>,
    client_name: String,
    queue_size_limit: usize,
}

impl MidirDriver {
    pub fn new() -> Self {
        Self::with_defaults(super::DEFAULT_CLIENT_NAME, super::DEFAULT_QUEUE_SIZE_LIMIT)
    }

    /// Client name and queue size used by `create_default`.
    pub fn with_defaults(client_name: impl Into<String>, queue_size_limit: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            endpoints: DashMap::new(),
            client_name: client_name.into(),
            queue_size_limit,
        }
    }

    fn unknown(handle: RawHandle) -> DriverError {
        DriverError::new(format!("unknown handle {}", handle))
    }

    fn with_endpoint<R>(
        &self,
        handle: RawHandle,
        f: impl FnOnce(&mut Endpoint) -> DriverResult<R>,
    ) -> DriverResult<R> {
        let entry = self
            .endpoints
            .get(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        let mut endpoint = entry.lock();
        f(&mut endpoint)
    }

    fn input_shared(&self, handle: RawHandle) -> DriverResult<Arc<InputShared>> {
        self.with_endpoint(handle, |endpoint| match endpoint {
            Endpoint::Input { shared, .. } => Ok(Arc::clone(shared)),
            Endpoint::Output { .. } => Err(DriverError::new("not an input handle")),
        })
    }

    fn allocate(
        &self,
        direction: Direction,
        client_name: &str,
        queue_size_limit: usize,
    ) -> DriverResult<RawHandle> {
        let endpoint = match direction {
            Direction::Readable => {
                let mut input = MidiInput::new(client_name)
                    .map_err(|e| DriverError::new(format!("MIDI input client: {}", e)))?;
                // Filtering happens in `InputShared::on_message`.
                input.ignore(midir::Ignore::None);
                Endpoint::Input {
                    client: Some(input),
                    scanner: None,
                    connection: None,
                    shared: Arc::new(InputShared::new(queue_size_limit)),
                    client_name: client_name.to_string(),
                }
            }
            Direction::Writable => Endpoint::Output {
                client: Some(
                    MidiOutput::new(client_name)
                        .map_err(|e| DriverError::new(format!("MIDI output client: {}", e)))?,
                ),
                scanner: None,
                connection: None,
                client_name: client_name.to_string(),
            },
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.endpoints.insert(id, Mutex::new(endpoint));
        debug!(
            "midir: allocated {} client '{}' as #{}",
            direction, client_name, id
        );
        Ok(RawHandle::from_raw(id))
    }

    fn input_callback(
        shared: Arc<InputShared>,
    ) -> impl FnMut(u64, &[u8], &mut Option<u64>) + Send + 'static {
        move |stamp, message, last| shared.on_message(stamp, last, message)
    }
}

impl Default for MidirDriver {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `cancel_callback` and `free` take the trampoline under the lock every
// delivery holds while invoking it.
unsafe impl Driver for MidirDriver {
    fn create_default(&self, direction: Direction) -> DriverResult<RawHandle> {
        self.allocate(direction, &self.client_name, self.queue_size_limit)
    }

    fn create(
        &self,
        direction: Direction,
        api: Api,
        client_name: &str,
        queue_size_limit: usize,
    ) -> DriverResult<RawHandle> {
        if api != Api::Unspecified && api != platform_api() {
            return Err(DriverError::new(format!("{} is not compiled in", api)));
        }
        self.allocate(direction, client_name, queue_size_limit)
    }

    fn free(&self, handle: RawHandle) -> DriverResult<()> {
        let (_, entry) = self
            .endpoints
            .remove(&handle.as_raw())
            .ok_or_else(|| Self::unknown(handle))?;
        let mut endpoint = entry.into_inner();
        // Closing stops midir's input thread; taking the trampoline waits out a
        // delivery that is already running.
        endpoint.close();
        if let Endpoint::Input { shared, .. } = &endpoint {
            shared.trampoline.lock().take();
        }
        Ok(())
    }

    fn open_port(&self, handle: RawHandle, index: usize, name: &str) -> DriverResult<()> {
        self.with_endpoint(handle, |endpoint| match endpoint {
            Endpoint::Input {
                client,
                connection,
                shared,
                ..
            } => {
                let input = client
                    .take()
                    .ok_or_else(|| DriverError::new("input already connected"))?;
                let Some(port) = input.ports().get(index).cloned() else {
                    *client = Some(input);
                    return Err(DriverError::new(format!("no port at index {}", index)));
                };
                match input.connect(&port, name, Self::input_callback(Arc::clone(shared)), None) {
                    Ok(conn) => {
                        *connection = Some(conn);
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        *client = Some(e.into_inner());
                        Err(DriverError::new(message))
                    }
                }
            }
            Endpoint::Output {
                client, connection, ..
            } => {
                let output = client
                    .take()
                    .ok_or_else(|| DriverError::new("output already connected"))?;
                let Some(port) = output.ports().get(index).cloned() else {
                    *client = Some(output);
                    return Err(DriverError::new(format!("no port at index {}", index)));
                };
                match output.connect(&port, name) {
                    Ok(conn) => {
                        *connection = Some(conn);
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        *client = Some(e.into_inner());
                        Err(DriverError::new(message))
                    }
                }
            }
        })
    }

    #[cfg(unix)]
    fn open_virtual_port(&self, handle: RawHandle, name: &str) -> DriverResult<()> {
        use midir::os::unix::{VirtualInput, VirtualOutput};

        self.with_endpoint(handle, |endpoint| match endpoint {
            Endpoint::Input {
                client,
                connection,
                shared,
                ..
            } => {
                let input = client
                    .take()
                    .ok_or_else(|| DriverError::new("input already connected"))?;
                match input.create_virtual(name, Self::input_callback(Arc::clone(shared)), None) {
                    Ok(conn) => {
                        *connection = Some(conn);
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        *client = Some(e.into_inner());
                        Err(DriverError::new(message))
                    }
                }
            }
            Endpoint::Output {
                client, connection, ..
            } => {
                let output = client
                    .take()
                    .ok_or_else(|| DriverError::new("output already connected"))?;
                match output.create_virtual(name) {
                    Ok(conn) => {
                        *connection = Some(conn);
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        *client = Some(e.into_inner());
                        Err(DriverError::new(message))
                    }
                }
            }
        })
    }

    #[cfg(not(unix))]
    fn open_virtual_port(&self, _handle: RawHandle, _name: &str) -> DriverResult<()> {
        Err(DriverError::new("virtual ports are not supported on this platform"))
    }

    fn close_port(&self, handle: RawHandle) -> DriverResult<()> {
        self.with_endpoint(handle, |endpoint| {
            endpoint.close();
            Ok(())
        })
    }

    fn current_api(&self, handle: RawHandle) -> DriverResult<Api> {
        if self.endpoints.contains_key(&handle.as_raw()) {
            Ok(platform_api())
        } else {
            Err(Self::unknown(handle))
        }
    }

    fn port_count(&self, handle: RawHandle) -> i32 {
        match self.with_endpoint(handle, Endpoint::port_count) {
            Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
            Err(e) => {
                warn!("midir: port enumeration failed on {}: {}", handle, e);
                -1
            }
        }
    }

    fn port_name(&self, handle: RawHandle, index: usize) -> DriverResult<String> {
        self.with_endpoint(handle, |endpoint| endpoint.port_name(index))
    }

    fn set_callback(&self, handle: RawHandle, trampoline: Trampoline) -> DriverResult<()> {
        let shared = self.input_shared(handle)?;
        let mut current = shared.trampoline.lock();
        if current.is_some() {
            return Err(DriverError::new("a callback is already set"));
        }
        *current = Some(trampoline);
        Ok(())
    }

    fn cancel_callback(&self, handle: RawHandle) -> DriverResult<()> {
        self.input_shared(handle)?.trampoline.lock().take();
        Ok(())
    }

    fn send_message(&self, handle: RawHandle, message: &[u8]) -> i32 {
        let sent = self.with_endpoint(handle, |endpoint| match endpoint {
            Endpoint::Output {
                connection: Some(conn),
                ..
            } => conn
                .send(message)
                .map_err(|e| DriverError::new(e.to_string())),
            _ => Err(DriverError::new("output is not connected")),
        });
        match sent {
            Ok(()) => 0,
            Err(e) => {
                debug!("midir: send on {} failed: {}", handle, e);
                -1
            }
        }
    }

    fn compiled_apis(&self) -> Vec<Api> {
        vec![platform_api()]
    }

    fn ignore_types(&self, handle: RawHandle, flags: IgnoreFlags) -> DriverResult<()> {
        self.input_shared(handle)?
            .ignore
            .store(flags.to_bits(), Ordering::Release);
        Ok(())
    }

    fn get_message(&self, handle: RawHandle, buffer: &mut Vec<u8>) -> DriverResult<Option<f64>> {
        let shared = self.input_shared(handle)?;
        let popped = shared.queue.lock().try_pop();
        Ok(popped.map(|m| m.write_into(buffer)))
    }

    fn queue_overflows(&self, handle: RawHandle) -> DriverResult<u64> {
        Ok(self.input_shared(handle)?.overflows.load(Ordering::Relaxed))
    }

    fn supports_virtual_ports(&self) -> bool {
        cfg!(unix)
    }
}
