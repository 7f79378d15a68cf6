//! Stream session: connection lifecycle and the background read loop.
//!
//! A session moves through `Disconnected → Connected → Subscribed → Running`.
//! Once running, the socket belongs to a worker thread that reads frames,
//! routes them, and watches the heartbeat. Any socket error, framing error,
//! or missed heartbeat ends the loop and is reported through
//! [`EventHandler::on_connection_lost`]; reconnecting is left to the caller.

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::frame::FrameAssembler;
use crate::heartbeat::HeartbeatMonitor;
use crate::router::{EventHandler, EventRouter};
use crate::subscription::SubscriptionProtocol;
use crate::transport::{self, EventSocket};

const WORKER_NAME: &str = "isy-event-stream";

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Subscribed,
    Running,
}

/// State visible to both the session owner and the worker thread.
struct Shared {
    handler: Arc<dyn EventHandler>,
    subscription: Arc<SubscriptionProtocol>,
    heartbeat: Arc<Mutex<HeartbeatMonitor>>,
    connected: AtomicBool,
    running: AtomicBool,
}

impl Shared {
    fn lose_connection(&self, reason: &StreamError) {
        tracing::warn!(error = %reason, "Lost connection to event stream");
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.subscription.mark_unsubscribed();
        self.handler.on_connection_lost();
    }
}

/// Why a lifecycle step failed. Loss is reported to the handler only after
/// the lifecycle lock is released, so the handler may call back into the
/// session.
enum Failure {
    Lost(StreamError),
    Other(StreamError),
}

/// Resources owned by the session while no worker holds them.
#[derive(Default)]
struct Lifecycle {
    socket: Option<Box<dyn EventSocket>>,
    interrupt: Option<TcpStream>,
    worker: Option<JoinHandle<()>>,
}

/// A connection to a controller's event stream.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use isy_stream::{EventHandler, Session, StreamConfig};
///
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_connection_lost(&self) {
///         eprintln!("event stream lost");
///     }
/// }
///
/// let session = Session::new(StreamConfig::new("192.168.1.20", 80), Arc::new(Printer))?;
/// session.start()?;
/// // ...
/// session.stop();
/// # Ok::<(), isy_stream::StreamError>(())
/// ```
pub struct Session {
    config: StreamConfig,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    peer_certificate: Mutex<Option<Vec<u8>>>,
}

impl Session {
    /// Create a disconnected session; fails if `config` is invalid
    pub fn new(config: StreamConfig, handler: Arc<dyn EventHandler>) -> Result<Self> {
        config.validate()?;

        let shared = Shared {
            handler,
            subscription: Arc::new(SubscriptionProtocol::new(&config)),
            heartbeat: Arc::new(Mutex::new(HeartbeatMonitor::with_grace(config.heartbeat_grace))),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
        };

        Ok(Self {
            config,
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle::default()),
            peer_certificate: Mutex::new(None),
        })
    }

    /// Open the socket. A no-op when already connected.
    ///
    /// On failure the handler's `on_connection_lost` is invoked before the
    /// error is returned.
    pub fn connect(&self) -> Result<()> {
        let result = {
            let mut lifecycle = self.lifecycle.lock();
            self.connect_locked(&mut lifecycle).map_err(Failure::Lost)
        };
        self.report(result)
    }

    /// Send the subscribe message on the open socket.
    ///
    /// Returns whether a message was written; `false` when already subscribed.
    pub fn subscribe(&self) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock();
        self.subscribe_locked(&mut lifecycle)
    }

    /// Connect, subscribe, and launch the read loop. A no-op when running.
    ///
    /// Safe to call from the handler's `on_connection_lost`.
    pub fn start(&self) -> Result<()> {
        let previous = {
            let mut lifecycle = self.lifecycle.lock();
            if self.is_running() {
                tracing::debug!("Event stream already running");
                return Ok(());
            }
            lifecycle.worker.take()
        };
        if let Some(handle) = previous {
            join_worker(handle);
        }

        let result = {
            let mut lifecycle = self.lifecycle.lock();
            if self.is_running() {
                return Ok(());
            }
            self.start_locked(&mut lifecycle)
        };
        self.report(result)
    }

    /// Stop the read loop, unsubscribe, and close the socket.
    ///
    /// Idempotent. Waits for the worker thread to exit.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        // Wake a reader blocked in its poll wait; writes stay open for the unsubscribe.
        self.halt_worker(Shutdown::Read);

        let mut lifecycle = self.lifecycle.lock();
        if let Some(socket) = lifecycle.socket.as_mut() {
            if let Err(e) = self.shared.subscription.unsubscribe(socket.as_mut()) {
                tracing::debug!(error = %e, "Unsubscribe failed");
            }
        }
        self.disconnect_locked(&mut lifecycle);

        if was_running {
            tracing::info!("Event stream stopped");
        }
    }

    /// Close the socket without unsubscribing.
    pub fn disconnect(&self) {
        self.shared.subscription.mark_unsubscribed();
        self.shared.running.store(false, Ordering::SeqCst);
        self.halt_worker(Shutdown::Both);

        let mut lifecycle = self.lifecycle.lock();
        self.disconnect_locked(&mut lifecycle);
    }

    /// Join workers until none is left, without holding the lifecycle lock
    /// while joining. A loss callback may start a new worker meanwhile; that
    /// one is stopped too.
    fn halt_worker(&self, how: Shutdown) {
        loop {
            let worker = {
                let mut lifecycle = self.lifecycle.lock();
                self.shared.running.store(false, Ordering::SeqCst);
                let worker = lifecycle.worker.take();
                if worker.is_some() {
                    if let Some(interrupt) = lifecycle.interrupt.as_ref() {
                        let _ = interrupt.shutdown(how);
                    }
                }
                worker
            };
            match worker {
                Some(handle) => join_worker(handle),
                None => break,
            }
        }
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> std::result::Result<(), Failure> {
        tracing::info!(addr = %self.config.socket_address(), "Starting event stream");
        self.connect_locked(lifecycle).map_err(Failure::Lost)?;
        if let Err(e) = self.subscribe_locked(lifecycle) {
            self.disconnect_locked(lifecycle);
            tracing::warn!(error = %e, "Lost connection to event stream");
            return Err(Failure::Lost(e));
        }

        let socket = lifecycle
            .socket
            .take()
            .ok_or(Failure::Other(StreamError::NotConnected))?;
        self.shared.heartbeat.lock().reset();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let reader = StreamReader::new(self.config.poll_interval, self.config.read_buffer_size);
        let spawned = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_read_loop(shared, socket, reader));

        match spawned {
            Ok(handle) => {
                lifecycle.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.disconnect_locked(lifecycle);
                tracing::error!(error = %e, "Failed to spawn event stream worker");
                Err(Failure::Other(StreamError::WorkerSpawn(e.to_string())))
            }
        }
    }

    /// Turn a lifecycle result into the caller's result, notifying the
    /// handler of loss. Must be called with the lifecycle lock released.
    fn report(&self, result: std::result::Result<(), Failure>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(Failure::Lost(e)) => {
                self.shared.handler.on_connection_lost();
                Err(e)
            }
            Err(Failure::Other(e)) => Err(e),
        }
    }

    fn connect_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let connection = transport::connect(&self.config).map_err(|e| {
            tracing::error!(error = %e, "Could not open event stream socket");
            e
        })?;
        lifecycle.socket = Some(connection.socket);
        lifecycle.interrupt = Some(connection.interrupt);
        *self.peer_certificate.lock() = connection.peer_certificate;
        self.shared.connected.store(true, Ordering::SeqCst);
        tracing::info!(addr = %self.config.socket_address(), "Connected to event stream");
        Ok(())
    }

    fn subscribe_locked(&self, lifecycle: &mut Lifecycle) -> Result<bool> {
        if self.shared.subscription.is_subscribed() {
            return Ok(false);
        }
        let socket = lifecycle.socket.as_mut().ok_or(StreamError::NotConnected)?;
        self.shared.subscription.subscribe(socket.as_mut())
    }

    fn disconnect_locked(&self, lifecycle: &mut Lifecycle) {
        if let Some(mut socket) = lifecycle.socket.take() {
            let _ = socket.close();
        }
        if let Some(interrupt) = lifecycle.interrupt.take() {
            let _ = interrupt.shutdown(Shutdown::Both);
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.subscription.mark_unsubscribed();
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Disconnected from event stream");
        }
    }

    pub fn state(&self) -> SessionState {
        if !self.is_connected() {
            SessionState::Disconnected
        } else if self.is_running() {
            SessionState::Running
        } else if self.is_subscribed() {
            SessionState::Subscribed
        } else {
            SessionState::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription.is_subscribed()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stream id assigned by the controller, if one has been seen
    pub fn stream_id(&self) -> Option<String> {
        self.shared.subscription.stream_id()
    }

    /// Time since the last heartbeat
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.shared.heartbeat.lock().elapsed()
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Local>> {
        self.shared.heartbeat.lock().last_heartbeat()
    }

    /// Interval declared by the last heartbeat
    pub fn heartbeat_wait(&self) -> Duration {
        self.shared.heartbeat.lock().wait()
    }

    /// DER certificate presented by the controller on a TLS connection
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.peer_certificate.lock().clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.config.socket_address())
            .field("state", &self.state())
            .field("stream_id", &self.stream_id())
            .finish()
    }
}

fn join_worker(handle: JoinHandle<()>) {
    // The handler may restart the session from inside the worker's own
    // on_connection_lost; that thread is already on its way out.
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("Event stream worker panicked");
    }
}

/// Reads from the socket and splits the bytes into event bodies.
struct StreamReader {
    assembler: FrameAssembler,
    buffer: Vec<u8>,
    poll_interval: Duration,
    eof: bool,
}

impl StreamReader {
    fn new(poll_interval: Duration, buffer_size: usize) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            buffer: vec![0; buffer_size],
            poll_interval,
            eof: false,
        }
    }

    /// Wait up to the poll interval for data, then drain whatever else is
    /// already readable. Returns the complete bodies found, possibly none.
    fn read(&mut self, socket: &mut dyn EventSocket) -> Result<Vec<Bytes>> {
        if self.eof {
            return Err(StreamError::Closed);
        }

        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(self.poll_interval))?;
        let n = match socket.read(&mut self.buffer) {
            Ok(0) => return Err(StreamError::Closed),
            Ok(n) => n,
            Err(e) if is_idle(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut frames = self.assembler.push(&self.buffer[..n])?;

        socket.set_nonblocking(true)?;
        let drained = self.drain(socket, &mut frames);
        socket.set_nonblocking(false)?;
        drained?;

        Ok(frames)
    }

    fn drain(&mut self, socket: &mut dyn EventSocket, frames: &mut Vec<Bytes>) -> Result<()> {
        loop {
            match socket.read(&mut self.buffer) {
                Ok(0) => {
                    // Deliver what arrived first; the next read reports the close.
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => frames.extend(self.assembler.push(&self.buffer[..n])?),
                Err(e) if is_idle(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_idle(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn check_heartbeat(heartbeat: &Mutex<HeartbeatMonitor>) -> Result<()> {
    let monitor = heartbeat.lock();
    if monitor.is_alive() {
        Ok(())
    } else {
        Err(StreamError::HeartbeatTimeout {
            elapsed: monitor.elapsed(),
            wait: monitor.wait(),
        })
    }
}

fn dispatch(router: &EventRouter, body: &[u8]) {
    match std::str::from_utf8(body) {
        Ok(text) => {
            router.route(text);
        }
        Err(e) => {
            tracing::warn!(error = %e, len = body.len(), "Dropping event body that is not UTF-8");
        }
    }
}

fn run_read_loop(shared: Arc<Shared>, mut socket: Box<dyn EventSocket>, mut reader: StreamReader) {
    let router = EventRouter::new(
        Arc::clone(&shared.handler),
        Arc::clone(&shared.subscription),
        Arc::clone(&shared.heartbeat),
    );
    tracing::debug!("Event stream read loop started");

    let outcome = loop {
        if !shared.running.load(Ordering::SeqCst) {
            break Ok(());
        }
        if let Err(e) = check_heartbeat(&shared.heartbeat) {
            break Err(e);
        }
        match reader.read(socket.as_mut()) {
            Ok(frames) => {
                for body in &frames {
                    dispatch(&router, body);
                }
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Err(e) if shared.running.load(Ordering::SeqCst) => {
            let _ = socket.close();
            shared.lose_connection(&e);
        }
        _ => {
            if let Err(e) = shared.subscription.unsubscribe(socket.as_mut()) {
                tracing::debug!(error = %e, "Unsubscribe failed");
            }
            let _ = socket.close();
            shared.connected.store(false, Ordering::SeqCst);
            tracing::debug!("Event stream read loop exited");
        }
    }
}
