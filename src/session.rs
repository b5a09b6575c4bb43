//! Per-connection session actor.
//!
//! A [`Session`] owns one live socket and runs two threads:
//!
//! ```text
//!  socket ──read──▶ ByteBuffer ──Decoder──▶ bounded queue ──▶ SessionHandler::on_message
//!          (read loop)                                (dispatch loop)
//! ```
//!
//! The queue is a `sync_channel`, so a slow handler blocks the read loop
//! rather than letting frames pile up. Frames are dispatched in the order
//! they were decoded.
//!
//! Closing is the only cancellation primitive. [`Session::close`] flips the
//! closed flag before shutting the socket down, which wakes the read loop. The
//! read loop then drops its end of the queue and the dispatch loop drains
//! what is left and exits. [`SessionHandler::on_close`] runs once, after both
//! loops are gone.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::buffer::ByteBuffer;
use crate::codec::{Decoded, Decoder, Encoder};
use crate::error::{FinsError, Result};
use crate::registry::Shared;
use crate::transport::TcpTransport;

/// Value stored in a session's user-data table.
#[derive(Debug, Clone, PartialEq)]
pub enum UserValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<bool> for UserValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for UserValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for UserValue {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<f64> for UserValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for UserValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for UserValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for UserValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Application callbacks for one session.
///
/// `on_message` runs on the dispatch thread; `on_error` and `on_close` may run
/// on either loop thread. Implementations must not block forever, or the
/// read loop stalls behind the full queue.
pub trait SessionHandler<M>: Send + Sync + 'static {
    /// Called once, before either loop starts.
    fn on_open(&self, _session: &Session<M>) {}

    /// Called for every decoded message, in arrival order.
    fn on_message(&self, session: &Session<M>, message: M);

    /// Called once with the error that ended the read loop.
    fn on_error(&self, _session: &Session<M>, _error: &FinsError) {}

    /// Called once, after both loops have exited.
    fn on_close(&self, _session: &Session<M>) {}
}

impl<M, H: SessionHandler<M>> SessionHandler<M> for Arc<H> {
    fn on_open(&self, session: &Session<M>) {
        (**self).on_open(session);
    }

    fn on_message(&self, session: &Session<M>, message: M) {
        (**self).on_message(session, message);
    }

    fn on_error(&self, session: &Session<M>, error: &FinsError) {
        (**self).on_error(session, error);
    }

    fn on_close(&self, session: &Session<M>) {
        (**self).on_close(session);
    }
}

/// Type-erased close handle kept by the registry for group shutdown.
pub(crate) trait Closeable: Send + Sync {
    fn close(&self) -> bool;
}

struct WriteHalf<M> {
    encoder: Box<dyn Encoder<M>>,
    scratch: ByteBuffer,
}

struct Inner<M> {
    id: u64,
    transport: TcpTransport,
    closed: AtomicBool,
    running: Arc<AtomicBool>,
    registry: Weak<Shared>,
    writer: Mutex<WriteHalf<M>>,
    handler: Box<dyn SessionHandler<M>>,
    user_data: Mutex<HashMap<String, UserValue>>,
    user_id: Mutex<Option<UserValue>>,
    live_loops: AtomicUsize,
}

impl<M> Inner<M> {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::debug!("closing session {} to {}", self.id, self.transport.peer_addr());
        self.transport.shutdown();
        true
    }
}

impl<M: Send + 'static> Closeable for Inner<M> {
    fn close(&self) -> bool {
        Inner::close(self)
    }
}

/// Handle on one live connection. Clones share the same session.
pub struct Session<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Everything a new session needs besides its codec and handler.
pub(crate) struct SessionSeed {
    pub id: u64,
    pub transport: TcpTransport,
    pub running: Arc<AtomicBool>,
    pub registry: Weak<Shared>,
    pub queue_capacity: usize,
    pub read_chunk_size: usize,
}

impl<M: Send + 'static> Session<M> {
    /// Builds the session, runs `register` and `on_open`, then starts both loops.
    pub(crate) fn spawn<C, H, R>(
        seed: SessionSeed,
        codec: C,
        handler: H,
        register: R,
    ) -> Result<(Self, Vec<JoinHandle<()>>)>
    where
        C: Decoder<Item = M> + Encoder<M> + Clone,
        H: SessionHandler<M>,
        R: FnOnce(&Self),
    {
        let reader = seed.transport.reader()?;
        let (tx, rx) = mpsc::sync_channel(seed.queue_capacity);

        let session = Self {
            inner: Arc::new(Inner {
                id: seed.id,
                transport: seed.transport,
                closed: AtomicBool::new(false),
                running: seed.running,
                registry: seed.registry,
                writer: Mutex::new(WriteHalf {
                    encoder: Box::new(codec.clone()),
                    scratch: ByteBuffer::new(),
                }),
                handler: Box::new(handler),
                user_data: Mutex::new(HashMap::new()),
                user_id: Mutex::new(None),
                live_loops: AtomicUsize::new(2),
            }),
        };
        register(&session);
        log::debug!("session {} opened to {}", session.id(), session.peer_addr());
        session.inner.handler.on_open(&session);

        let dispatcher = {
            let session = session.clone();
            thread::Builder::new()
                .name(format!("fins-dispatch-{}", session.id()))
                .spawn(move || session.dispatch_loop(rx))
        };
        let dispatcher = match dispatcher {
            Ok(handle) => handle,
            Err(e) => {
                session.close();
                session.loop_exited();
                session.loop_exited();
                return Err(e.into());
            }
        };

        let chunk_size = seed.read_chunk_size;
        let read_loop = {
            let session = session.clone();
            thread::Builder::new()
                .name(format!("fins-read-{}", session.id()))
                .spawn(move || session.read_loop(reader, codec, tx, chunk_size))
        };
        match read_loop {
            Ok(handle) => Ok((session, vec![dispatcher, handle])),
            Err(e) => {
                // The sender was dropped with the closure, so the dispatcher exits too.
                session.close();
                session.loop_exited();
                Err(e.into())
            }
        }
    }

    fn read_loop<D>(&self, mut reader: TcpStream, mut decoder: D, tx: SyncSender<M>, chunk_size: usize)
    where
        D: Decoder<Item = M>,
    {
        let mut buf = ByteBuffer::with_capacity(chunk_size);
        let mut chunk = vec![0u8; chunk_size];

        let outcome: Result<()> = loop {
            if !self.is_active() {
                break Ok(());
            }
            let n = match reader.read(&mut chunk) {
                Ok(0) => {
                    break Err(FinsError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            };
            buf.put_bytes(&chunk[..n]);
            if let Err(e) = drain_frames(&mut decoder, &mut buf, &tx, &self.inner.closed) {
                break Err(e);
            }
        };

        match outcome {
            Err(e) if !self.is_closed() => {
                log::error!("session {} read loop failed: {e}", self.id());
                self.inner.handler.on_error(self, &e);
            }
            Err(e) => log::debug!("session {} read loop stopped after close: {e}", self.id()),
            Ok(()) => log::debug!("session {} read loop stopped", self.id()),
        }

        self.close();
        drop(tx);
        self.loop_exited();
    }

    fn dispatch_loop(&self, rx: Receiver<M>) {
        loop {
            let next = if self.inner.running.load(Ordering::Acquire) {
                rx.recv().ok()
            } else {
                rx.try_recv().ok()
            };
            match next {
                Some(message) => self.inner.handler.on_message(self, message),
                None => break,
            }
        }
        log::debug!("session {} dispatch loop stopped", self.id());
        self.loop_exited();
    }

    /// Runs `on_close` and unregisters once the last loop is gone.
    fn loop_exited(&self) {
        if self.inner.live_loops.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.unregister(self.id());
        }
        log::debug!("session {} released", self.id());
        self.inner.handler.on_close(self);
    }
}

/// Decodes every complete frame in `buf` and queues it.
///
/// A failed attempt rewinds the read cursor so no buffered bytes are lost.
/// Stops queueing as soon as `closed` is set.
fn drain_frames<D: Decoder>(
    decoder: &mut D,
    buf: &mut ByteBuffer,
    tx: &SyncSender<D::Item>,
    closed: &AtomicBool,
) -> Result<()> {
    loop {
        if closed.load(Ordering::Acquire) {
            break;
        }
        let start = buf.read_pos();
        match decoder.decode(buf)? {
            Decoded::Frame { message, consumed } => {
                if consumed == 0 {
                    return Err(FinsError::invalid_frame("decoder returned a frame without consuming bytes"));
                }
                buf.set_read_pos(start + consumed)?;
                tx.send(message).map_err(|_| FinsError::SessionClosed)?;
            }
            Decoded::NeedMore => {
                buf.set_read_pos(start)?;
                break;
            }
        }
    }

    if buf.read_length() == 0 {
        buf.reset_write();
    } else {
        buf.compact();
    }
    Ok(())
}

impl<M> Session<M> {
    /// Returns the session id, unique within its registry.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.transport.peer_addr()
    }

    /// Returns whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        !self.is_closed() && self.inner.running.load(Ordering::Acquire)
    }

    /// Encodes `message` and writes it to the socket, blocking until sent.
    ///
    /// A failed write is returned to the caller but does not close the
    /// session; only read-side failures are fatal.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::SessionClosed`] if the session or its registry is
    /// shut down, the encoder's error if encoding fails, or
    /// [`FinsError::Io`] if the socket write fails.
    pub fn write(&self, message: &M) -> Result<()>
    where
        M: 'static,
    {
        if !self.is_active() {
            return Err(FinsError::SessionClosed);
        }

        let mut writer = self.inner.writer.lock();
        let WriteHalf { encoder, scratch } = &mut *writer;
        scratch.reset_write();
        encoder.encode(message, scratch)?;

        self.inner.transport.send(scratch.readable()).map_err(|e| {
            log::warn!("session {} write failed: {e}", self.id());
            e
        })
    }

    /// Closes the session. Returns `false` if it was already closed.
    ///
    /// The closed flag is set before the socket is shut down, so both loops
    /// see it the next time they would block.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    /// Stores a value in the session's user-data table.
    pub fn set_user_data(&self, key: impl Into<String>, value: impl Into<UserValue>) {
        self.inner.user_data.lock().insert(key.into(), value.into());
    }

    /// Returns a copy of the value stored under `key`.
    pub fn user_data(&self, key: &str) -> Option<UserValue> {
        self.inner.user_data.lock().get(key).cloned()
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove_user_data(&self, key: &str) -> Option<UserValue> {
        self.inner.user_data.lock().remove(key)
    }

    /// Associates a single user identity with the session.
    pub fn set_user_id(&self, value: impl Into<UserValue>) {
        *self.inner.user_id.lock() = Some(value.into());
    }

    /// Returns the user identity, if one was set.
    pub fn user_id(&self) -> Option<UserValue> {
        self.inner.user_id.lock().clone()
    }

    /// Returns a type-erased close handle for the registry.
    pub(crate) fn closer(&self) -> Weak<dyn Closeable>
    where
        M: Send + 'static,
    {
        let weak: Weak<Inner<M>> = Arc::downgrade(&self.inner);
        weak
    }
}

impl<M> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.transport.peer_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
