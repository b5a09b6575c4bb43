//! Session registry and dialer.
//!
//! A [`Registry`] hands out session ids, starts sessions on dialed or
//! accepted sockets, and coordinates group shutdown. It is an explicit
//! object: create one, pass it to [`FinsSystem::tcp_connect`](crate::FinsSystem::tcp_connect)
//! or [`Registry::dial`], and call [`Registry::shutdown`] when done.
//!
//! Sessions keep only a weak back-reference to the registry. Closing one
//! session never touches the others, and shutting the registry down closes
//! every live session without waiting on any of them. [`Registry::wait`]
//! joins the loop threads afterwards.
//!
//! # Example
//!
//! ```no_run
//! use omron_fins_tcp::{FinsTcpCodec, FinsTcpFrame, Registry, Session, SessionHandler};
//! use std::time::Duration;
//!
//! struct Print;
//!
//! impl SessionHandler<FinsTcpFrame> for Print {
//!     fn on_message(&self, session: &Session<FinsTcpFrame>, frame: FinsTcpFrame) {
//!         println!("session {}: {:?}", session.id(), frame.command);
//!     }
//! }
//!
//! let registry = Registry::new();
//! let session = registry.dial("192.168.1.10", 9600, Duration::from_secs(2), FinsTcpCodec, Print)?;
//! session.write(&FinsTcpFrame::node_address_request(0))?;
//!
//! registry.shutdown();
//! registry.wait();
//! # Ok::<(), omron_fins_tcp::FinsError>(())
//! ```

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{Decoder, Encoder};
use crate::error::{FinsError, Result};
use crate::session::{Closeable, Session, SessionHandler, SessionSeed};
use crate::transport::{TcpTransport, READ_CHUNK_SIZE};

/// Default capacity of a session's inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Tuning for the sessions a registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Capacity of each session's inbound queue.
    pub queue_capacity: usize,
    /// Size of the transfer chunk used per socket read.
    pub read_chunk_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

impl RegistryConfig {
    /// Sets the inbound queue capacity (default 16).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the read chunk size (default 512 bytes).
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(FinsError::invalid_parameter(
                "queue_capacity",
                "must be greater than 0",
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(FinsError::invalid_parameter(
                "read_chunk_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// State shared between a registry and the sessions it created.
pub(crate) struct Shared {
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    sessions: Mutex<HashMap<u64, Weak<dyn Closeable>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn unregister(&self, id: u64) {
        self.sessions.lock().remove(&id);
    }
}

/// Creates and tracks sessions.
pub struct Registry {
    shared: Arc<Shared>,
    config: RegistryConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a running registry with the default configuration.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(0),
                running: Arc::new(AtomicBool::new(true)),
                sessions: Mutex::new(HashMap::new()),
                threads: Mutex::new(Vec::new()),
            }),
            config: RegistryConfig::default(),
        }
    }

    /// Creates a running registry with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if the queue capacity or read
    /// chunk size is zero.
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Returns whether the registry still accepts new sessions.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns the number of sessions whose loops have not both exited.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Dials `host:port` and starts a session on the new socket.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::SessionClosed` after [`shutdown`](Self::shutdown),
    /// or the transport error if the dial fails.
    pub fn dial<C, H>(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        codec: C,
        handler: H,
    ) -> Result<Session<C::Item>>
    where
        C: Decoder + Encoder<<C as Decoder>::Item> + Clone,
        H: SessionHandler<C::Item>,
    {
        self.ensure_running()?;
        let transport = TcpTransport::connect(host, port, timeout)?;
        self.start(transport, codec, handler)
    }

    /// Starts a session on an accepted socket.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::SessionClosed` after [`shutdown`](Self::shutdown),
    /// or `FinsError::Io` if the socket cannot be configured.
    pub fn accept<C, H>(&self, stream: TcpStream, codec: C, handler: H) -> Result<Session<C::Item>>
    where
        C: Decoder + Encoder<<C as Decoder>::Item> + Clone,
        H: SessionHandler<C::Item>,
    {
        self.ensure_running()?;
        let transport = TcpTransport::from_stream(stream)?;
        self.start(transport, codec, handler)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(FinsError::SessionClosed)
        }
    }

    fn start<C, H>(&self, transport: TcpTransport, codec: C, handler: H) -> Result<Session<C::Item>>
    where
        C: Decoder + Encoder<<C as Decoder>::Item> + Clone,
        H: SessionHandler<C::Item>,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let seed = SessionSeed {
            id,
            transport,
            running: Arc::clone(&self.shared.running),
            registry: Arc::downgrade(&self.shared),
            queue_capacity: self.config.queue_capacity,
            read_chunk_size: self.config.read_chunk_size,
        };

        // Registered before the loops start so a fast exit can unregister it.
        let (session, handles) = Session::spawn(seed, codec, handler, |session| {
            self.shared.sessions.lock().insert(id, session.closer());
        })?;

        let mut threads = self.shared.threads.lock();
        threads.retain(|handle| !handle.is_finished());
        threads.extend(handles);
        Ok(session)
    }

    /// Stops accepting sessions and closes every live one.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let live: Vec<_> = self.shared.sessions.lock().values().cloned().collect();
        log::debug!("registry shutting down {} sessions", live.len());
        for session in live.iter().filter_map(Weak::upgrade) {
            session.close();
        }
    }

    /// Blocks until every loop thread started by this registry has exited.
    pub fn wait(&self) {
        loop {
            let handles = std::mem::take(&mut *self.shared.threads.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    log::error!("session thread panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("running", &self.is_running())
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawCodec;
    use std::net::TcpListener;

    struct Ignore;

    impl SessionHandler<Vec<u8>> for Ignore {
        fn on_message(&self, _session: &Session<Vec<u8>>, _message: Vec<u8>) {}
    }

    #[test]
    fn test_config_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.read_chunk_size, 512);
    }

    #[test]
    fn test_config_rejects_zero() {
        assert!(Registry::with_config(RegistryConfig::default().with_queue_capacity(0)).is_err());
        assert!(Registry::with_config(RegistryConfig::default().with_read_chunk_size(0)).is_err());
        let registry = Registry::with_config(RegistryConfig::default().with_queue_capacity(1)).unwrap();
        assert_eq!(registry.config().queue_capacity, 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = Registry::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let a = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore).unwrap();
        let b = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore).unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(registry.session_count(), 2);

        registry.shutdown();
        registry.wait();
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_shutdown_closes_sessions_and_rejects_new() {
        let registry = Registry::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let session = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore).unwrap();
        let _peer = listener.accept().unwrap();

        registry.shutdown();
        assert!(!registry.is_running());
        assert!(session.is_closed());
        assert!(matches!(session.write(&vec![1]), Err(FinsError::SessionClosed)));

        let again = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore);
        assert!(matches!(again, Err(FinsError::SessionClosed)));
        registry.wait();
    }

    #[test]
    fn test_accept() {
        let registry = Registry::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let session = registry.accept(stream, RawCodec, Ignore).unwrap();
        assert_eq!(session.id(), 1);
        assert!(!session.is_closed());
        session.close();
        registry.wait();
    }

    #[test]
    fn test_close_one_session_leaves_others() {
        let registry = Registry::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let a = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore).unwrap();
        let b = registry.dial("127.0.0.1", port, Duration::from_secs(1), RawCodec, Ignore).unwrap();
        let _peers = (listener.accept().unwrap(), listener.accept().unwrap());

        a.close();
        assert!(registry.is_running());
        assert!(!b.is_closed());

        registry.shutdown();
        registry.wait();
    }
}
