//! Per-device connection context.
//!
//! [`FinsSystem`] is created once per logical target device and reused for
//! every connect attempt. It remembers where the device lives, how it is
//! addressed on the FINS network, the service id sequence, and the
//! [`ConnectionGuard`] that keeps a faulty device from being redialed in a
//! tight loop.
//!
//! # Connect sequence
//!
//! 1. Ask the guard. A device in cooldown fails with [`FinsError::TryLater`].
//! 2. Validate the address. Empty or NUL-led addresses fail with
//!    [`FinsError::NoReadAddress`].
//! 3. Substitute the default port for one outside the valid range.
//! 4. Dial through the [`Registry`]. A socket failure arms the guard; a
//!    rejected timeout or a stopped registry does not.
//! 5. Reset the context and commit the new address, port and addressing.
//!
//! Nothing but the error code, the guard and its counters changes on a
//! failed attempt. The guard only counts errors from the session opened by
//! the latest successful connect.
//!
//! Callers must not run two connects on the same context at once; `&mut self`
//! enforces this.
//!
//! # Example
//!
//! ```no_run
//! use omron_fins_tcp::{ConnectConfig, FinsSystem, FinsTcpCodec, FinsTcpFrame, NodeAddress, Registry, Session, SessionHandler};
//!
//! struct Log;
//!
//! impl SessionHandler<FinsTcpFrame> for Log {
//!     fn on_message(&self, _session: &Session<FinsTcpFrame>, frame: FinsTcpFrame) {
//!         println!("{:?}", frame);
//!     }
//! }
//!
//! let registry = Registry::new();
//! let mut plc = FinsSystem::new();
//! let config = ConnectConfig::new("192.168.1.1", 9600)
//!     .with_local(NodeAddress::new(0, 10, 0))
//!     .with_remote(NodeAddress::new(0, 1, 0))
//!     .with_error_max(6);
//!
//! let session = plc.tcp_connect(&registry, &config, FinsTcpCodec, Log)?;
//! session.write(&FinsTcpFrame::node_address_request(10))?;
//! # Ok::<(), omron_fins_tcp::FinsError>(())
//! ```

use std::time::{Duration, Instant};

use crate::codec::{Decoder, Encoder};
use crate::error::{ErrorCode, FinsError, Result};
use crate::guard::ConnectionGuard;
use crate::header::{FinsHeader, NodeAddress};
use crate::registry::Registry;
use crate::session::{Session, SessionHandler};
use crate::transport::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FINS_PORT, FINS_PORT_MAX, FINS_PORT_RESERVED, FINS_TIMEOUT,
};

/// Transport a context is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommType {
    /// Not connected yet.
    #[default]
    Unknown,
    /// FINS over TCP.
    Tcp,
}

/// Operating mode last reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlcMode {
    /// Not queried since the last reset.
    #[default]
    Unknown,
    /// Program mode.
    Program,
    /// Monitor mode.
    Monitor,
    /// Run mode.
    Run,
}

/// Protocol constants applied by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemLimits {
    /// Port substituted for an out-of-range one.
    pub default_port: u16,
    /// Lowest valid port (inclusive).
    pub port_reserved: u16,
    /// Upper bound of valid ports (exclusive).
    pub port_max: u16,
    /// Protocol timeout; the guard window is twice this.
    pub timeout: Duration,
}

impl Default for SystemLimits {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_FINS_PORT,
            port_reserved: FINS_PORT_RESERVED,
            port_max: FINS_PORT_MAX,
            timeout: FINS_TIMEOUT,
        }
    }
}

impl SystemLimits {
    /// Returns `port` if it lies in `[port_reserved, port_max)`, else the default port.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::SystemLimits;
    ///
    /// let limits = SystemLimits::default();
    /// assert_eq!(limits.effective_port(9601), 9601);
    /// assert_eq!(limits.effective_port(0), 9600);
    /// assert_eq!(limits.effective_port(65535), 9600);
    /// ```
    pub fn effective_port(&self, port: u16) -> u16 {
        if (self.port_reserved..self.port_max).contains(&port) {
            port
        } else {
            self.default_port
        }
    }

    /// Sets the default port.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Sets the protocol timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parameters of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Target host name or IP address.
    pub address: String,
    /// Target port; out-of-range values fall back to the default port.
    pub port: u16,
    /// This client's network/node/unit.
    pub local: NodeAddress,
    /// The controller's network/node/unit.
    pub remote: NodeAddress,
    /// Error ceiling that arms the guard (0 = never).
    pub error_max: u32,
    /// TCP dial timeout.
    pub connect_timeout: Duration,
}

impl ConnectConfig {
    /// Creates a configuration with zeroed addressing and no error ceiling.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            local: NodeAddress::local(),
            remote: NodeAddress::local(),
            error_max: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets this client's network/node/unit.
    pub fn with_local(mut self, local: NodeAddress) -> Self {
        self.local = local;
        self
    }

    /// Sets the controller's network/node/unit.
    pub fn with_remote(mut self, remote: NodeAddress) -> Self {
        self.remote = remote;
        self
    }

    /// Sets the error ceiling.
    pub fn with_error_max(mut self, error_max: u32) -> Self {
        self.error_max = error_max;
        self
    }

    /// Sets the dial timeout (default 2 seconds).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Returns whether `address` is usable as a dial target.
fn is_readable_address(address: &str) -> bool {
    address.as_bytes().first().is_some_and(|&b| b != 0)
}

/// Forwards to the application handler and counts fatal errors on the guard.
///
/// Errors from a session other than the one the guard is bound to are not counted.
struct GuardedHandler<H> {
    inner: H,
    guard: ConnectionGuard,
}

impl<M, H: SessionHandler<M>> SessionHandler<M> for GuardedHandler<H> {
    fn on_open(&self, session: &Session<M>) {
        self.inner.on_open(session);
    }

    fn on_message(&self, session: &Session<M>, message: M) {
        self.inner.on_message(session, message);
    }

    fn on_error(&self, session: &Session<M>, error: &FinsError) {
        if self.guard.record_session_error(session.id()) {
            log::warn!(
                "session {} reached the error ceiling of {}, guard armed",
                session.id(),
                self.guard.error_max()
            );
        }
        self.inner.on_error(session, error);
    }

    fn on_close(&self, session: &Session<M>) {
        self.inner.on_close(session);
    }
}

/// Connection context for one target device.
#[derive(Debug)]
pub struct FinsSystem {
    limits: SystemLimits,
    address: String,
    port: u16,
    session_id: Option<u64>,
    comm_type: CommType,
    plc_mode: PlcMode,
    model: String,
    version: String,
    sid: u8,
    local: NodeAddress,
    remote: NodeAddress,
    last_error: ErrorCode,
    guard: ConnectionGuard,
}

impl Default for FinsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FinsSystem {
    /// Creates a context with the default protocol constants.
    pub fn new() -> Self {
        Self::with_limits(SystemLimits::default())
    }

    /// Creates a context with custom protocol constants.
    pub fn with_limits(limits: SystemLimits) -> Self {
        Self {
            limits,
            address: String::new(),
            port: limits.default_port,
            session_id: None,
            comm_type: CommType::Unknown,
            plc_mode: PlcMode::Unknown,
            model: String::new(),
            version: String::new(),
            sid: 0,
            local: NodeAddress::local(),
            remote: NodeAddress::local(),
            last_error: ErrorCode::Success,
            guard: ConnectionGuard::new(limits.timeout),
        }
    }

    /// Clears the transient fields and stores a new error ceiling.
    ///
    /// The address is kept. The guard is re-opened, since a reset only
    /// happens on a confirmed connection.
    pub fn reset(&mut self, error_max: u32) {
        self.port = self.limits.default_port;
        self.session_id = None;
        self.comm_type = CommType::Unknown;
        self.plc_mode = PlcMode::Unknown;
        self.model.clear();
        self.version.clear();
        self.sid = 0;
        self.local = NodeAddress::local();
        self.remote = NodeAddress::local();
        self.last_error = ErrorCode::Success;
        self.guard.reset(error_max);
    }

    /// Connects to the device described by `config` and starts a session.
    ///
    /// # Errors
    ///
    /// - [`FinsError::TryLater`] while the guard is cooling down
    /// - [`FinsError::NoReadAddress`] for an empty or NUL-led address
    /// - [`FinsError::InvalidParameter`] for a zero connect timeout
    /// - [`FinsError::SessionClosed`] if `registry` was shut down
    /// - [`FinsError::Io`] if the dial fails; only this arms the guard
    ///
    /// The matching [`ErrorCode`] is kept in [`last_error`](Self::last_error).
    pub fn tcp_connect<C, H>(
        &mut self,
        registry: &Registry,
        config: &ConnectConfig,
        codec: C,
        handler: H,
    ) -> Result<Session<C::Item>>
    where
        C: Decoder + Encoder<<C as Decoder>::Item> + Clone,
        H: SessionHandler<C::Item>,
    {
        self.tcp_connect_at(Instant::now(), registry, config, codec, handler)
    }

    /// [`tcp_connect`](Self::tcp_connect) with an explicit clock reading.
    pub fn tcp_connect_at<C, H>(
        &mut self,
        now: Instant,
        registry: &Registry,
        config: &ConnectConfig,
        codec: C,
        handler: H,
    ) -> Result<Session<C::Item>>
    where
        C: Decoder + Encoder<<C as Decoder>::Item> + Clone,
        H: SessionHandler<C::Item>,
    {
        if let Err(e) = self.guard.check_at(now) {
            self.last_error = e.code();
            return Err(e);
        }

        if !is_readable_address(&config.address) {
            log::warn!("connect rejected, no readable address");
            self.last_error = ErrorCode::NoReadAddress;
            return Err(FinsError::NoReadAddress);
        }

        let port = self.limits.effective_port(config.port);
        if port != config.port {
            log::debug!("port {} out of range, using {port}", config.port);
        }
        let address = config.address.clone();

        let handler = GuardedHandler {
            inner: handler,
            guard: self.guard.clone(),
        };
        let session = match registry.dial(&address, port, config.connect_timeout, codec, handler) {
            Ok(session) => session,
            Err(e @ FinsError::Io(_)) => {
                log::warn!("connect to {address}:{port} failed: {e}");
                self.guard.record_failure_at(now);
                self.last_error = e.code();
                return Err(e);
            }
            Err(e) => {
                log::warn!("connect to {address}:{port} not attempted: {e}");
                self.last_error = e.code();
                return Err(e);
            }
        };

        self.reset(config.error_max);
        self.guard.bind(session.id());
        self.comm_type = CommType::Tcp;
        self.address = address;
        self.port = port;
        self.local = config.local;
        self.remote = config.remote;
        self.session_id = Some(session.id());
        log::debug!(
            "connected to {}:{} as session {}, {} -> {}",
            self.address,
            self.port,
            session.id(),
            self.local,
            self.remote
        );
        Ok(session)
    }

    /// Returns the current service id and advances the sequence.
    pub fn next_sid(&mut self) -> u8 {
        let sid = self.sid;
        self.sid = self.sid.wrapping_add(1);
        sid
    }

    /// Builds a routing header from the local to the remote endpoint with the next SID.
    pub fn command_header(&mut self) -> FinsHeader {
        let sid = self.next_sid();
        FinsHeader::new_command(self.remote, self.local, sid)
    }

    /// Records the controller's operating mode.
    pub fn set_plc_mode(&mut self, mode: PlcMode) {
        self.plc_mode = mode;
    }

    /// Records the controller's model and version strings.
    pub fn set_identity(&mut self, model: impl Into<String>, version: impl Into<String>) {
        self.model = model.into();
        self.version = version.into();
    }

    /// Returns the protocol constants.
    pub fn limits(&self) -> SystemLimits {
        self.limits
    }

    /// Returns the address of the last successful connect.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the effective port of the last successful connect.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the id of the session opened by the last successful connect.
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Returns the configured transport.
    pub fn comm_type(&self) -> CommType {
        self.comm_type
    }

    /// Returns the last recorded operating mode.
    pub fn plc_mode(&self) -> PlcMode {
        self.plc_mode
    }

    /// Returns the controller model string.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the controller version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the next service id without advancing it.
    pub fn sid(&self) -> u8 {
        self.sid
    }

    /// Returns this client's network/node/unit.
    pub fn local(&self) -> NodeAddress {
        self.local
    }

    /// Returns the controller's network/node/unit.
    pub fn remote(&self) -> NodeAddress {
        self.remote
    }

    /// Returns the code of the last connect attempt.
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// Returns the number of errors counted since the last successful connect.
    pub fn error_count(&self) -> u32 {
        self.guard.error_count()
    }

    /// Returns the error ceiling.
    pub fn error_max(&self) -> u32 {
        self.guard.error_max()
    }

    /// Returns whether the error ceiling was reached since the last connect.
    pub fn error_changed(&self) -> bool {
        self.guard.error_changed()
    }

    /// Returns the reconnection guard.
    pub fn guard(&self) -> &ConnectionGuard {
        &self.guard
    }
}
