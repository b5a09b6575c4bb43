//! # Omron FINS/TCP Connection Core
//!
//! The connection layer of a FINS (Factory Interface Network Service) client
//! for Omron PLCs over TCP. It owns sockets, frames bytes, and keeps track of
//! which devices may be dialed again.
//!
//! FINS command semantics (memory area reads, run/stop, clock access) live
//! above this crate. Each session hands decoded frames to a
//! [`SessionHandler`] and writes whatever messages the application encodes.
//!
//! ## Features
//!
//! - **Byte buffer**: [`ByteBuffer`] with big-endian primitives and strict,
//!   cursor-preserving reads
//! - **Pluggable framing**: [`Decoder`] and [`Encoder`] traits, with the
//!   FINS/TCP envelope ([`FinsTcpCodec`]) and pass-through ([`RawCodec`]) codecs
//! - **Sessions**: one read thread and one dispatch thread per connection,
//!   a bounded in-order queue between them, and idempotent close
//! - **Reconnection guard**: [`ConnectionGuard`] rejects connect attempts for
//!   `2 × timeout` after a failed dial or once the error ceiling is reached
//! - **Explicit registry**: [`Registry`] assigns session ids and coordinates
//!   shutdown, with no process-wide state
//!
//! ## Quick Start
//!
//! ```no_run
//! use omron_fins_tcp::{
//!     ConnectConfig, FinsSystem, FinsTcpCodec, FinsTcpFrame, NodeAddress, Registry, Session,
//!     SessionHandler,
//! };
//!
//! struct Print;
//!
//! impl SessionHandler<FinsTcpFrame> for Print {
//!     fn on_message(&self, session: &Session<FinsTcpFrame>, frame: FinsTcpFrame) {
//!         println!("session {}: {:?}", session.id(), frame);
//!     }
//! }
//!
//! fn main() -> omron_fins_tcp::Result<()> {
//!     let registry = Registry::new();
//!     let mut plc = FinsSystem::new();
//!
//!     let config = ConnectConfig::new("192.168.1.250", 9600)
//!         .with_local(NodeAddress::new(0, 10, 0))
//!         .with_remote(NodeAddress::new(0, 250, 0))
//!         .with_error_max(6);
//!     let session = plc.tcp_connect(&registry, &config, FinsTcpCodec, Print)?;
//!
//!     // Ask the PLC for node addresses
//!     session.write(&FinsTcpFrame::node_address_request(10))?;
//!
//!     // Wrap a FINS command in the TCP envelope
//!     let header = plc.command_header();
//!     session.write(&FinsTcpFrame::fins_command(&header, &[0x05, 0x01]))?;
//!
//!     registry.shutdown();
//!     registry.wait();
//!     Ok(())
//! }
//! ```
//!
//! ## Byte Buffer
//!
//! ```
//! use omron_fins_tcp::{ByteBuffer, FinsError};
//!
//! let mut buf = ByteBuffer::new();
//! buf.put_u16(0x0501);
//! buf.put_str("CJ2M");
//!
//! assert_eq!(buf.read_u16()?, 0x0501);
//! assert_eq!(buf.read_string(4)?, "CJ2M");
//!
//! // Reads past the written data fail and leave the cursor alone
//! assert!(matches!(buf.read_u8(), Err(FinsError::BufferOverrun { .. })));
//! # Ok::<(), FinsError>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, FinsError>`]. Every error maps onto a
//! stable [`ErrorCode`] that the connection context keeps as its last error.
//!
//! ```no_run
//! use omron_fins_tcp::{ConnectConfig, FinsError, FinsSystem, RawCodec, Registry, Session, SessionHandler};
//!
//! struct Ignore;
//!
//! impl SessionHandler<Vec<u8>> for Ignore {
//!     fn on_message(&self, _session: &Session<Vec<u8>>, _message: Vec<u8>) {}
//! }
//!
//! let registry = Registry::new();
//! let mut plc = FinsSystem::new();
//! let config = ConnectConfig::new("192.168.1.250", 9600);
//!
//! match plc.tcp_connect(&registry, &config, RawCodec, Ignore) {
//!     Ok(session) => println!("connected as session {}", session.id()),
//!     Err(FinsError::TryLater) => println!("device cooling down"),
//!     Err(FinsError::NoReadAddress) => println!("no address configured"),
//!     Err(e) => println!("connect failed: {} ({:?})", e, plc.last_error()),
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: connection lifecycle at
//! `debug`, rejected connects and failed writes at `warn`, fatal read-loop
//! errors at `error`, and decoded frames at `trace`. Install any `log`
//! backend to see them.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod buffer;
mod codec;
mod error;
mod guard;
mod header;
mod registry;
mod session;
mod system;
mod transport;

// Public re-exports
pub use buffer::ByteBuffer;
pub use codec::{
    Decoded, Decoder, Encoder, FinsTcpCodec, FinsTcpCommand, FinsTcpFrame, RawCodec, FINS_MAGIC,
    FINS_TCP_HEADER_SIZE, MAX_FINS_TCP_PAYLOAD, MAX_FRAME_LENGTH,
};
pub use error::{ErrorCode, FinsError, Result};
pub use guard::{ConnectionGuard, GuardPhase};
pub use header::{
    FinsHeader, NodeAddress, DEFAULT_GATEWAY_COUNT, FINS_HEADER_SIZE, ICF_COMMAND, ICF_RESPONSE_BIT,
};
pub use registry::{Registry, RegistryConfig, DEFAULT_QUEUE_CAPACITY};
pub use session::{Session, SessionHandler, UserValue};
pub use system::{CommType, ConnectConfig, FinsSystem, PlcMode, SystemLimits};
pub use transport::{
    TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FINS_PORT, FINS_PORT_MAX, FINS_PORT_RESERVED,
    FINS_TIMEOUT, READ_CHUNK_SIZE,
};
