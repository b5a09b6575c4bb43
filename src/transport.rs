//! TCP transport layer for FINS/TCP communication.
//!
//! [`TcpTransport`] owns one connected socket and knows nothing about FINS.
//! It dials (or adopts an accepted stream), hands out a reader clone for the
//! session's read loop, writes whole buffers, and shuts the socket down.
//!
//! Serial and UDP transports are not provided. A session only needs a
//! byte stream that can be cloned for reading and shut down from another
//! thread, so a different transport would slot in at this boundary.
//!
//! # Constants
//!
//! - [`DEFAULT_FINS_PORT`] - Default FINS port (9600)
//! - [`FINS_PORT_RESERVED`] / [`FINS_PORT_MAX`] - Valid port range, `[1024, 65535)`
//! - [`FINS_TIMEOUT`] - Protocol timeout driving the guard window (60 seconds)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - Dial timeout (2 seconds)
//! - [`READ_CHUNK_SIZE`] - Socket read size per iteration (512 bytes)

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{FinsError, Result};

/// Default FINS port.
pub const DEFAULT_FINS_PORT: u16 = 9600;

/// Lowest port accepted for a FINS target.
pub const FINS_PORT_RESERVED: u16 = 1024;

/// Upper bound (exclusive) of the accepted port range.
pub const FINS_PORT_MAX: u16 = 65535;

/// Protocol timeout. The reconnection guard waits twice this long.
pub const FINS_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Size of the transfer chunk used by the read loop.
pub const READ_CHUNK_SIZE: usize = 512;

/// One connected TCP socket.
pub struct TcpTransport {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpTransport {
    /// Dials `host:port`, trying each resolved address in turn.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` for a zero timeout and
    /// `FinsError::Io` if resolution or every connect attempt fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use omron_fins_tcp::TcpTransport;
    /// use std::time::Duration;
    ///
    /// let transport = TcpTransport::connect("192.168.1.10", 9600, Duration::from_secs(2)).unwrap();
    /// println!("connected to {}", transport.peer_addr());
    /// ```
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(FinsError::invalid_parameter(
                "connect_timeout",
                "must be greater than zero",
            ));
        }

        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => {
                    log::debug!("connect to {addr} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{host} resolved to no addresses"),
                )
            })
            .into())
    }

    /// Adopts an already connected stream, such as one returned by `accept`.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self { stream, peer_addr })
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns a second handle on the socket for the read loop.
    pub(crate) fn reader(&self) -> Result<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    /// Writes the whole buffer, blocking until it is sent.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        (&self.stream).write_all(data)?;
        Ok(())
    }

    /// Shuts down both directions, waking any thread blocked in a read.
    pub(crate) fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("shutdown of socket to {} failed: {e}", self.peer_addr);
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_FINS_PORT, 9600);
        assert_eq!(FINS_PORT_RESERVED, 1024);
        assert_eq!(FINS_PORT_MAX, 65535);
        assert_eq!(FINS_TIMEOUT, Duration::from_secs(60));
        assert_eq!(READ_CHUNK_SIZE, 512);
    }

    #[test]
    fn test_connect_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.peer_addr().port(), port);

        let (mut peer, _) = listener.accept().unwrap();
        transport.send(b"FINS").unwrap();
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"FINS");
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1));
        assert!(matches!(result, Err(FinsError::Io(_))));
    }

    #[test]
    fn test_connect_zero_timeout() {
        let result = TcpTransport::connect("127.0.0.1", 9600, Duration::ZERO);
        assert!(matches!(result, Err(FinsError::InvalidParameter { .. })));
    }

    #[test]
    fn test_shutdown_wakes_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let _peer = listener.accept().unwrap();

        let mut reader = transport.reader().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });
        transport.shutdown();
        assert!(matches!(handle.join().unwrap(), Ok(0) | Err(_)));
    }

    #[test]
    fn test_transport_debug() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = TcpTransport::connect("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("TcpTransport"));
        assert!(debug_str.contains(&addr.to_string()));
    }
}
