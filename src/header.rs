//! FINS node addressing and the routing header.
//!
//! Every FINS frame carried inside a FINS/TCP envelope starts with a 10-byte
//! routing header. The transport does not interpret commands, but it owns the
//! addressing: the local and remote network/node/unit triples given at
//! connect time and the service id sequence.
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | ICF | Information Control Field |
//! | 1 | RSV | Reserved (always 0x00) |
//! | 2 | GCT | Gateway Count |
//! | 3-5 | DNA/DA1/DA2 | Destination network/node/unit |
//! | 6-8 | SNA/SA1/SA2 | Source network/node/unit |
//! | 9 | SID | Service ID |
//!
//! # Example
//!
//! ```
//! use omron_fins_tcp::{ByteBuffer, FinsHeader, NodeAddress};
//!
//! let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 7);
//! let mut buf = ByteBuffer::new();
//! header.write_to(&mut buf);
//! assert_eq!(FinsHeader::read_from(&mut buf).unwrap(), header);
//! ```

use crate::buffer::ByteBuffer;
use crate::error::Result;

/// FINS routing header size in bytes.
pub const FINS_HEADER_SIZE: usize = 10;

/// ICF for a command that expects a response.
pub const ICF_COMMAND: u8 = 0x80;

/// Bit set in the ICF of a response.
pub const ICF_RESPONSE_BIT: u8 = 0x40;

/// Default gateway count for commands.
pub const DEFAULT_GATEWAY_COUNT: u8 = 0x02;

/// Network/node/unit triple identifying one FINS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeAddress {
    /// Network address (0 = local network).
    pub network: u8,
    /// Node address within the network.
    pub node: u8,
    /// Unit address within the node (0 = CPU unit).
    pub unit: u8,
}

impl NodeAddress {
    /// Creates a new node address.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::NodeAddress;
    ///
    /// let plc = NodeAddress::new(0, 1, 0);
    /// assert_eq!(plc.node, 1);
    /// ```
    pub fn new(network: u8, node: u8, unit: u8) -> Self {
        Self {
            network,
            node,
            unit,
        }
    }

    /// Returns the all-zero address used before a context is configured.
    pub fn local() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.network, self.node, self.unit)
    }
}

/// FINS routing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsHeader {
    /// Information Control Field.
    pub icf: u8,
    /// Reserved byte.
    pub rsv: u8,
    /// Gateway count.
    pub gct: u8,
    /// Destination endpoint.
    pub destination: NodeAddress,
    /// Source endpoint.
    pub source: NodeAddress,
    /// Service ID.
    pub sid: u8,
}

impl FinsHeader {
    /// Creates a command header that requests a response.
    pub fn new_command(destination: NodeAddress, source: NodeAddress, sid: u8) -> Self {
        Self {
            icf: ICF_COMMAND,
            rsv: 0x00,
            gct: DEFAULT_GATEWAY_COUNT,
            destination,
            source,
            sid,
        }
    }

    /// Returns whether the ICF marks this header as a response.
    pub fn is_response(&self) -> bool {
        self.icf & ICF_RESPONSE_BIT != 0
    }

    /// Appends the header to `buf`.
    pub fn write_to(&self, buf: &mut ByteBuffer) {
        buf.put_bytes(&[
            self.icf,
            self.rsv,
            self.gct,
            self.destination.network,
            self.destination.node,
            self.destination.unit,
            self.source.network,
            self.source.node,
            self.source.unit,
            self.sid,
        ]);
    }

    /// Reads a header from the read cursor of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::BufferOverrun`](crate::FinsError::BufferOverrun)
    /// if fewer than [`FINS_HEADER_SIZE`] bytes are readable.
    pub fn read_from(buf: &mut ByteBuffer) -> Result<Self> {
        let raw = buf.read_bytes(FINS_HEADER_SIZE)?;
        Ok(Self {
            icf: raw[0],
            rsv: raw[1],
            gct: raw[2],
            destination: NodeAddress::new(raw[3], raw[4], raw[5]),
            source: NodeAddress::new(raw[6], raw[7], raw[8]),
            sid: raw[9],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_address_display() {
        assert_eq!(NodeAddress::new(1, 20, 0).to_string(), "1.20.0");
        assert_eq!(NodeAddress::local(), NodeAddress::new(0, 0, 0));
    }

    #[test]
    fn test_command_header_layout() {
        let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 0x42);
        let mut buf = ByteBuffer::new();
        header.write_to(&mut buf);

        assert_eq!(
            buf.readable(),
            &[0x80, 0x00, 0x02, 0x00, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x42]
        );
        assert!(!header.is_response());
    }

    #[test]
    fn test_read_response_header() {
        let mut buf = ByteBuffer::from(&[0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01][..]);
        let header = FinsHeader::read_from(&mut buf).unwrap();

        assert!(header.is_response());
        assert_eq!(header.destination, NodeAddress::new(0, 1, 0));
        assert_eq!(header.source, NodeAddress::new(0, 10, 0));
        assert_eq!(header.sid, 0x01);
        assert_eq!(buf.read_length(), 0);
    }

    #[test]
    fn test_read_short_header_fails() {
        let mut buf = ByteBuffer::from(&[0xC0, 0x00, 0x02][..]);
        assert!(FinsHeader::read_from(&mut buf).is_err());
        assert_eq!(buf.read_pos(), 0);
    }
}
