//! Example: connect to a PLC over FINS/TCP and exchange node addresses
//!
//! Run with: cargo run --example simple_connect -- 192.168.1.250
//!
//! This example demonstrates:
//! - Connection context and connect configuration
//! - Session handler callbacks
//! - The FINS/TCP node address handshake
//! - Reconnection guard behavior

use omron_fins_tcp::{
    ConnectConfig, FinsError, FinsSystem, FinsTcpCodec, FinsTcpCommand, FinsTcpFrame, NodeAddress,
    Registry, Session, SessionHandler,
};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::time::Duration;

// =========================================================================
// Session Handler
// =========================================================================
//
// on_message runs on the session's dispatch thread, in arrival order.
// Forward frames to the main thread so it can wait for the reply.

struct Forward {
    frames: Mutex<Sender<FinsTcpFrame>>,
}

impl SessionHandler<FinsTcpFrame> for Forward {
    fn on_open(&self, session: &Session<FinsTcpFrame>) {
        println!("Session {} opened to {}", session.id(), session.peer_addr());
    }

    fn on_message(&self, _session: &Session<FinsTcpFrame>, frame: FinsTcpFrame) {
        if let Ok(frames) = self.frames.lock() {
            let _ = frames.send(frame);
        }
    }

    fn on_error(&self, session: &Session<FinsTcpFrame>, error: &FinsError) {
        println!("Session {} failed: {}", session.id(), error);
    }

    fn on_close(&self, session: &Session<FinsTcpFrame>) {
        println!("Session {} closed", session.id());
    }
}

fn main() -> omron_fins_tcp::Result<()> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.250".to_string());

    // =========================================================================
    // Configuration
    // =========================================================================
    //
    // FINS uses a 3-component address: Network.Node.Unit
    //
    // | Component | Description              | Typical Value        |
    // |-----------|--------------------------|---------------------|
    // | Network   | Network number           | 0 (local network)   |
    // | Node      | Node number (1-254)      | Based on IP octet   |
    // | Unit      | Unit number              | 0 (CPU unit)        |

    let config = ConnectConfig::new(address, 9600)
        .with_local(NodeAddress::new(0, 10, 0))
        .with_remote(NodeAddress::new(0, 250, 0))
        // Arm the guard after 3 fatal session errors
        .with_error_max(3)
        .with_connect_timeout(Duration::from_secs(2));

    let registry = Registry::new();
    let mut plc = FinsSystem::new();
    let (tx, rx) = mpsc::channel();
    let handler = Forward {
        frames: Mutex::new(tx),
    };

    // =========================================================================
    // Connecting
    // =========================================================================

    println!("Connecting to {}:{}...", config.address, config.port);
    let session = match plc.tcp_connect(&registry, &config, FinsTcpCodec, handler) {
        Ok(session) => session,
        Err(e) => {
            println!("Connection error (expected if no PLC): {}", e);
            println!("Last error code: {:?}", plc.last_error());

            // A failed dial arms the guard; retrying now fails fast.
            let retry = plc.tcp_connect(
                &registry,
                &config,
                FinsTcpCodec,
                Forward {
                    frames: Mutex::new(mpsc::channel().0),
                },
            );
            if let Err(FinsError::TryLater) = retry {
                println!(
                    "Retry rejected, guard cooling down for {:?}",
                    plc.guard().window()
                );
            }
            return Ok(());
        }
    };

    // =========================================================================
    // Node Address Handshake
    // =========================================================================

    session.write(&FinsTcpFrame::node_address_request(plc.local().node))?;
    match rx.recv_timeout(Duration::from_secs(2)) {
        Ok(frame) if frame.command == FinsTcpCommand::NodeAddressResponse => {
            if let Some((client, server)) = frame.node_addresses() {
                println!("Client node {}, server node {}", client, server);
            }
        }
        Ok(frame) => println!("Unexpected frame: {:?}", frame),
        Err(_) => println!("No reply from PLC"),
    }

    // =========================================================================
    // Routing Header
    // =========================================================================
    //
    // Each FINS command carries a 10-byte header with a fresh service id.

    let header = plc.command_header();
    println!("Next command header: {:?}", header);

    registry.shutdown();
    registry.wait();
    println!("\nConnect example completed!");

    Ok(())
}
