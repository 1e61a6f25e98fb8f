//! `rdt-over-udp`: sliding-window reliable data transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  client                                         server
//!  ┌──────────────┐    DATA (byte-budgeted)   ┌──────────────────┐
//!  │   Client     │──────────────────────────▶│  Server dispatch │
//!  │ SenderWindow │                           │  (per address)   │
//!  │ RttEstimator │◀──────────────────────────│  LossSimulator   │
//!  └──────┬───────┘     cumulative ACKs       │  Connection      │
//!         │                                   └────────┬─────────┘
//!  ┌──────▼──────────────────────────────────────────────▼──────┐
//!  │                 Socket (tokio UdpSocket)                   │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`socket`]: async UDP socket abstraction with bounded receive
//! - [`handshake`]: SYN / SYN-ACK / ACK connection establishment
//! - [`rtt`]: RTT samples and the adaptive timeout
//! - [`sender`]: byte-budgeted sliding-window state
//! - [`client`]: sender engine loop and run report
//! - [`simulator`]: per-packet loss simulation on the server
//! - [`receiver`]: per-connection in-order / duplicate-ACK state
//! - [`server`]: concurrent per-address dispatch
//! - [`config`]: client and server parameters

pub mod client;
pub mod config;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
