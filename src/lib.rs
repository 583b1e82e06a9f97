//! `rtp-over-udp`: reliable, ordered single-message transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  START / DATA / END  ┌──────────┐
//!  │  Sender  │─────────────────────▶│ Receiver │
//!  └────┬─────┘                      └─────┬────┘
//!       │        cumulative ACKs           │
//!       │◀─────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │        Sender/ReceiverConnection  │
//!  │  (owns engine + datagram channel) │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      wire format, checksum (serialise / deserialise / verify)
//! - [`receiver`]    receive-side reorder buffer and cumulative ACKs
//! - [`sender`]      Go-Back-N window over the chunked message
//! - [`connection`]  async drivers: handshake, transfer, close
//! - [`state`]       finite-state-machine types
//! - [`config`]      tunable protocol parameters
//! - [`socket`]      datagram channel trait and UDP implementation
//! - [`simulator`]   fault-injecting channel for testing

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::Config;
pub use connection::{
    receive_message, send_message, ConnError, ReceiverConnection, SenderConnection, TransferStats,
};
pub use packet::{Packet, PacketType};
pub use socket::{Datagram, Socket};
