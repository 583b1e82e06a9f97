//! Entry point for the `rtp` binary.
//!
//! Parses CLI arguments and dispatches into either **sender** or **receiver**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, stdin/stdout).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rtp_over_udp::packet::MAX_PAYLOAD;
use rtp_over_udp::{Config, ReceiverConnection, SenderConnection, Socket};

/// Reliable single-message transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read a message from stdin and deliver it to a receiver.
    Sender {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Receive one message and write it to stdout.
    Receiver {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Keep re-acknowledging duplicate ENDs for this long after closing.
        #[arg(long, default_value_t = 0)]
        linger_ms: u64,
        /// Give up on a silent sender after this long without progress.
        #[arg(long, default_value_t = 10_000)]
        idle_timeout_ms: u64,
    },
}

#[derive(Args)]
struct Endpoint {
    /// Receiver host name or IP address.
    host: String,
    /// Receiver UDP port.
    port: u16,
    /// Maximum number of outstanding unacknowledged packets.
    window_size: usize,
    /// ACK wait before retransmitting, in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
    /// Largest DATA payload in bytes.
    #[arg(long, default_value_t = MAX_PAYLOAD)]
    max_payload: usize,
}

impl Endpoint {
    fn config(&self) -> Config {
        Config {
            window_size: self.window_size,
            max_payload: self.max_payload,
            ack_timeout: Duration::from_millis(self.timeout_ms),
            ..Config::default()
        }
    }

    /// Resolve `host:port`, preferring IPv4 so that both ends of a
    /// `localhost` transfer land in the same address family.
    async fn resolve(&self) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("cannot resolve {}:{}", self.host, self.port))?
            .collect();
        let addr = pick_address(&addrs)
            .with_context(|| format!("no address for {}:{}", self.host, self.port))?;
        log::info!("Resolved {}:{} to {addr}", self.host, self.port);
        Ok(addr)
    }
}

fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Sender { endpoint } => {
            let config = endpoint.config();
            let peer = endpoint.resolve().await?;

            let mut message = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut message)
                .await
                .context("cannot read message from stdin")?;

            let socket = Socket::bind_for(peer).await?;
            log::info!("Sending {} byte(s) to {peer}", message.len());
            SenderConnection::new(socket, peer, config)?
                .send_message(&message)
                .await
                .context("transfer failed")?;
        }
        Mode::Receiver {
            endpoint,
            linger_ms,
            idle_timeout_ms,
        } => {
            let config = Config {
                linger: Duration::from_millis(linger_ms),
                idle_timeout: Duration::from_millis(idle_timeout_ms),
                ..endpoint.config()
            };
            let local = endpoint.resolve().await?;
            let socket = Socket::bind(local).await?;
            let message = ReceiverConnection::new(socket, config)?
                .run()
                .await
                .context("receive failed")?;

            let mut stdout = tokio::io::stdout();
            stdout.write_all(&message).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
