//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing) and the run-end report.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use rdt_over_udp::client::{Client, TransferReport};
use rdt_over_udp::config::{
    ClientConfig, DispatchMode, ServerConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_SERVER_PORT,
};
use rdt_over_udp::server::Server;
use rdt_over_udp::socket::Socket;

/// Sliding-window reliable data transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Copy, ValueEnum)]
enum DispatchKind {
    /// One queue-fed task per client (FIFO per connection).
    Worker,
    /// One task per datagram, serialized by a per-client lock.
    Task,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the receiving server.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVER_PORT)))]
        bind: SocketAddr,
        /// Probability of discarding each arriving DATA packet.
        #[arg(long, default_value_t = 0.3)]
        drop_rate: f64,
        #[arg(long, value_enum, default_value_t = DispatchKind::Worker)]
        mode: DispatchKind,
        /// Per-client queue depth (worker mode).
        #[arg(long, default_value_t = 64)]
        queue_depth: usize,
        /// Maximum concurrent clients (worker mode).
        #[arg(long, default_value_t = 1024)]
        max_connections: usize,
        /// Seconds without DATA before a client's worker is evicted (worker mode).
        #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
        idle_timeout_secs: u64,
        /// Maximum concurrently running handler tasks (task mode; unbounded if absent).
        #[arg(long)]
        max_tasks: Option<usize>,
    },
    /// Send a run of DATA packets to a server.
    Client {
        /// Server IP address.
        ip: IpAddr,
        /// Server port.
        port: u16,
        /// Window capacity in payload bytes.
        #[arg(long, default_value_t = 400)]
        window: usize,
        /// Initial receive timeout in milliseconds.
        #[arg(long, default_value_t = 300)]
        timeout_ms: u64,
        /// Number of packets to deliver.
        #[arg(long, default_value_t = 30)]
        packets: u32,
        #[arg(long, default_value_t = 40)]
        min_payload: usize,
        #[arg(long, default_value_t = 80)]
        max_payload: usize,
        /// SYN attempts before giving up.
        #[arg(long, default_value_t = 1)]
        handshake_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            drop_rate,
            mode,
            queue_depth,
            max_connections,
            idle_timeout_secs,
            max_tasks,
        } => {
            let dispatch = match mode {
                DispatchKind::Worker => DispatchMode::Worker {
                    queue_depth,
                    max_connections,
                    idle_timeout: Duration::from_secs(idle_timeout_secs),
                },
                DispatchKind::Task => DispatchMode::TaskPerDatagram { max_tasks },
            };
            let config = ServerConfig {
                bind,
                drop_rate,
                dispatch,
            };
            let server = Server::bind(config)
                .await
                .with_context(|| format!("starting server on {bind}"))?;
            server.run().await;
        }
        Mode::Client {
            ip,
            port,
            window,
            timeout_ms,
            packets,
            min_payload,
            max_payload,
            handshake_attempts,
        } => {
            let peer = SocketAddr::new(ip, port);
            let config = ClientConfig {
                window_capacity_bytes: window,
                initial_timeout: Duration::from_millis(timeout_ms),
                target_packets: packets,
                payload_size: min_payload..=max_payload,
                handshake_attempts,
                ..ClientConfig::default()
            };
            let local = match peer {
                SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
                SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
            };
            let socket = Socket::bind(local).await.context("binding client socket")?;

            log::info!("Starting client, sending {packets} packets to {peer}");
            let client = Client::new(socket, peer, config)?;
            let report = client
                .run()
                .await
                .with_context(|| format!("transfer to {peer}"))?;
            print_report(&report);
        }
    }

    Ok(())
}

fn print_report(report: &TransferReport) {
    println!("loss rate: {:.2}%", report.loss_rate() * 100.0);
    println!("elapsed: {:.2}s", report.elapsed.as_secs_f64());
    if let Some(rtt) = report.rtt_summary() {
        println!("max RTT: {:.2}ms", rtt.max_ms);
        println!("min RTT: {:.2}ms", rtt.min_ms);
        println!("mean RTT: {:.2}ms", rtt.mean_ms);
        println!("RTT std dev: {:.2}ms", rtt.std_dev_ms);
    }
}
