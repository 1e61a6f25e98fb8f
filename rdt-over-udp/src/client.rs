//! Client sender engine: handshake, then a window-fill / receive loop.
//!
//! # Loop
//!
//! ```text
//!           ┌────────────────────────────────────────────┐
//!           ▼                                            │
//!   fill window ──▶ recv (timeout = RttEstimator) ──ACK──┤ slide base, record RTT
//!   (byte budget)          │                             │
//!                          └──timeout──▶ resend every ───┘
//!                                        in-flight segment
//! ```
//!
//! Execution is single-task and cooperative: the bounded receive is the only
//! suspension point besides socket sends.  [`Client::step`] runs one
//! iteration so callers (and tests) can observe progress; [`Client::run`]
//! loops until `target_packets` are cumulatively acknowledged.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError};
use crate::handshake::{self, HandshakeError};
use crate::packet::{PacketError, PacketType};
use crate::rtt::{RttEstimator, RttSummary};
use crate::sender::{AckedSegment, Admission, SenderWindow};
use crate::socket::{Socket, SocketError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// Payload sources
// ---------------------------------------------------------------------------

/// Supplies the payload for each new DATA segment.
pub trait PayloadSource {
    /// Next payload to offer the window, or `None` if nothing is ready.
    fn next_payload(&mut self) -> Option<Vec<u8>>;
}

/// Random bytes of a size drawn uniformly from `sizes`.
#[derive(Debug, Clone)]
pub struct RandomPayload {
    sizes: RangeInclusive<usize>,
}

impl RandomPayload {
    pub fn new(sizes: RangeInclusive<usize>) -> Self {
        Self { sizes }
    }
}

impl PayloadSource for RandomPayload {
    fn next_payload(&mut self) -> Option<Vec<u8>> {
        let mut rng = rand::rng();
        let size = rng.random_range(self.sizes.clone());
        let mut buf = vec![0u8; size];
        rng.fill(&mut buf[..]);
        Some(buf)
    }
}

/// A fixed list of payloads replayed in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPayloads {
    queue: VecDeque<Vec<u8>>,
}

impl ScriptedPayloads {
    pub fn new<I: IntoIterator<Item = Vec<u8>>>(payloads: I) -> Self {
        Self {
            queue: payloads.into_iter().collect(),
        }
    }
}

impl PayloadSource for ScriptedPayloads {
    fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Step outcome / report
// ---------------------------------------------------------------------------

/// What one loop iteration observed after filling the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A new cumulative ACK slid the window.
    Acked(AckedSegment),
    /// The receive timed out and this many segments were resent.
    Retransmitted { count: usize },
    /// A packet arrived but changed nothing (stale ACK, non-ACK, malformed).
    Ignored,
}

/// Counters gathered over a complete run.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub target: u32,
    pub retransmissions: u64,
    /// One sample per window-sliding ACK, in arrival order.
    pub rtt_samples: Vec<Duration>,
    /// Wall time from the start of the data phase to the final ACK.
    pub elapsed: Duration,
}

impl TransferReport {
    /// `target / (target + retransmissions)`, the figure reported at run end.
    pub fn loss_rate(&self) -> f64 {
        let target = f64::from(self.target);
        target / (target + self.retransmissions as f64)
    }

    pub fn rtt_summary(&self) -> Option<RttSummary> {
        RttSummary::from_samples(&self.rtt_samples)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sliding-window sender talking to one server.
pub struct Client<P = RandomPayload> {
    socket: Socket,
    peer: SocketAddr,
    config: ClientConfig,
    window: SenderWindow,
    rtt: RttEstimator,
    payloads: P,
    /// Payload drawn but not admitted last iteration; offered first next time.
    pending: Option<Vec<u8>>,
    /// Highest sequence number cumulatively acknowledged.
    acked: u32,
    started: Option<Instant>,
}

impl Client<RandomPayload> {
    /// Client drawing random payloads sized by `config.payload_size`.
    pub fn new(socket: Socket, peer: SocketAddr, config: ClientConfig) -> Result<Self, ClientError> {
        let payloads = RandomPayload::new(config.payload_size.clone());
        Self::with_payloads(socket, peer, config, payloads)
    }
}

impl<P: PayloadSource> Client<P> {
    pub fn with_payloads(
        socket: Socket,
        peer: SocketAddr,
        config: ClientConfig,
        payloads: P,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            window: SenderWindow::new(config.window_capacity_bytes),
            rtt: RttEstimator::new(
                config.initial_timeout,
                config.rtt_window,
                config.timeout_multiplier,
            ),
            socket,
            peer,
            config,
            payloads,
            pending: None,
            acked: 0,
            started: None,
        })
    }

    /// Run the handshake.  Failure means no data phase may be attempted.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        handshake::connect(
            &self.socket,
            self.peer,
            self.rtt.timeout(),
            self.config.handshake_attempts,
        )
        .await?;
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Handshake, then loop [`step`](Self::step) until done.
    pub async fn run(mut self) -> Result<TransferReport, ClientError> {
        self.connect().await?;
        while !self.is_done() {
            self.step().await?;
        }
        let report = self.report();
        log::info!(
            "[client] transfer complete: {} packets, {} retransmissions",
            report.target,
            report.retransmissions
        );
        Ok(report)
    }

    /// One iteration: fill the window, then wait for one packet or a timeout.
    pub async fn step(&mut self) -> Result<StepOutcome, ClientError> {
        self.fill_window().await?;

        match self.socket.recv_timeout(self.rtt.timeout()).await {
            Ok((pkt, _from)) if pkt.header.kind == PacketType::Ack => {
                let Some(acked) = self.window.on_ack(pkt.header.ack, Instant::now()) else {
                    log::trace!("[client] ← ACK {} ignored", pkt.header.ack);
                    return Ok(StepOutcome::Ignored);
                };
                self.rtt.record(acked.rtt);
                self.acked = u32::from(acked.seq);
                log::debug!(
                    "[client] ← ACK {} (bytes {}..={}) rtt={:.2}ms timeout={:?}",
                    acked.seq,
                    acked.start_byte,
                    acked.end_byte,
                    acked.rtt.as_secs_f64() * 1000.0,
                    self.rtt.timeout()
                );
                Ok(StepOutcome::Acked(acked))
            }
            Ok((pkt, _from)) => {
                log::trace!("[client] ignoring {:?}", pkt.header.kind);
                Ok(StepOutcome::Ignored)
            }
            Err(SocketError::Timeout(_)) => {
                let count = self.retransmit().await?;
                Ok(StepOutcome::Retransmitted { count })
            }
            Err(SocketError::Packet(e)) => {
                log::warn!("[client] dropping malformed packet: {e}");
                Ok(StepOutcome::Ignored)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `true` once the target count is cumulatively acknowledged.
    pub fn is_done(&self) -> bool {
        self.acked >= self.config.target_packets
    }

    pub fn acked(&self) -> u32 {
        self.acked
    }

    pub fn window(&self) -> &SenderWindow {
        &self.window
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            target: self.config.target_packets,
            retransmissions: self.window.total_retransmissions(),
            rtt_samples: self.rtt.samples().to_vec(),
            elapsed: self.started.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    /// Admit and send new segments while budget and target allow.
    async fn fill_window(&mut self) -> Result<(), ClientError> {
        while self.window.has_room()
            && u32::from(self.window.next_seq) <= self.config.target_packets
        {
            let Some(payload) = self.pending.take().or_else(|| self.payloads.next_payload())
            else {
                break;
            };
            match self.window.admit(payload, Instant::now())? {
                Admission::Sent(pkt) => {
                    self.socket.send_to(&pkt, self.peer).await?;
                    if let Some(seg) = self.window.segment(pkt.header.seq) {
                        log::debug!(
                            "[client] → DATA seq={} (bytes {}..={}) in_flight={}B",
                            pkt.header.seq,
                            seg.start_byte,
                            seg.end_byte,
                            self.window.in_flight_bytes()
                        );
                    }
                }
                Admission::Full(payload) => {
                    self.pending = Some(payload);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Resend every in-flight segment after a receive timeout.
    async fn retransmit(&mut self) -> Result<usize, ClientError> {
        let packets = self.window.retransmit_all(Instant::now());
        log::debug!(
            "[client] timeout after {:?}; retransmitting {} segment(s) from seq {}",
            self.rtt.timeout(),
            packets.len(),
            self.window.base_seq
        );
        for pkt in &packets {
            self.socket.send_to(pkt, self.peer).await?;
        }
        Ok(packets.len())
    }
}
