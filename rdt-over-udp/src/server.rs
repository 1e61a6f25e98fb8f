//! Multi-client server: one receive loop fanning datagrams out per address.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────┐
//!  UDP ──recv──▶  │  dispatch loop (decode, SYN)  │
//!                 └──────┬──────────────┬─────────┘
//!          Worker mode   │              │   TaskPerDatagram mode
//!   ┌────────────────────▼───┐   ┌──────▼─────────────────────────────┐
//!   │ addr → mpsc::Sender    │   │ spawn per datagram                 │
//!   │ one task per client,   │   │ RwLock<HashMap<addr, Arc<Mutex<>>>>│
//!   │ FIFO, owns Connection  │   │ serialized by the per-conn Mutex   │
//!   └────────────────────────┘   └────────────────────────────────────┘
//! ```
//!
//! In both modes a DATA packet is run past the [`LossSimulator`] and then the
//! connection's [`Connection::on_data`] while the connection is held
//! exclusively.  Per-packet failures are logged and never stop the loop.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, DispatchMode, ServerConfig};
use crate::handshake;
use crate::packet::{Header, Packet, PacketType};
use crate::receiver::{Connection, ReceiveAction};
use crate::simulator::LossSimulator;
use crate::socket::{Socket, SocketError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server configuration: {0}")]
    Config(#[from] ConfigError),
    /// DATA from an address that never completed a SYN.
    #[error("no connection for {0}")]
    UnknownConnection(SocketAddr),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

type ConnectionTable = Arc<RwLock<HashMap<SocketAddr, Arc<Mutex<Connection>>>>>;

/// A live worker: its inbound queue and the task draining it.
struct WorkerHandle {
    queue: mpsc::Sender<u16>,
    task: JoinHandle<()>,
}

/// Worker-mode connection table.  Only the receive loop touches it.
struct WorkerPool {
    queue_depth: usize,
    max_connections: usize,
    idle_timeout: Duration,
    workers: HashMap<SocketAddr, WorkerHandle>,
}

impl WorkerPool {
    fn new(queue_depth: usize, max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            queue_depth,
            max_connections,
            idle_timeout,
            workers: HashMap::new(),
        }
    }

    /// Forget workers whose task has exited (idle eviction or panic).
    fn reap(&mut self) {
        self.workers.retain(|addr, w| {
            let live = !w.queue.is_closed();
            if !live {
                log::debug!("[server] releasing slot of {addr}");
            }
            live
        });
    }

    fn is_full_for(&self, addr: &SocketAddr) -> bool {
        !self.workers.contains_key(addr) && self.workers.len() >= self.max_connections
    }

    /// Install `handle` for `addr`, aborting any worker it replaces so one
    /// address never has two live state machines.
    fn install(&mut self, addr: SocketAddr, handle: WorkerHandle) {
        if let Some(old) = self.workers.insert(addr, handle) {
            old.task.abort();
            log::debug!("[server] {addr} re-handshaked; state reset");
        }
    }
}

/// Per-mode dispatch state owned by the receive loop.
enum Dispatcher {
    Workers(WorkerPool),
    Tasks {
        connections: ConnectionTable,
        limit: Option<Arc<Semaphore>>,
    },
}

impl Dispatcher {
    fn new(mode: DispatchMode) -> Self {
        match mode {
            DispatchMode::Worker {
                queue_depth,
                max_connections,
                idle_timeout,
            } => Dispatcher::Workers(WorkerPool::new(queue_depth, max_connections, idle_timeout)),
            DispatchMode::TaskPerDatagram { max_tasks } => Dispatcher::Tasks {
                connections: Arc::new(RwLock::new(HashMap::new())),
                limit: max_tasks.map(|n| Arc::new(Semaphore::new(n))),
            },
        }
    }
}

/// A bound server ready to [`run`](Server::run).
pub struct Server {
    socket: Arc<Socket>,
    loss: LossSimulator,
    dispatch: DispatchMode,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let loss = LossSimulator::new(config.drop_rate)?;
        let socket = Socket::bind(config.bind).await?;
        Ok(Self {
            socket: Arc::new(socket),
            loss,
            dispatch: config.dispatch,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serve forever.  Only external cancellation (dropping or aborting the
    /// task) stops the loop.
    pub async fn run(self) {
        let mut dispatcher = Dispatcher::new(self.dispatch);
        log::info!(
            "[server] listening on {} (drop rate {:.2}, {:?})",
            self.socket.local_addr,
            self.loss.drop_rate(),
            self.dispatch
        );

        loop {
            let (pkt, addr) = match self.socket.recv_from().await {
                Ok(v) => v,
                Err(SocketError::Packet(e)) => {
                    log::warn!("[server] dropping malformed datagram: {e}");
                    continue;
                }
                Err(e) => {
                    log::warn!("[server] receive failed: {e}");
                    continue;
                }
            };

            match &mut dispatcher {
                Dispatcher::Workers(pool) => self.route_to_worker(pool, pkt, addr).await,
                Dispatcher::Tasks { connections, limit } => {
                    self.spawn_handler(connections, limit.as_ref(), pkt, addr)
                        .await
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Worker mode
    // -----------------------------------------------------------------------

    async fn route_to_worker(&self, pool: &mut WorkerPool, pkt: Packet, addr: SocketAddr) {
        match pkt.header.kind {
            PacketType::Syn => {
                pool.reap();
                if pool.is_full_for(&addr) {
                    log::warn!(
                        "[server] refusing SYN from {addr}: {} connections open",
                        pool.max_connections
                    );
                    return;
                }
                if let Err(e) = self.socket.send_to(&handshake::syn_ack(&pkt.header), addr).await {
                    log::warn!("[server] SYN-ACK to {addr} failed: {e}");
                    return;
                }
                let (queue, rx) = mpsc::channel(pool.queue_depth);
                let task = tokio::spawn(connection_worker(
                    self.socket.clone(),
                    addr,
                    self.loss,
                    pool.idle_timeout,
                    rx,
                ));
                pool.install(addr, WorkerHandle { queue, task });
                log::info!("[server] connection from {addr}");
            }
            PacketType::Data => {
                let Some(worker) = pool.workers.get(&addr) else {
                    log::debug!("[server] {}", ServerError::UnknownConnection(addr));
                    return;
                };
                match worker.queue.try_send(pkt.header.seq) {
                    Ok(()) => {}
                    Err(TrySendError::Full(seq)) => {
                        log::warn!("[server] queue for {addr} full; dropping DATA #{seq}");
                    }
                    Err(TrySendError::Closed(seq)) => {
                        log::debug!("[server] worker for {addr} has exited; dropping DATA #{seq}");
                        pool.workers.remove(&addr);
                    }
                }
            }
            other => log::trace!("[server] ignoring {other:?} from {addr}"),
        }
    }

    // -----------------------------------------------------------------------
    // Task-per-datagram mode
    // -----------------------------------------------------------------------

    async fn spawn_handler(
        &self,
        connections: &ConnectionTable,
        limit: Option<&Arc<Semaphore>>,
        pkt: Packet,
        addr: SocketAddr,
    ) {
        let socket = self.socket.clone();
        let connections = connections.clone();
        let loss = self.loss;

        // Waiting for a permit here holds up the receive loop, which is the cap.
        let permit = match limit {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(p) => Some(p),
                Err(_closed) => return,
            },
            None => None,
        };

        match pkt.header.kind {
            PacketType::Syn => spawn_with_permit(permit, async move {
                if let Err(e) = accept_syn(&socket, &connections, &pkt.header, addr).await {
                    log::warn!("[server] SYN from {addr}: {e}");
                }
            }),
            PacketType::Data => spawn_with_permit(permit, async move {
                match data_on_shared(&socket, &connections, loss, pkt.header.seq, addr).await {
                    Ok(()) => {}
                    Err(e @ ServerError::UnknownConnection(_)) => log::debug!("[server] {e}"),
                    Err(e) => log::warn!("[server] DATA from {addr}: {e}"),
                }
            }),
            other => log::trace!("[server] ignoring {other:?} from {addr}"),
        }
    }
}

fn spawn_with_permit<F>(permit: Option<OwnedSemaphorePermit>, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        fut.await;
        drop(permit);
    });
}

/// Install fresh state (overwriting any existing entry), then reply SYN-ACK.
///
/// The entry must be visible before the SYN-ACK leaves, otherwise the
/// client's first DATA can race a handler that finds no connection.
async fn accept_syn(
    socket: &Socket,
    connections: &ConnectionTable,
    syn: &Header,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    connections
        .write()
        .await
        .insert(addr, Arc::new(Mutex::new(Connection::new())));
    socket.send_to(&handshake::syn_ack(syn), addr).await?;
    log::info!("[server] connection from {addr}");
    Ok(())
}

async fn data_on_shared(
    socket: &Socket,
    connections: &ConnectionTable,
    loss: LossSimulator,
    seq: u16,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let conn = connections
        .read()
        .await
        .get(&addr)
        .cloned()
        .ok_or(ServerError::UnknownConnection(addr))?;
    let mut conn = conn.lock().await;
    handle_data(socket, addr, loss, &mut conn, seq).await
}

// ---------------------------------------------------------------------------
// Shared per-packet logic
// ---------------------------------------------------------------------------

/// Drain one connection's queue until it is closed or stays empty for
/// `idle`.  Exiting drops the receiver, which marks the slot reapable.
async fn connection_worker(
    socket: Arc<Socket>,
    peer: SocketAddr,
    loss: LossSimulator,
    idle: Duration,
    mut queue: mpsc::Receiver<u16>,
) {
    let mut conn = Connection::new();
    loop {
        let seq = match tokio::time::timeout(idle, queue.recv()).await {
            Ok(Some(seq)) => seq,
            Ok(None) => break,
            Err(_elapsed) => {
                log::debug!("[server] {peer} idle for {idle:?}; evicting");
                break;
            }
        };
        if let Err(e) = handle_data(&socket, peer, loss, &mut conn, seq).await {
            log::warn!("[server] DATA from {peer}: {e}");
        }
    }
    log::debug!("[server] worker for {peer} stopped");
}

/// Loss draw, state update and reply for one DATA packet.  The caller holds
/// the connection exclusively for the whole call.
async fn handle_data(
    socket: &Socket,
    peer: SocketAddr,
    loss: LossSimulator,
    conn: &mut Connection,
    seq: u16,
) -> Result<(), ServerError> {
    if loss.should_drop() {
        log::debug!("[server] simulated loss: DATA #{seq} from {peer}");
        return Ok(());
    }

    let action = conn.on_data(seq);
    match action {
        ReceiveAction::Ack(n) => log::debug!("[server] DATA #{n} from {peer}; → ACK {n}"),
        ReceiveAction::DuplicateAck(n) => log::debug!(
            "[server] out-of-order DATA #{seq} from {peer} (expected #{}); → ACK {n}",
            conn.expected_seq
        ),
        ReceiveAction::Suppressed => log::debug!(
            "[server] out-of-order DATA #{seq} from {peer} (expected #{})",
            conn.expected_seq
        ),
    }

    if let Some(n) = action.ack_number() {
        socket.send_to(&Packet::ack(n), peer).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_follows_mode() {
        match Dispatcher::new(DispatchMode::default()) {
            Dispatcher::Workers(pool) => {
                assert_eq!(pool.queue_depth, 64);
                assert_eq!(pool.max_connections, 1024);
                assert_eq!(pool.idle_timeout, crate::config::DEFAULT_IDLE_TIMEOUT);
                assert!(pool.workers.is_empty());
            }
            Dispatcher::Tasks { .. } => panic!("default should be worker mode"),
        }

        match Dispatcher::new(DispatchMode::TaskPerDatagram { max_tasks: Some(2) }) {
            Dispatcher::Tasks { limit, .. } => {
                assert_eq!(limit.unwrap().available_permits(), 2)
            }
            Dispatcher::Workers(_) => panic!("expected task mode"),
        }
    }

    async fn lossless_server() -> Server {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            drop_rate: 0.0,
            ..ServerConfig::default()
        };
        Server::bind(config).await.unwrap()
    }

    fn syn() -> Packet {
        Packet::control(PacketType::Syn, handshake::CLIENT_ISN, 0)
    }

    #[tokio::test]
    async fn re_syn_aborts_previous_worker() {
        let server = lossless_server().await;
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = peer.local_addr;
        let mut pool = WorkerPool::new(8, 4, Duration::from_secs(30));

        server.route_to_worker(&mut pool, syn(), addr).await;
        let old_queue = pool.workers[&addr].queue.clone();

        server.route_to_worker(&mut pool, syn(), addr).await;
        tokio::time::timeout(Duration::from_secs(2), old_queue.closed())
            .await
            .expect("old worker still running after re-SYN");
        assert_eq!(pool.workers.len(), 1);
        assert!(!pool.workers[&addr].queue.is_closed());
    }

    #[tokio::test]
    async fn idle_worker_frees_its_slot() {
        let server = lossless_server().await;
        let first = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let second = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut pool = WorkerPool::new(8, 1, Duration::from_millis(50));

        server.route_to_worker(&mut pool, syn(), first.local_addr).await;
        assert!(pool.is_full_for(&second.local_addr));

        let queue = pool.workers[&first.local_addr].queue.clone();
        tokio::time::timeout(Duration::from_secs(2), queue.closed())
            .await
            .expect("idle worker never exited");

        server.route_to_worker(&mut pool, syn(), second.local_addr).await;
        assert!(pool.workers.contains_key(&second.local_addr));
        assert!(!pool.workers.contains_key(&first.local_addr));
    }

    #[tokio::test]
    async fn bind_rejects_bad_drop_rate() {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            drop_rate: 2.0,
            ..ServerConfig::default()
        };
        let err = Server::bind(config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(ConfigError::DropRate(_))));
    }

    #[tokio::test]
    async fn data_for_unknown_address_is_rejected() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let table: ConnectionTable = Arc::new(RwLock::new(HashMap::new()));
        let stranger: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let err = data_on_shared(&socket, &table, LossSimulator::lossless(), 1, stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownConnection(a) if a == stranger));
    }
}
