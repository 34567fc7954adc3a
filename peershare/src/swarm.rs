use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, RwLock},
    task::{JoinHandle, JoinSet},
    time,
};
use crate::{
    choker::Choker,
    config::{CommonConfig, Config, ConfigError, PeerInfo},
    disk::{self, CommandToDisk, DiskError, DiskTx},
    event,
    monitor::TerminationMonitor,
    p2p::{self, state::SharedState, PeerCommand, PeerSession, PeerTx},
    registry::{PeerHandle, Registry},
    stats::SwarmStats,
    store::{PieceStore, StoreError, StoreInfo},
    EventTx,
    PeerId,
    SwarmEvent,
};

// Time sessions get to close on their own before they are aborted.
const SHUTDOWN_GRACE: time::Duration = time::Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("swarm task panicked")]
    SwarmPanic,

}

impl<T> From<mpsc::error::SendError<T>> for SwarmError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        SwarmError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
pub type SwarmTx = mpsc::UnboundedSender<CommandToSwarm>;
type SwarmRx = mpsc::UnboundedReceiver<CommandToSwarm>;

pub enum CommandToSwarm {

    // Sent by a session once the handshake is verified.
    PeerConnected { id: PeerId, peer_tx: PeerTx, state: SharedState },

    // Sent by a registered session as it ends.
    PeerDisconnected { id: PeerId, peer_tx: PeerTx },

    // A session stored a piece we didn't have.
    PieceAcquired { idx: usize },

    // A remote's bitfield became full.
    PeerComplete { id: PeerId },

    // From the handle, every required peer is known to be done.
    DeclareComplete,

    Shutdown,

}

// Shared by every session of the swarm.
#[derive(Debug)]
pub struct SwarmContext {

    pub local_id: PeerId,

    pub info: StoreInfo,

    // Pieces held locally.
    pub store: RwLock<PieceStore>,

    // Configured peers, used to vet inbound handshakes.
    pub peers: Vec<PeerInfo>,

    // Commands to the swarm.
    pub swarm_tx: SwarmTx,

    // Commands to disk.
    pub disk_tx: DiskTx,

}

impl SwarmContext {
    pub fn is_known_peer(&self, id: PeerId) -> bool {
        id != self.local_id && self.peers.iter().any(|p| p.id == id)
    }
}

pub struct Swarm {

    // Read-only state accessible by sessions.
    ctx: Arc<SwarmContext>,

    config: CommonConfig,

    // Peers we dial ourselves.
    outbound: Vec<PeerInfo>,

    listener: TcpListener,

    // Sessions that completed a handshake.
    registry: Registry,

    choker: Choker,

    monitor: TerminationMonitor,

    // Every session task, registered or not.
    sessions: JoinSet<p2p::Result<()>>,

    swarm_rx: SwarmRx,

    event_tx: EventTx,

    disk_handle: Option<JoinHandle<disk::Result<()>>>,

    // Bytes (uploaded, downloaded) over sessions that have ended.
    retired: (u64, u64),

}

impl Swarm {

    // Loads local pieces, starts the disk task and binds the listener.
    pub async fn new(config: Config, event_tx: EventTx) -> Result<(Self, SwarmTx)> {

        let local = config
            .local_peer()
            .cloned()
            .ok_or(ConfigError::UnknownPeer(config.local_id))?;
        let info = config.common.store_info();
        let path = config.file_path();

        let store = if local.has_file {
            let data = disk::load_file(&path, &info).await?;
            PieceStore::full(info, data)?
        } else {
            PieceStore::new(info)
        };
        tracing::info!("holding {}/{} pieces", store.num_have(), info.num_pieces);

        let (disk_handle, disk_tx) = disk::spawn_disk(&path, info, local.has_file)?;

        let listener = TcpListener::bind(("0.0.0.0", local.port)).await?;
        tracing::info!("listening on {}", listener.local_addr()?);

        let ids: Vec<PeerId> = config.peers.iter().map(|p| p.id).collect();
        let (swarm_tx, swarm_rx) = mpsc::unbounded_channel();
        let outbound = config.outbound_peers().cloned().collect();

        Ok((
            Swarm {
                ctx: Arc::new(SwarmContext {
                    local_id: config.local_id,
                    info,
                    store: RwLock::new(store),
                    peers: config.peers,
                    swarm_tx: swarm_tx.clone(),
                    disk_tx,
                }),
                choker: Choker::new(config.common.num_preferred_neighbors),
                config: config.common,
                outbound,
                listener,
                registry: Registry::new(ids.iter().copied()),
                monitor: TerminationMonitor::new(config.local_id, ids),
                sessions: JoinSet::new(),
                swarm_rx,
                event_tx,
                disk_handle: Some(disk_handle),
                retired: (0, 0),
            },
            swarm_tx,
        ))
    }

    #[tracing::instrument(skip_all, name = "swarm", fields(local = self.ctx.local_id))]
    pub async fn run(&mut self) -> Result<()> {

        if self.ctx.store.read().await.is_complete() {
            self.monitor.local_complete();
            self.event_tx.send(SwarmEvent::LocalComplete).ok();
        }

        self.connect_to_peers();

        // First ticks fire one full interval after start.
        let unchoking = self.config.unchoking_interval;
        let optimistic = self.config.optimistic_unchoking_interval;
        let mut unchoke_ticker = time::interval_at(time::Instant::now() + unchoking, unchoking);
        let mut optimistic_ticker = time::interval_at(time::Instant::now() + optimistic, optimistic);

        // Top level swarm loop.
        loop {
            tokio::select! {

                _ = unchoke_ticker.tick() => {
                    self.recompute_preferred().await;
                    self.send_stats().await;
                },

                _ = optimistic_ticker.tick() => self.optimistic_unchoke(),

                new_peer_conn = self.listener.accept() => {
                    match new_peer_conn {
                        Ok((stream, address)) => {
                            tracing::debug!("inbound connection from {}", address);
                            self.spawn_session(PeerSession::inbound(self.ctx.clone()), Some(stream));
                        },
                        Err(e) => tracing::warn!("inbound peer connection error: {}", e),
                    }
                }

                Some(cmd) = self.swarm_rx.recv() => {
                    if !self.handle_command(cmd).await? {
                        break;
                    }
                }

                Some(res) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = res {
                        tracing::error!("session task failed: {}", e);
                    }
                }

            }

            if self.monitor.poll() {
                tracing::info!("every peer has the complete file");
                self.shutdown().await?;
                self.event_tx.send(SwarmEvent::SwarmComplete).ok();
                return Ok(());
            }
        }

        self.shutdown().await
    }

    fn connect_to_peers(&mut self) {
        tracing::info!("connecting to {} peers", self.outbound.len());
        for peer in std::mem::take(&mut self.outbound) {
            self.spawn_session(PeerSession::outbound(self.ctx.clone(), peer), None);
        }
    }

    fn spawn_session(&mut self, session: PeerSession, stream: Option<TcpStream>) {
        self.sessions.spawn(session.start_session(stream));
    }

    // Returns false once the swarm should stop.
    async fn handle_command(&mut self, cmd: CommandToSwarm) -> Result<bool> {
        match cmd {

            CommandToSwarm::PeerConnected { id, peer_tx, state } => {
                if let Err(duplicate) = self.registry.insert(PeerHandle { id, peer_tx, state }) {
                    tracing::warn!("already connected to peer {}, closing new session", id);
                    duplicate.peer_tx.send(PeerCommand::Shutdown).ok();
                }
            },

            CommandToSwarm::PeerDisconnected { id, peer_tx } => {
                if let Some(handle) = self.registry.remove(id, &peer_tx) {
                    tracing::info!("peer {} disconnected", id);
                    self.choker.remove(id);
                    let throughput = handle.state.get().throughput;
                    self.retired.0 += throughput.up.total();
                    self.retired.1 += throughput.down.total();
                }
            },

            CommandToSwarm::PieceAcquired { idx } => self.handle_piece_acquired(idx).await?,

            CommandToSwarm::PeerComplete { id } => {
                if self.monitor.peer_complete(id) {
                    tracing::info!("peer {} has the complete file", id);
                }
            },

            CommandToSwarm::DeclareComplete => self.monitor.declare_swarm_complete(),

            CommandToSwarm::Shutdown => return Ok(false),

        }
        Ok(true)
    }

    async fn handle_piece_acquired(&mut self, idx: usize) -> Result<()> {
        self.registry.broadcast(PeerCommand::Have(idx));

        let (missing, complete) = {
            let store = self.ctx.store.read().await;
            (store.missing().len(), store.is_complete())
        };
        tracing::debug!("piece {} acquired, {} still missing", idx, missing);
        self.send_stats().await;

        if complete && !self.monitor.is_local_complete() {
            event::download_complete(self.ctx.local_id);
            self.monitor.local_complete();
            self.event_tx.send(SwarmEvent::LocalComplete).ok();
        }
        Ok(())
    }

    async fn recompute_preferred(&mut self) {
        let is_complete = self.ctx.store.read().await.is_complete();
        let snapshots = self.registry.snapshots();
        let decision = self.choker.recompute_preferred(&snapshots, is_complete, &mut rand::thread_rng());

        for id in &decision.choke {
            self.registry.send(*id, PeerCommand::Choke);
        }
        for id in &decision.unchoke {
            self.registry.send(*id, PeerCommand::Unchoke);
        }
        if decision.changed {
            event::preferred_neighbors(self.ctx.local_id, &decision.preferred);
        }
    }

    fn optimistic_unchoke(&mut self) {
        let snapshots = self.registry.peek();
        if let Some(id) = self.choker.pick_optimistic(&snapshots, &mut rand::thread_rng()) {
            self.registry.send(id, PeerCommand::Unchoke);
            event::optimistic_neighbor(self.ctx.local_id, id);
        }
    }

    async fn build_stats(&self) -> SwarmStats {
        let (uploaded, downloaded) = self.registry.totals();
        SwarmStats {
            num_have: self.ctx.store.read().await.num_have(),
            num_pieces: self.ctx.info.num_pieces,
            num_peers: self.registry.len(),
            uploaded: self.retired.0 + uploaded,
            downloaded: self.retired.1 + downloaded,
        }
    }

    async fn send_stats(&self) {
        let stats = self.build_stats().await;
        self.event_tx.send(SwarmEvent::Progress(stats)).ok();
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.registry.is_empty() {
            tracing::info!("disconnecting from {} peers", self.registry.len());
        }
        self.registry.shutdown_all();

        // Sessions still dialling or handshaking never got the command.
        let drained = time::timeout(SHUTDOWN_GRACE, async {
            while let Some(res) = self.sessions.join_next().await {
                if let Err(e) = res {
                    tracing::error!("session task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("aborting {} sessions", self.sessions.len());
            self.sessions.shutdown().await;
        }

        // Queued writes land before the disk task stops.
        self.ctx.disk_tx.send(CommandToDisk::Shutdown).ok();
        if let Some(handle) = self.disk_handle.take() {
            match handle.await {
                Ok(res) => res?,
                Err(e) => tracing::error!("disk task failed: {}", e),
            }
        }
        Ok(())
    }

}
