use tokio::sync::mpsc;

mod bitfield;
mod choker;
mod config;
mod disk;
mod event;
mod monitor;
mod p2p;
mod picker;
mod registry;
mod stats;
mod store;
mod swarm;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// Configured identity of a peer, 4 bytes big-endian on the wire.
pub type PeerId = u32;

// Signals the process entry point waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmEvent {

    // Sent for every acquired piece and every unchoking interval.
    Progress(SwarmStats),

    // Every piece of the file is held locally.
    LocalComplete,

    // Every configured peer holds the whole file and the swarm has shut down.
    SwarmComplete,

}

type EventTx = mpsc::UnboundedSender<SwarmEvent>;
pub type EventRx = mpsc::UnboundedReceiver<SwarmEvent>;

use swarm::{CommandToSwarm, SwarmTx};

// Re-exports
pub use config::{CommonConfig, Config, ConfigError, PeerInfo};
pub use disk::DiskError;
pub use event::TARGET as EVENT_TARGET;
pub use p2p::PeerError;
pub use stats::SwarmStats;
pub use store::{StoreError, StoreInfo};
pub use swarm::{Result, SwarmError};

// Binds the listening socket, loads local pieces and starts the swarm task.
pub async fn start_peer(config: Config) -> Result<(Handle, EventRx)> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (mut swarm, swarm_tx) = swarm::Swarm::new(config, event_tx).await?;
    let swarm_handle = tokio::spawn(async move {
        if let Err(e) = swarm.run().await {
            tracing::error!("swarm runtime error: {}", e);
        }
    });
    Ok((
        Handle {
            swarm_tx,
            swarm_handle,
        },
        event_rx,
    ))
}

// Handle returned to the entry point to interact with a running peer.
pub struct Handle {

    swarm_tx: SwarmTx,

    swarm_handle: tokio::task::JoinHandle<()>,

}

impl Handle {

    // External signal that every required peer has reported completion.
    pub fn declare_swarm_complete(&self) -> Result<()> {
        self.swarm_tx.send(CommandToSwarm::DeclareComplete)?;
        Ok(())
    }

    pub async fn shutdown(self) -> Result<()> {
        // The swarm may already have stopped on its own.
        self.swarm_tx.send(CommandToSwarm::Shutdown).ok();
        self.swarm_handle.await.map_err(|_| SwarmError::SwarmPanic)?;
        Ok(())
    }

}
