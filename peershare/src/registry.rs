use std::collections::HashMap;
use crate::{
    choker::PeerSnapshot,
    p2p::{state::{ConnState, SessionState, SharedState}, PeerCommand, PeerTx},
    PeerId,
};

#[derive(Debug)]
pub struct PeerHandle {

    pub id: PeerId,

    // Sends commands to the peer session.
    pub peer_tx: PeerTx,

    pub state: SharedState,

}

// Sessions that completed a handshake, at most one per identity.
#[derive(Debug, Default)]
pub struct Registry {

    peers: HashMap<PeerId, PeerHandle>,

    // Position of each identity in the configured peer list.
    order: HashMap<PeerId, usize>,

}

impl Registry {

    pub fn new(configured: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            peers: HashMap::new(),
            order: configured.into_iter().enumerate().map(|(i, id)| (id, i)).collect(),
        }
    }

    // Hands the handle back if a session for that identity already exists.
    pub fn insert(&mut self, handle: PeerHandle) -> Result<(), PeerHandle> {
        if self.peers.contains_key(&handle.id) {
            return Err(handle);
        }
        self.peers.insert(handle.id, handle);
        Ok(())
    }

    // Only removes the entry owned by the session behind `peer_tx`, so a rejected
    // duplicate closing doesn't evict the live session.
    pub fn remove(&mut self, id: PeerId, peer_tx: &PeerTx) -> Option<PeerHandle> {
        match self.peers.get(&id) {
            Some(handle) if handle.peer_tx.same_channel(peer_tx) => self.peers.remove(&id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    // Returns false if the peer is gone.
    pub fn send(&self, id: PeerId, cmd: PeerCommand) -> bool {
        match self.peers.get(&id) {
            Some(handle) => handle.peer_tx.send(cmd).is_ok(),
            None => false,
        }
    }

    // Fire and forget, a closed session doesn't hold up the rest.
    pub fn broadcast(&self, cmd: PeerCommand) {
        for handle in self.peers.values() {
            if handle.peer_tx.send(cmd.clone()).is_err() {
                tracing::debug!("peer {} gone, dropped {:?}", handle.id, cmd);
            }
        }
    }

    // Consistent view of every registered session, in configured order.
    // Each snapshot closes the session's throughput interval.
    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.collect(SharedState::snapshot_and_tick)
    }

    // Same view without closing the interval.
    pub fn peek(&self) -> Vec<PeerSnapshot> {
        self.collect(SharedState::get)
    }

    // Sessions that already closed are left out until their disconnect lands.
    fn collect(&self, read: impl Fn(&SharedState) -> SessionState) -> Vec<PeerSnapshot> {
        let mut snapshots: Vec<PeerSnapshot> = self
            .peers
            .values()
            .filter_map(|handle| {
                let state = read(&handle.state);
                (state.conn_state != ConnState::Closed).then(|| PeerSnapshot {
                    id: handle.id,
                    order: self.order.get(&handle.id).copied().unwrap_or(usize::MAX),
                    peer_interested: state.peer_interested,
                    downloaded: state.throughput.down.round(),
                })
            })
            .collect();
        snapshots.sort_by_key(|s| (s.order, s.id));
        snapshots
    }

    // Bytes (uploaded, downloaded) over every registered session.
    pub fn totals(&self) -> (u64, u64) {
        self.peers.values().fold((0, 0), |(up, down), handle| {
            let throughput = handle.state.get().throughput;
            (up + throughput.up.total(), down + throughput.down.total())
        })
    }

    // Tells every session to stop and forgets them.
    pub fn shutdown_all(&mut self) {
        for (_, handle) in self.peers.drain() {
            handle.peer_tx.send(PeerCommand::Shutdown).ok();
        }
    }

}
