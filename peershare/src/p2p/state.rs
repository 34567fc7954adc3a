use std::sync::{Arc, Mutex, PoisonError};
use crate::stats::ThroughputStats;

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {
    #[default]
    Connecting,
    AwaitingHandshake,
    HandshakeVerified,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Whether we refuse to answer the peer's requests.
    pub am_choking: bool,

    // Whether we are interested in the peer's pieces.
    pub am_interested: bool,

    // Whether the peer refuses to answer our requests.
    pub peer_choking: bool,

    // Whether the peer is interested in our pieces.
    pub peer_interested: bool,

    pub throughput: ThroughputStats,

    // Pieces the peer holds.
    pub num_pieces: usize,

}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            conn_state: ConnState::Connecting,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            throughput: ThroughputStats::default(),
            num_pieces: 0,
        }
    }
}

impl SessionState {
    pub fn tick(&mut self) {
        self.throughput.reset();
    }
}

// Session state shared between the session task and the swarm scheduler.
// The lock is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<Mutex<SessionState>>);

impl SharedState {

    #[inline(always)]
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn get(&self) -> SessionState {
        self.update(|state| *state)
    }

    // Copy of the state, closing the throughput interval it reports on.
    pub fn snapshot_and_tick(&self) -> SessionState {
        self.update(|state| {
            let snapshot = *state;
            state.tick();
            snapshot
        })
    }

}
