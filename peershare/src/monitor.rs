use std::collections::BTreeSet;
use crate::PeerId;

// Decides when the whole swarm is done.
#[derive(Debug)]
pub struct TerminationMonitor {

    // Every configured peer other than ourselves.
    remotes: BTreeSet<PeerId>,

    // Remotes seen holding every piece, kept after they disconnect.
    complete: BTreeSet<PeerId>,

    local_complete: bool,

    // Completion announced from outside the swarm.
    declared: bool,

    signalled: bool,

}

impl TerminationMonitor {

    pub fn new(local_id: PeerId, peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            remotes: peers.into_iter().filter(|id| *id != local_id).collect(),
            complete: BTreeSet::new(),
            local_complete: false,
            declared: false,
            signalled: false,
        }
    }

    pub fn local_complete(&mut self) {
        self.local_complete = true;
    }

    pub fn is_local_complete(&self) -> bool {
        self.local_complete
    }

    // Returns true if the peer wasn't already known complete.
    pub fn peer_complete(&mut self, id: PeerId) -> bool {
        self.remotes.contains(&id) && self.complete.insert(id)
    }

    pub fn declare_swarm_complete(&mut self) {
        self.declared = true;
    }

    pub fn is_swarm_complete(&self) -> bool {
        self.local_complete && (self.declared || self.remotes.is_subset(&self.complete))
    }

    // True the first time the swarm is seen complete, false ever after.
    pub fn poll(&mut self) -> bool {
        if self.signalled || !self.is_swarm_complete() {
            return false;
        }
        self.signalled = true;
        true
    }

}
