use std::collections::BTreeSet;
use rand::{seq::SliceRandom, Rng};
use crate::PeerId;

// What the scheduler sees of one registered peer at the end of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSnapshot {

    pub id: PeerId,

    // Position in the configured peer list, breaks rate ties.
    pub order: usize,

    pub peer_interested: bool,

    // Bytes received from the peer during the interval.
    pub downloaded: u64,

}

// Commands to issue after a preferred neighbor recomputation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decision {

    pub preferred: Vec<PeerId>,

    pub unchoke: Vec<PeerId>,

    pub choke: Vec<PeerId>,

    // Whether the preferred set differs from the previous one.
    pub changed: bool,

}

// Decides who gets unchoked. Timers live in the swarm loop.
#[derive(Debug)]
pub struct Choker {

    num_preferred: usize,

    preferred: Vec<PeerId>,

    optimistic: Option<PeerId>,

    // Peers we have unchoked, preferred or optimistic.
    unchoked: BTreeSet<PeerId>,

}

impl Choker {

    pub fn new(num_preferred: usize) -> Self {
        Self {
            num_preferred,
            preferred: Vec::new(),
            optimistic: None,
            unchoked: BTreeSet::new(),
        }
    }

    // Ranks interested peers by interval download rate (ties by configured order),
    // or randomly once we have the whole file, and keeps the top k.
    pub fn recompute_preferred<R: Rng + ?Sized>(
        &mut self,
        peers: &[PeerSnapshot],
        is_complete: bool,
        rng: &mut R,
    ) -> Decision {
        let mut ranked: Vec<&PeerSnapshot> = peers.iter().filter(|p| p.peer_interested).collect();
        if is_complete {
            ranked.shuffle(rng);
        } else {
            ranked.sort_by(|a, b| b.downloaded.cmp(&a.downloaded).then(a.order.cmp(&b.order)));
        }
        let preferred: Vec<PeerId> = ranked
            .iter()
            .take(self.num_preferred)
            .map(|p| p.id)
            .collect();

        // The optimistic pick survives only while it is still interested.
        self.optimistic = self
            .optimistic
            .filter(|id| peers.iter().any(|p| p.id == *id && p.peer_interested));

        let choke: Vec<PeerId> = self
            .unchoked
            .iter()
            .copied()
            .filter(|id| !preferred.contains(id) && Some(*id) != self.optimistic)
            .collect();
        let unchoke: Vec<PeerId> = preferred
            .iter()
            .copied()
            .filter(|id| !self.unchoked.contains(id))
            .collect();

        for id in &choke {
            self.unchoked.remove(id);
        }
        self.unchoked.extend(unchoke.iter().copied());

        let changed = preferred.iter().collect::<BTreeSet<_>>()
            != self.preferred.iter().collect::<BTreeSet<_>>();
        self.preferred = preferred.clone();

        Decision {
            preferred,
            unchoke,
            choke,
            changed,
        }
    }

    // Uniform pick among interested peers we currently choke. The previous pick
    // stays unchoked until the next preferred recomputation.
    pub fn pick_optimistic<R: Rng + ?Sized>(&mut self, peers: &[PeerSnapshot], rng: &mut R) -> Option<PeerId> {
        let candidates: Vec<PeerId> = peers
            .iter()
            .filter(|p| p.peer_interested && !self.unchoked.contains(&p.id))
            .map(|p| p.id)
            .collect();
        let id = *candidates.choose(rng)?;
        self.optimistic = Some(id);
        self.unchoked.insert(id);
        Some(id)
    }

    // Forget a peer whose session ended.
    pub fn remove(&mut self, id: PeerId) {
        self.unchoked.remove(&id);
        self.preferred.retain(|p| *p != id);
        if self.optimistic == Some(id) {
            self.optimistic = None;
        }
    }

}
