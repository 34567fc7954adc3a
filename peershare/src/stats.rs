// Snapshot of a running peer, sent to the entry point.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwarmStats {

    // Pieces held locally.
    pub num_have: usize,

    pub num_pieces: usize,

    // Sessions currently registered.
    pub num_peers: usize,

    // Bytes served to and credited from peers, closed sessions included.
    pub uploaded: u64,

    pub downloaded: u64,

}

impl SwarmStats {
    pub fn percent(&self) -> f64 {
        if self.num_pieces == 0 {
            return 100.0;
        }
        self.num_have as f64 * 100.0 / self.num_pieces as f64
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputStats {

    pub up: Counter,

    pub down: Counter,

}

impl ThroughputStats {
    // Closes the current scheduling interval for both directions.
    pub fn reset(&mut self) {
        self.up.reset();
        self.down.reset();
    }
}

// Byte counter split into scheduling intervals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    total: u64,
    round: u64,
}

impl Counter {

    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    pub fn reset(&mut self) {
        self.round = 0;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    // Bytes counted in the interval that is still open.
    pub fn round(&self) -> u64 {
        self.round
    }

}

impl std::ops::AddAssign<u64> for Counter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}
