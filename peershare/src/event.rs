use crate::PeerId;

// Protocol events that make up a peer's log file.
pub const TARGET: &str = "peershare::event";

pub fn connection_made(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} makes a connection to Peer {}.", local, remote);
}

pub fn connection_received(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} is connected from Peer {}.", local, remote);
}

pub fn preferred_neighbors(local: PeerId, preferred: &[PeerId]) {
    let list = preferred.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    tracing::info!(target: TARGET, local, "Peer {} has the preferred neighbors {}.", local, list);
}

pub fn optimistic_neighbor(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} has the optimistically unchoked neighbor {}.", local, remote);
}

pub fn unchoked_by(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} is unchoked by {}.", local, remote);
}

pub fn choked_by(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} is choked by {}.", local, remote);
}

pub fn have_received(local: PeerId, remote: PeerId, piece: usize) {
    tracing::info!(
        target: TARGET,
        local,
        remote,
        piece,
        "Peer {} received the 'have' message from {} for the piece {}.",
        local,
        remote,
        piece
    );
}

pub fn interested_received(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} received the 'interested' message from {}.", local, remote);
}

pub fn not_interested_received(local: PeerId, remote: PeerId) {
    tracing::info!(target: TARGET, local, remote, "Peer {} received the 'not interested' message from {}.", local, remote);
}

pub fn piece_downloaded(local: PeerId, remote: PeerId, piece: usize, count: usize) {
    tracing::info!(
        target: TARGET,
        local,
        remote,
        piece,
        count,
        "Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}.",
        local,
        piece,
        remote,
        count
    );
}

pub fn download_complete(local: PeerId) {
    tracing::info!(target: TARGET, local, "Peer {} has downloaded the complete file.", local);
}
