use std::collections::HashSet;
use rand::{seq::SliceRandom, Rng};
use crate::Bitfield;

// Pieces the peer has that we lack and haven't already requested from it.
pub fn candidates(remote: &Bitfield, own: &Bitfield, requests_out: &HashSet<usize>) -> Vec<usize> {
    remote
        .iter_ones()
        .filter(|&idx| idx < own.len() && !own[idx] && !requests_out.contains(&idx))
        .collect()
}

// Uniform random choice among the candidates, none means stay idle.
pub fn pick_piece<R: Rng + ?Sized>(
    remote: &Bitfield,
    own: &Bitfield,
    requests_out: &HashSet<usize>,
    rng: &mut R,
) -> Option<usize> {
    candidates(remote, own, requests_out).choose(rng).copied()
}

// Whether the peer holds any piece we lack.
pub fn is_interesting(remote: &Bitfield, own: &Bitfield) -> bool {
    remote.iter_ones().any(|idx| idx < own.len() && !own[idx])
}
