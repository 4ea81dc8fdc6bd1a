//! Causal-order comparison between document replicas
//!
//! A version vector summarizes a replica as the highest change sequence
//! number seen from each actor. Comparing two vectors answers "has the
//! peer definitely already seen everything I have" without consulting
//! the merge engine. The session core keeps this as a public utility
//! for collaborators such as reconnection or conflict-resolution
//! policies.

use std::collections::HashMap;

use automerge::AutoCommit;

/// Per-actor operation counters derived from a replica
pub type VersionVector = HashMap<String, u64>;

/// Derive the version vector of a replica
pub fn version_vector(doc: &mut AutoCommit) -> VersionVector {
    let mut vector = VersionVector::new();
    for change in doc.get_changes(&[]) {
        let counter = vector
            .entry(change.actor_id().to_hex_string())
            .or_insert(0);
        *counter = (*counter).max(change.seq());
    }
    vector
}

/// Returns true iff every component of `a` is less than or equal to the
/// corresponding component of `b`, missing entries reading as 0.
///
/// A false result covers both "`a` is strictly ahead of `b`" and
/// "`a` and `b` are concurrent".
pub fn causally_at_most(a: &VersionVector, b: &VersionVector) -> bool {
    a.keys().chain(b.keys()).all(|actor| {
        let left = a.get(actor).copied().unwrap_or(0);
        let right = b.get(actor).copied().unwrap_or(0);
        left <= right
    })
}
