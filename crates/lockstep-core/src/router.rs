//! Interaction outbox and the per-step exchange protocol.
//!
//! The outbox buckets emitted interactions by `(recipient master,
//! interaction kind)`. Exchange runs once per step: every peer first
//! publishes its per-bucket counts in one all-to-all, so each receiver
//! knows exactly how many batches to expect, then all non-empty buckets
//! move in a single round of point-to-point sends. Received batches are
//! flattened into the inbox the next step's distribute phase consumes.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use lockstep_agents::Interaction;
use lockstep_fabric::{Endpoint, FabricError, Tag};
use lockstep_types::{InteractionKind, MasterId};

/// Errors raised during the interaction exchange.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A fabric operation failed.
    #[error("fabric error: {source}")]
    Fabric {
        /// The underlying fabric error.
        #[from]
        source: FabricError,
    },

    /// A batch arrived with a different length than its announced count.
    #[error("peer {from} announced {expected} interactions of kind {kind} but sent {got}")]
    CountMismatch {
        /// The sending peer.
        from: MasterId,
        /// The interaction kind.
        kind: InteractionKind,
        /// The announced count.
        expected: u64,
        /// The batch length actually received.
        got: usize,
    },
}

/// Per-step outbox, indexed by `recipient master x interaction kind`.
///
/// Buckets are append-only within a step and drained by the exchange.
/// Emission to a nonexistent recipient never reaches a bucket; the
/// caller records the drop here so it stays observable.
#[derive(Debug)]
pub struct Outbox {
    buckets: Vec<Mutex<Vec<Interaction>>>,
    nb_kinds: u32,
    dropped: AtomicU64,
}

impl Outbox {
    /// Create an outbox for `nb_masters` peers and `nb_kinds`
    /// interaction types.
    pub fn new(nb_masters: u32, nb_kinds: u32) -> Self {
        let buckets = (0..nb_masters as usize * nb_kinds as usize)
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            buckets,
            nb_kinds,
            dropped: AtomicU64::new(0),
        }
    }

    fn bucket_index(&self, master: MasterId, kind: InteractionKind) -> usize {
        master.0 as usize * self.nb_kinds as usize + kind.0 as usize
    }

    /// Append an interaction to its recipient master's bucket.
    pub fn push(&self, recipient_master: MasterId, interaction: Interaction) {
        let index = self.bucket_index(recipient_master, interaction.kind);
        if let Some(bucket) = self.buckets.get(index) {
            bucket.lock().push(interaction);
        }
    }

    /// Record an interaction dropped for a missing recipient.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative count of dropped interactions.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take every bucket's contents, leaving the outbox empty.
    fn drain(&self) -> Vec<Vec<Interaction>> {
        self.buckets
            .iter()
            .map(|bucket| std::mem::take(&mut *bucket.lock()))
            .collect()
    }
}

/// Run the exchange protocol for one step and return the new inbox.
///
/// # Errors
///
/// Returns a [`RouterError`] on transport failure or when a peer's
/// batch disagrees with its announced count.
pub fn exchange(
    endpoint: &mut Endpoint,
    outbox: &Outbox,
    nb_kinds: u32,
) -> Result<Vec<Interaction>, RouterError> {
    let peers = endpoint.peers();
    let drained = outbox.drain();

    // Round 1: counts, one block of `nb_kinds` integers per peer.
    let count_blocks: Vec<Vec<u64>> = (0..peers)
        .map(|dest| {
            (0..nb_kinds)
                .map(|kind| {
                    let index = dest as usize * nb_kinds as usize + kind as usize;
                    drained[index].len() as u64
                })
                .collect()
        })
        .collect();
    let expected = endpoint.all_to_all(count_blocks)?;

    // Round 2: one batch per non-empty bucket.
    for dest in 0..peers {
        for kind in 0..nb_kinds {
            let index = dest as usize * nb_kinds as usize + kind as usize;
            let bucket = &drained[index];
            if !bucket.is_empty() {
                endpoint.send(MasterId(dest), Tag::Interactions(kind), bucket)?;
            }
        }
    }

    let mut inbox = Vec::new();
    for src in 0..peers {
        for kind in 0..nb_kinds {
            let announced = expected[src as usize][kind as usize];
            if announced == 0 {
                continue;
            }
            let batch: Vec<Interaction> =
                endpoint.recv(MasterId(src), Tag::Interactions(kind))?;
            if batch.len() as u64 != announced {
                return Err(RouterError::CountMismatch {
                    from: MasterId(src),
                    kind: InteractionKind(kind),
                    expected: announced,
                    got: batch.len(),
                });
            }
            inbox.extend(batch);
        }
    }

    debug!(
        rank = %endpoint.rank(),
        received = inbox.len(),
        "interaction exchange complete"
    );
    Ok(inbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_types::GlobalId;

    fn interaction(kind: u32, sender: u64, recipient: u64) -> Interaction {
        Interaction {
            kind: InteractionKind(kind),
            sender: GlobalId(sender),
            recipient: GlobalId(recipient),
            payload: Vec::new(),
        }
    }

    #[test]
    fn push_routes_to_the_right_bucket() {
        let outbox = Outbox::new(2, 3);
        outbox.push(MasterId(1), interaction(2, 0, 1));
        let drained = outbox.drain();
        assert_eq!(drained[1 * 3 + 2].len(), 1);
        assert!(drained.iter().map(Vec::len).sum::<usize>() == 1);
        // Drain leaves the outbox empty.
        assert!(outbox.drain().iter().all(Vec::is_empty));
    }

    #[test]
    fn drop_counter_accumulates() {
        let outbox = Outbox::new(1, 1);
        assert_eq!(outbox.dropped(), 0);
        outbox.record_drop();
        outbox.record_drop();
        assert_eq!(outbox.dropped(), 2);
    }

    #[test]
    fn exchange_moves_interactions_between_peers() {
        let endpoints = Endpoint::group(2);
        let received: Vec<Vec<Interaction>> = std::thread::scope(|s| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|mut ep| {
                    s.spawn(move || {
                        let outbox = Outbox::new(2, 2);
                        if ep.rank() == MasterId(0) {
                            // Two kinds to peer 1, one back to self.
                            outbox.push(MasterId(1), interaction(0, 0, 1));
                            outbox.push(MasterId(1), interaction(1, 0, 1));
                            outbox.push(MasterId(0), interaction(0, 0, 0));
                        }
                        exchange(&mut ep, &outbox, 2).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(received[0].len(), 1);
        assert_eq!(received[0][0].recipient, GlobalId(0));
        assert_eq!(received[1].len(), 2);
    }

    #[test]
    fn exchange_with_empty_outboxes_is_empty() {
        let endpoints = Endpoint::group(3);
        let received: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|mut ep| {
                    s.spawn(move || {
                        let outbox = Outbox::new(3, 1);
                        exchange(&mut ep, &outbox, 1).unwrap().len()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(received, vec![0, 0, 0]);
    }
}
