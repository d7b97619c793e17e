//! Peer group construction, collectives and tagged point-to-point mail.
//!
//! [`Endpoint::group`] builds the whole peer group at once: one mailbox
//! channel per ordered rank pair, one shared barrier, one shared region
//! table. Each [`Endpoint`] is then moved onto its peer's thread.
//!
//! Messages are serialized JSON. Within a sender/receiver pair they
//! arrive in send order; receives match on a [`Tag`] and park
//! out-of-order mail in a pending queue, so two protocol rounds that
//! target the same pair never steal each other's messages.

use std::collections::VecDeque;
use std::sync::{Arc, Barrier};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;

use lockstep_types::MasterId;

use crate::window::{ReadEpoch, RegionTable, WindowKind, WriteEpoch};

/// Errors surfaced by fabric operations.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// A rank outside `[0, M)` was addressed.
    #[error("unknown peer rank {rank} (group size {peers})")]
    UnknownPeer {
        /// The offending rank.
        rank: MasterId,
        /// Group size.
        peers: u32,
    },

    /// A peer disappeared; only happens when a peer thread aborts.
    #[error("peer {rank} disconnected")]
    Disconnected {
        /// The vanished peer.
        rank: MasterId,
    },

    /// A window was accessed before registration.
    #[error("window {kind:?} of rank {rank} is not registered")]
    WindowUnregistered {
        /// The peer whose window was addressed.
        rank: MasterId,
        /// The window kind.
        kind: WindowKind,
    },

    /// A window access fell outside the registered region.
    #[error(
        "window access out of bounds: {kind:?} of rank {rank}, offset {offset} + len {len} > {window}"
    )]
    OutOfBounds {
        /// The peer whose window was addressed.
        rank: MasterId,
        /// The window kind.
        kind: WindowKind,
        /// Requested offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Registered window size.
        window: usize,
    },

    /// A collective was called with root-side arguments missing or
    /// supplied on the wrong rank.
    #[error("collective misuse on rank {rank}: {detail}")]
    CollectiveMisuse {
        /// The rank that misused the collective.
        rank: MasterId,
        /// What went wrong.
        detail: &'static str,
    },

    /// A payload failed to serialize or deserialize.
    #[error("payload codec error: {source}")]
    Codec {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Message tags; a receive only consumes mail with the matching tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Root-to-peer broadcast payloads.
    Broadcast,
    /// Peer-to-root gather payloads.
    Gather,
    /// All-to-all blocks.
    AllToAll,
    /// Initial agent record transfer.
    AgentTransfer,
    /// One interaction batch, per interaction kind.
    Interactions(u32),
}

struct Mail {
    tag: Tag,
    bytes: Vec<u8>,
}

/// One peer's endpoint into the group.
///
/// Collective and point-to-point methods take `&mut self` and belong on
/// the peer's control thread; window and barrier methods take `&self`
/// and may be shared with the peer's worker threads during a phase.
pub struct Endpoint {
    rank: MasterId,
    peers: u32,
    senders: Vec<Sender<Mail>>,
    receivers: Vec<Receiver<Mail>>,
    pending: Vec<VecDeque<Mail>>,
    barrier: Arc<Barrier>,
    regions: Arc<RegionTable>,
}

impl Endpoint {
    /// Build a group of `peers` endpoints sharing one barrier and one
    /// region table. Endpoint `i` is rank `i`.
    pub fn group(peers: u32) -> Vec<Self> {
        let n = peers as usize;
        let barrier = Arc::new(Barrier::new(n));
        let regions = Arc::new(RegionTable::default());

        // One channel per ordered (from, to) pair. The from-major loop
        // leaves senders_by_rank[from][to] and receivers_by_rank[to][from]
        // indexed by peer rank.
        let mut senders_by_rank: Vec<Vec<Sender<Mail>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut receivers_by_rank: Vec<Vec<Receiver<Mail>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        for from in 0..n {
            for to in 0..n {
                let (tx, rx) = unbounded();
                senders_by_rank[from].push(tx);
                receivers_by_rank[to].push(rx);
            }
        }

        senders_by_rank
            .into_iter()
            .zip(receivers_by_rank)
            .enumerate()
            .map(|(rank, (senders, receivers))| Self {
                rank: MasterId(rank as u32),
                peers,
                senders,
                receivers,
                pending: (0..n).map(|_| VecDeque::new()).collect(),
                barrier: Arc::clone(&barrier),
                regions: Arc::clone(&regions),
            })
            .collect()
    }

    /// This endpoint's rank.
    pub const fn rank(&self) -> MasterId {
        self.rank
    }

    /// Group size `M`.
    pub const fn peers(&self) -> u32 {
        self.peers
    }

    /// Block until every peer reaches the barrier.
    pub fn barrier(&self) {
        self.barrier.wait();
    }

    fn check_rank(&self, rank: MasterId) -> Result<usize, FabricError> {
        if rank.0 < self.peers {
            Ok(rank.0 as usize)
        } else {
            Err(FabricError::UnknownPeer {
                rank,
                peers: self.peers,
            })
        }
    }

    /// Send a tagged payload to `to` (possibly self).
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownPeer`], [`FabricError::Codec`] or
    /// [`FabricError::Disconnected`].
    pub fn send<T: Serialize>(&self, to: MasterId, tag: Tag, payload: &T) -> Result<(), FabricError> {
        let idx = self.check_rank(to)?;
        let bytes = serde_json::to_vec(payload)?;
        self.senders[idx]
            .send(Mail { tag, bytes })
            .map_err(|_| FabricError::Disconnected { rank: to })
    }

    /// Receive the next payload with the given tag from `from`,
    /// blocking until it arrives. Mail with other tags from the same
    /// sender is parked and delivered to later matching receives.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownPeer`], [`FabricError::Codec`] or
    /// [`FabricError::Disconnected`].
    pub fn recv<T: DeserializeOwned>(&mut self, from: MasterId, tag: Tag) -> Result<T, FabricError> {
        let idx = self.check_rank(from)?;
        if let Some(pos) = self.pending[idx].iter().position(|m| m.tag == tag) {
            if let Some(mail) = self.pending[idx].remove(pos) {
                return Ok(serde_json::from_slice(&mail.bytes)?);
            }
        }
        loop {
            let mail = self.receivers[idx]
                .recv()
                .map_err(|_| FabricError::Disconnected { rank: from })?;
            if mail.tag == tag {
                return Ok(serde_json::from_slice(&mail.bytes)?);
            }
            self.pending[idx].push_back(mail);
        }
    }

    /// Broadcast from `root` to every peer. The root passes
    /// `Some(value)` and gets it back; every other rank passes `None`
    /// and receives the root's value.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::CollectiveMisuse`] when the value argument
    /// does not match the caller's role, or a transport error.
    pub fn broadcast<T: Serialize + DeserializeOwned>(
        &mut self,
        root: MasterId,
        value: Option<T>,
    ) -> Result<T, FabricError> {
        self.check_rank(root)?;
        if self.rank == root {
            let value = value.ok_or(FabricError::CollectiveMisuse {
                rank: self.rank,
                detail: "broadcast root must supply a value",
            })?;
            for peer in 0..self.peers {
                if peer != root.0 {
                    self.send(MasterId(peer), Tag::Broadcast, &value)?;
                }
            }
            Ok(value)
        } else {
            if value.is_some() {
                return Err(FabricError::CollectiveMisuse {
                    rank: self.rank,
                    detail: "broadcast non-root must not supply a value",
                });
            }
            self.recv(root, Tag::Broadcast)
        }
    }

    /// Gather one value per peer at `root`, ordered by rank. The root
    /// receives `Some(values)`; every other rank receives `None`.
    ///
    /// # Errors
    ///
    /// Returns a transport error.
    pub fn gather<T: Serialize + DeserializeOwned>(
        &mut self,
        root: MasterId,
        value: &T,
    ) -> Result<Option<Vec<T>>, FabricError> {
        self.check_rank(root)?;
        if self.rank == root {
            let mut out = Vec::with_capacity(self.peers as usize);
            for peer in 0..self.peers {
                if peer == self.rank.0 {
                    // re-encode so the root's own entry goes through the
                    // same codec as everyone else's
                    let bytes = serde_json::to_vec(value)?;
                    out.push(serde_json::from_slice(&bytes)?);
                } else {
                    out.push(self.recv(MasterId(peer), Tag::Gather)?);
                }
            }
            Ok(Some(out))
        } else {
            self.send(root, Tag::Gather, value)?;
            Ok(None)
        }
    }

    /// All-to-all exchange: `blocks[i]` goes to rank `i`; the result's
    /// entry `i` is the block rank `i` sent here.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::CollectiveMisuse`] when `blocks` does not
    /// have one entry per peer, or a transport error.
    pub fn all_to_all<T: Serialize + DeserializeOwned>(
        &mut self,
        blocks: Vec<T>,
    ) -> Result<Vec<T>, FabricError> {
        if blocks.len() != self.peers as usize {
            return Err(FabricError::CollectiveMisuse {
                rank: self.rank,
                detail: "all_to_all needs exactly one block per peer",
            });
        }
        for (peer, block) in blocks.iter().enumerate() {
            self.send(MasterId(peer as u32), Tag::AllToAll, block)?;
        }
        let mut out = Vec::with_capacity(self.peers as usize);
        for peer in 0..self.peers {
            out.push(self.recv(MasterId(peer), Tag::AllToAll)?);
        }
        Ok(out)
    }

    /// Register (or re-register) this rank's window of the given kind.
    /// All peers must register before any epoch opens; callers bracket
    /// registration with a barrier.
    pub fn register_window(&self, kind: WindowKind, size: usize) {
        self.regions.register(self.rank, kind, size);
    }

    /// Size of `rank`'s registered window.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::WindowUnregistered`].
    pub fn window_len(&self, rank: MasterId, kind: WindowKind) -> Result<usize, FabricError> {
        self.regions.len(rank, kind)
    }

    /// Open a read epoch over the given window kind.
    pub fn read_epoch(&self, kind: WindowKind) -> ReadEpoch<'_> {
        ReadEpoch {
            table: &self.regions,
            kind,
        }
    }

    /// Open a write epoch over the given window kind.
    pub fn write_epoch(&self, kind: WindowKind) -> WriteEpoch<'_> {
        WriteEpoch {
            table: &self.regions,
            kind,
        }
    }

    /// Mutate this rank's own window outside any remote epoch; used to
    /// fill the region during initialization and local publication.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::WindowUnregistered`].
    pub fn fill_local<R>(
        &self,
        kind: WindowKind,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, FabricError> {
        self.regions.with_local_mut(self.rank, kind, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_group<R: Send>(peers: u32, f: impl Fn(Endpoint) -> R + Send + Sync) -> Vec<R> {
        let endpoints = Endpoint::group(peers);
        std::thread::scope(|s| {
            let f = &f;
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|ep| s.spawn(move || f(ep)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn broadcast_reaches_all_ranks() {
        let got = on_group(4, |mut ep| {
            let value = (ep.rank() == MasterId(0)).then_some(42u64);
            ep.broadcast(MasterId(0), value).unwrap()
        });
        assert_eq!(got, vec![42, 42, 42, 42]);
    }

    #[test]
    fn broadcast_from_non_zero_root() {
        let got = on_group(3, |mut ep| {
            let value = (ep.rank() == MasterId(2)).then_some("hello".to_owned());
            ep.broadcast(MasterId(2), value).unwrap()
        });
        assert!(got.iter().all(|s| s == "hello"));
    }

    #[test]
    fn gather_orders_by_rank() {
        let got = on_group(3, |mut ep| {
            let mine = ep.rank().0 * 10;
            ep.gather(MasterId(0), &mine).unwrap()
        });
        assert_eq!(got[0], Some(vec![0, 10, 20]));
        assert_eq!(got[1], None);
        assert_eq!(got[2], None);
    }

    #[test]
    fn all_to_all_transposes_blocks() {
        let got = on_group(3, |mut ep| {
            let me = ep.rank().0;
            let blocks: Vec<String> = (0..3).map(|to| format!("{me}->{to}")).collect();
            ep.all_to_all(blocks).unwrap()
        });
        for (me, received) in got.iter().enumerate() {
            for (from, block) in received.iter().enumerate() {
                assert_eq!(block, &format!("{from}->{me}"));
            }
        }
    }

    #[test]
    fn tagged_receive_skips_other_tags() {
        let got = on_group(2, |mut ep| {
            if ep.rank() == MasterId(0) {
                ep.send(MasterId(1), Tag::Interactions(1), &"late").unwrap();
                ep.send(MasterId(1), Tag::Interactions(0), &"early").unwrap();
                String::new()
            } else {
                // Ask for kind 0 first even though kind 1 arrived first.
                let early: String = ep.recv(MasterId(0), Tag::Interactions(0)).unwrap();
                let late: String = ep.recv(MasterId(0), Tag::Interactions(1)).unwrap();
                format!("{early},{late}")
            }
        });
        assert_eq!(got[1], "early,late");
    }

    #[test]
    fn one_sided_put_is_visible_to_remote_get() {
        let got = on_group(2, |ep| {
            ep.register_window(WindowKind::Critical, 8);
            ep.barrier();
            if ep.rank() == MasterId(0) {
                let epoch = ep.write_epoch(WindowKind::Critical);
                epoch.put(MasterId(1), 2, &[7, 8]).unwrap();
            }
            ep.barrier();
            let epoch = ep.read_epoch(WindowKind::Critical);
            epoch.get(ep.rank(), 0, 8).unwrap()
        });
        assert_eq!(got[1], vec![0, 0, 7, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn single_peer_group_degenerates_cleanly() {
        let got = on_group(1, |mut ep| {
            let b = ep.broadcast(MasterId(0), Some(5u32)).unwrap();
            let g = ep.gather(MasterId(0), &b).unwrap().unwrap();
            let a = ep.all_to_all(vec![9u8]).unwrap();
            ep.register_window(WindowKind::Public, 4);
            ep.barrier();
            let epoch = ep.write_epoch(WindowKind::Public);
            epoch.put(MasterId(0), 0, &[1]).unwrap();
            drop(epoch);
            let epoch = ep.read_epoch(WindowKind::Public);
            (b, g, a, epoch.get(MasterId(0), 0, 1).unwrap())
        });
        assert_eq!(got[0], (5, vec![5], vec![9], vec![1]));
    }

    #[test]
    fn unknown_peer_is_rejected() {
        let endpoints = Endpoint::group(2);
        let ep = &endpoints[0];
        let err = ep.send(MasterId(5), Tag::Broadcast, &0u8).unwrap_err();
        assert!(matches!(err, FabricError::UnknownPeer { .. }));
    }
}
