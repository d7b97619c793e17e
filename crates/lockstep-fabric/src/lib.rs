//! Peer-group communication fabric for the lockstep runtime.
//!
//! A fixed group of peers coordinates through three primitives:
//!
//! - **collectives** -- barrier, broadcast, gather, all-to-all;
//! - **tagged point-to-point messages** -- ordered per sender/receiver
//!   pair, matched by [`Tag`];
//! - **one-sided windows** -- named byte regions any peer can read from
//!   or write to at exact offsets, bracketed by read/write epochs.
//!
//! The realization here is in-memory: peers are threads, mailboxes are
//! channels, and windows are shared byte regions. The surface mirrors
//! the message-passing/RMA discipline of a cluster runtime: every
//! collective is symmetric across ranks, window access happens only
//! inside an epoch, and epochs are separated by barriers so readers and
//! writers of a region never overlap.

pub mod group;
pub mod window;

pub use group::{Endpoint, FabricError, Tag};
pub use window::{ReadEpoch, WindowKind, WriteEpoch};
