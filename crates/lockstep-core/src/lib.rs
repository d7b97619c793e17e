//! Distributed lock-step execution core.
//!
//! A population of typed agents is partitioned across a fixed group of
//! peer masters. Every time step, each master drives the same
//! barrier-separated phases:
//!
//! 1. **Distribute** -- hand the interactions received at the end of the
//!    previous step to their local recipients.
//! 2. **Behaviors** -- run every local agent's behavior on the handler
//!    worker threads, with the public window pinned for one-sided reads.
//! 3. **Publish** -- copy each local agent's public sub-record into the
//!    master's public window; put changed critical attributes into every
//!    peer's critical replica in one dedicated write epoch.
//! 4. **Exchange** -- all-to-all interaction counts, then batched
//!    point-to-point transfer into the next step's inbox.
//!
//! Master 0 doubles as the coordinator: control methods broadcast an
//! opcode that parked followers dispatch on, keeping user commands off
//! the data path.
//!
//! # Modules
//!
//! - [`behavior`] -- per-type behavior dispatch and the context handed
//!   to behaviors.
//! - [`cache`] -- per-step memoization of remote public-attribute reads.
//! - [`cluster`] -- in-process launcher joining coordinator and
//!   follower threads.
//! - [`control`] -- coordinator opcodes and the follower wait loop.
//! - [`export`] -- snapshot assembly, snapshot-to-instance conversion
//!   and instantiation parsing.
//! - [`handler`] -- handler groups: the per-thread agent partitions.
//! - [`master`] -- the per-step state machine.
//! - [`router`] -- outbox buckets and the exchange protocol.
//! - [`windows`] -- canonical window layout and offset maps.

pub mod behavior;
pub mod cache;
pub mod cluster;
pub mod control;
pub mod error;
pub mod export;
pub mod handler;
mod init;
pub mod master;
pub mod router;
pub mod windows;

pub use behavior::{BehaviorCtx, BehaviorError, BehaviorTable};
pub use cluster::Cluster;
pub use control::{ModifyRequest, Order};
pub use error::MasterError;
pub use master::{Directory, Master};
