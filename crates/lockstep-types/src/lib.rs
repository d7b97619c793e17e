//! Shared identifier and value types for the lockstep runtime.
//!
//! Every entity in the cluster is named by a dense integer wrapped in a
//! strongly-typed newtype so identifiers cannot be mixed up at compile
//! time. The [`IdCodec`] implements the global naming rule
//! `global = local * T + type` that all peers agree on.
//!
//! Attribute and interaction payload values are scalars described by a
//! [`WireType`] and carried as a [`Value`]; their byte encoding is
//! fixed-width little-endian so that record offsets are identical on
//! every peer.
//!
//! [`IdCodec`]: ids::IdCodec
//! [`WireType`]: value::WireType
//! [`Value`]: value::Value

pub mod ids;
pub mod value;

pub use ids::{AttrId, GlobalId, IdCodec, InteractionKind, LocalId, MasterId, TypeId};
pub use value::{Value, ValueError, WireType};
