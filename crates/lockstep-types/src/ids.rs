//! Type-safe identifier wrappers around dense integers.
//!
//! Agents, agent types, attributes, interactions and masters are all
//! named by small dense integers assigned at model-build time. Wrapping
//! them prevents accidental mixing at compile time; the representation
//! stays `Copy` and ordering-compatible so identifiers can key ordered
//! maps and derive window offsets deterministically.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a dense integer with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty)
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            /// Wrap a raw integer.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// Return the inner integer value.
            pub const fn into_inner(self) -> $repr {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Dense identifier of an agent type, in `[0, T)`.
    TypeId(u32)
}

define_id! {
    /// Identifier of an agent among the agents of its type.
    LocalId(u64)
}

define_id! {
    /// Cluster-wide identifier of an agent: `local * T + type`.
    GlobalId(u64)
}

define_id! {
    /// Identifier and rank of a master within the peer group, in `[0, M)`.
    MasterId(u32)
}

define_id! {
    /// Identifier of an attribute within its agent type's catalog entry.
    AttrId(u32)
}

define_id! {
    /// Dense identifier of an interaction type, in `[0, I)`.
    InteractionKind(u32)
}

/// Codec between `(local, type)` pairs and global agent identifiers.
///
/// The composition rule `global = local * T + type` makes the global id
/// unique across the cluster as long as every peer agrees on `T`, which
/// holds because `T` comes from the immutable catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCodec {
    nb_types: u64,
}

impl IdCodec {
    /// Create a codec for a model with `nb_types` agent types.
    ///
    /// `nb_types` must be at least 1; the catalog guarantees this.
    pub const fn new(nb_types: u32) -> Self {
        Self {
            nb_types: nb_types as u64,
        }
    }

    /// Compose a global identifier from local identifiers.
    pub const fn global(&self, local: LocalId, type_id: TypeId) -> GlobalId {
        GlobalId(local.0 * self.nb_types + type_id.0 as u64)
    }

    /// Extract the local identifier from a global identifier.
    pub const fn local_of(&self, global: GlobalId) -> LocalId {
        LocalId(global.0 / self.nb_types)
    }

    /// Extract the type identifier from a global identifier.
    pub const fn type_of(&self, global: GlobalId) -> TypeId {
        TypeId((global.0 % self.nb_types) as u32)
    }

    /// Number of agent types this codec was built for.
    pub const fn nb_types(&self) -> u32 {
        self.nb_types as u32
    }
}
