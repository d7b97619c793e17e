//! Model declarations: the data a catalog is built from.
//!
//! In the original toolchain this metadata is produced by a
//! precompilation pass over the user model; here it is declared as plain
//! data, either in code or deserialized from a model file.

use serde::{Deserialize, Serialize};

use lockstep_types::WireType;

/// Who may observe an attribute, and how it is replicated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Not exposed outside the owning agent.
    #[default]
    Private,
    /// Readable remotely on demand through the public window.
    Public,
    /// Fully replicated on every peer and eagerly published.
    Critical,
}

/// Declaration of a single agent attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name, unique within its agent type.
    pub name: String,

    /// Scalar wire representation.
    pub wire: WireType,

    /// Visibility class; private unless stated otherwise.
    #[serde(default)]
    pub visibility: Visibility,

    /// Declared default for agents the instantiation does not spell out.
    /// `None` means the wire type's zero value.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Declaration of an agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeDef {
    /// Type name, unique within the model.
    pub name: String,

    /// Whether agents of this type can be moved between masters.
    /// Consumed by the (out-of-scope) migration subsystem only.
    #[serde(default = "default_sendable")]
    pub sendable: bool,

    /// Attribute declarations, in catalog order.
    pub attributes: Vec<AttributeDef>,
}

const fn default_sendable() -> bool {
    true
}

/// Declaration of one interaction payload field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, unique within the interaction type.
    pub name: String,

    /// Scalar wire representation.
    pub wire: WireType,
}

/// Declaration of an interaction type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionDef {
    /// Interaction name, unique within the model.
    pub name: String,

    /// Payload fields, in wire order.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Complete model description: the input to [`Catalog::build`].
///
/// [`Catalog::build`]: crate::layout::Catalog::build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model name, used for logging only.
    pub name: String,

    /// Agent type declarations; their index is the dense `TypeId`.
    pub agent_types: Vec<AgentTypeDef>,

    /// Interaction declarations; their index is the dense kind id.
    #[serde(default)]
    pub interactions: Vec<InteractionDef>,
}
