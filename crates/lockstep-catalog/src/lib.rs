//! Layout catalog for the lockstep runtime.
//!
//! The catalog is the per-model metadata every other component consumes
//! read-only: attribute sizes and offsets within the full record and
//! within the public / critical sub-records, the set of critical
//! attributes, interaction payload layouts, and the name relations used
//! by export and instantiation.
//!
//! A [`ModelSpec`] describes the model as data; [`Catalog::build`]
//! derives the layouts from it deterministically, so two peers building
//! from the same spec obtain byte-identical offset tables. That is what
//! makes critical-window offsets globally valid.
//!
//! [`ModelSpec`]: model::ModelSpec
//! [`Catalog::build`]: layout::Catalog::build

pub mod layout;
pub mod model;

pub use layout::{
    AgentTypeLayout, AttributeLayout, Catalog, CatalogError, FieldLayout, InteractionLayout,
};
pub use model::{AgentTypeDef, AttributeDef, FieldDef, InteractionDef, ModelSpec, Visibility};
