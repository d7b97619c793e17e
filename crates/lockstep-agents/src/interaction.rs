//! Typed messages between agents.
//!
//! An interaction names its kind, its sender and its recipient by
//! global id, and carries a payload whose byte layout the catalog
//! dictates per kind. Interactions cross the fabric in per-kind batches
//! during the exchange phase and land in the recipient's received list.

use serde::{Deserialize, Serialize};

use lockstep_catalog::Catalog;
use lockstep_types::{GlobalId, InteractionKind, Value};

use crate::error::AgentError;

/// A typed message from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Interaction type.
    pub kind: InteractionKind,
    /// Global id of the sending agent.
    pub sender: GlobalId,
    /// Global id of the receiving agent.
    pub recipient: GlobalId,
    /// Payload bytes, laid out per the catalog's field layout for `kind`.
    pub payload: Vec<u8>,
}

impl Interaction {
    /// Build an interaction, encoding `fields` in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::PayloadArity`] when the field count does
    /// not match the declaration, or a value error when a field does not
    /// fit its declared wire type.
    pub fn build(
        catalog: &Catalog,
        kind: InteractionKind,
        sender: GlobalId,
        recipient: GlobalId,
        fields: &[Value],
    ) -> Result<Self, AgentError> {
        let layout = catalog.interaction(kind)?;
        if fields.len() != layout.fields.len() {
            return Err(AgentError::PayloadArity {
                kind,
                expected: layout.fields.len(),
                got: fields.len(),
            });
        }
        let mut payload = vec![0u8; layout.payload_size];
        for (value, field) in fields.iter().zip(&layout.fields) {
            let value = value.expect_wire(field.wire)?;
            value.encode(&mut payload[field.offset..field.offset + field.wire.size()])?;
        }
        Ok(Self {
            kind,
            sender,
            recipient,
            payload,
        })
    }

    /// Decode one payload field by name.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown field, or
    /// [`AgentError::PayloadSize`] when the payload is malformed.
    pub fn field(&self, catalog: &Catalog, name: &str) -> Result<Value, AgentError> {
        let layout = catalog.interaction(self.kind)?;
        if self.payload.len() != layout.payload_size {
            return Err(AgentError::PayloadSize {
                kind: self.kind,
                expected: layout.payload_size,
                got: self.payload.len(),
            });
        }
        let index = layout.field_by_name(name)?;
        let field = &layout.fields[index];
        Ok(Value::decode(field.wire, &self.payload[field.offset..])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_catalog::{
        AgentTypeDef, AttributeDef, FieldDef, InteractionDef, ModelSpec,
    };
    use lockstep_types::WireType;

    fn catalog() -> Catalog {
        Catalog::build(&ModelSpec {
            name: "test".to_owned(),
            agent_types: vec![AgentTypeDef {
                name: "a".to_owned(),
                sendable: true,
                attributes: vec![AttributeDef {
                    name: "x".to_owned(),
                    wire: WireType::U64,
                    visibility: Default::default(),
                    default: None,
                }],
            }],
            interactions: vec![InteractionDef {
                name: "ping".to_owned(),
                fields: vec![
                    FieldDef {
                        name: "from".to_owned(),
                        wire: WireType::U64,
                    },
                    FieldDef {
                        name: "weight".to_owned(),
                        wire: WireType::F64,
                    },
                ],
            }],
        })
        .unwrap()
    }

    #[test]
    fn build_and_read_fields() {
        let catalog = catalog();
        let inter = Interaction::build(
            &catalog,
            InteractionKind(0),
            GlobalId(3),
            GlobalId(7),
            &[Value::U64(3), Value::F64(0.5)],
        )
        .unwrap();
        assert_eq!(inter.field(&catalog, "from").unwrap(), Value::U64(3));
        assert_eq!(inter.field(&catalog, "weight").unwrap(), Value::F64(0.5));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let catalog = catalog();
        let err = Interaction::build(
            &catalog,
            InteractionKind(0),
            GlobalId(0),
            GlobalId(1),
            &[Value::U64(1)],
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::PayloadArity { expected: 2, got: 1, .. }));
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let catalog = catalog();
        let err = Interaction::build(
            &catalog,
            InteractionKind(0),
            GlobalId(0),
            GlobalId(1),
            &[Value::F64(1.0), Value::F64(2.0)],
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Value { .. }));
    }
}
