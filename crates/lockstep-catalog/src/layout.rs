//! Derived record layouts and lookup tables.
//!
//! Offsets are assigned by walking the declarations in order, so the
//! resulting tables depend only on the model spec. The full record packs
//! every attribute; the public and critical sub-records pack only the
//! attributes of the matching visibility, in declaration order. Public
//! and critical sets are disjoint by construction since each attribute
//! carries exactly one visibility.

use std::collections::HashMap;

use lockstep_types::{AttrId, IdCodec, InteractionKind, TypeId, Value, ValueError, WireType};

use crate::model::{ModelSpec, Visibility};

/// Errors raised while building or querying the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The model declares no agent types.
    #[error("model `{model}` declares no agent types")]
    NoAgentTypes {
        /// Name of the offending model.
        model: String,
    },

    /// Two agent types share a name.
    #[error("duplicate agent type name `{name}`")]
    DuplicateTypeName {
        /// The duplicated name.
        name: String,
    },

    /// Two attributes of one type share a name.
    #[error("duplicate attribute `{attr}` on agent type `{agent_type}`")]
    DuplicateAttributeName {
        /// The agent type declaring the duplicate.
        agent_type: String,
        /// The duplicated attribute name.
        attr: String,
    },

    /// Two interaction types share a name.
    #[error("duplicate interaction name `{name}`")]
    DuplicateInteractionName {
        /// The duplicated name.
        name: String,
    },

    /// Two fields of one interaction share a name.
    #[error("duplicate field `{field}` on interaction `{interaction}`")]
    DuplicateFieldName {
        /// The interaction declaring the duplicate.
        interaction: String,
        /// The duplicated field name.
        field: String,
    },

    /// A declared default value does not fit its attribute's wire type.
    #[error("invalid default for `{agent_type}.{attr}`: {source}")]
    InvalidDefault {
        /// The agent type declaring the attribute.
        agent_type: String,
        /// The attribute name.
        attr: String,
        /// The underlying value error.
        source: ValueError,
    },

    /// A type id outside `[0, T)` was queried.
    #[error("unknown agent type {type_id}")]
    UnknownType {
        /// The out-of-range type id.
        type_id: TypeId,
    },

    /// An attribute id outside the type's catalog entry was queried.
    #[error("unknown attribute {attr} on agent type {type_id}")]
    UnknownAttribute {
        /// The agent type queried.
        type_id: TypeId,
        /// The out-of-range attribute id.
        attr: AttrId,
    },

    /// An interaction kind outside `[0, I)` was queried.
    #[error("unknown interaction kind {kind}")]
    UnknownInteraction {
        /// The out-of-range kind.
        kind: InteractionKind,
    },

    /// A name lookup failed.
    #[error("unknown name `{name}` ({role})")]
    UnknownName {
        /// What kind of name was looked up (agent type, attribute, ...).
        role: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// An attribute of the queried visibility class was expected.
    #[error("attribute {attr} of agent type {type_id} is not {expected}")]
    WrongVisibility {
        /// The agent type queried.
        type_id: TypeId,
        /// The attribute queried.
        attr: AttrId,
        /// The expected visibility class.
        expected: &'static str,
    },
}

/// Layout of one attribute, derived from its declaration.
#[derive(Debug, Clone)]
pub struct AttributeLayout {
    /// Attribute name.
    pub name: String,
    /// Scalar wire representation.
    pub wire: WireType,
    /// Visibility class.
    pub visibility: Visibility,
    /// Byte offset within the full attribute record.
    pub record_offset: usize,
    /// Byte offset within the public or critical sub-record, when the
    /// attribute belongs to one.
    pub sub_offset: Option<usize>,
    /// Default value for instantiation.
    pub default: Value,
}

impl AttributeLayout {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        self.wire.size()
    }
}

/// Layout of one agent type.
#[derive(Debug, Clone)]
pub struct AgentTypeLayout {
    /// Type name.
    pub name: String,
    /// Whether agents of this type may be moved between masters.
    pub sendable: bool,
    /// Attribute layouts, indexed by `AttrId`.
    pub attributes: Vec<AttributeLayout>,
    /// Size of the full attribute record.
    pub record_size: usize,
    /// Size of the public (non-critical) sub-record.
    pub public_size: usize,
    /// Size of the critical sub-record.
    pub critical_size: usize,
    name_to_attr: HashMap<String, AttrId>,
}

impl AgentTypeLayout {
    /// Resolve an attribute id by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownName`] if no attribute has that name.
    pub fn attr_by_name(&self, name: &str) -> Result<AttrId, CatalogError> {
        self.name_to_attr
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownName {
                role: "attribute",
                name: name.to_owned(),
            })
    }

    /// Iterate attribute ids of a given visibility, in sub-record order.
    pub fn attrs_with_visibility(
        &self,
        visibility: Visibility,
    ) -> impl Iterator<Item = AttrId> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .filter(move |(_, a)| a.visibility == visibility)
            .map(|(i, _)| AttrId(i as u32))
    }
}

/// Layout of one interaction payload field.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Field name.
    pub name: String,
    /// Scalar wire representation.
    pub wire: WireType,
    /// Byte offset within the payload.
    pub offset: usize,
}

/// Layout of one interaction type.
#[derive(Debug, Clone)]
pub struct InteractionLayout {
    /// Interaction name.
    pub name: String,
    /// Field layouts, in wire order.
    pub fields: Vec<FieldLayout>,
    /// Total payload size in bytes.
    pub payload_size: usize,
    name_to_field: HashMap<String, usize>,
}

impl InteractionLayout {
    /// Resolve a field index by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownName`] if no field has that name.
    pub fn field_by_name(&self, name: &str) -> Result<usize, CatalogError> {
        self.name_to_field
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownName {
                role: "interaction field",
                name: name.to_owned(),
            })
    }
}

/// The immutable layout catalog.
///
/// Built once at startup from a [`ModelSpec`] and consumed read-only by
/// every other component. Identical construction on every peer makes the
/// derived offsets globally valid.
#[derive(Debug)]
pub struct Catalog {
    model_name: String,
    types: Vec<AgentTypeLayout>,
    interactions: Vec<InteractionLayout>,
    type_names: HashMap<String, TypeId>,
    interaction_names: HashMap<String, InteractionKind>,
    max_record_size: usize,
}

impl Catalog {
    /// Derive all layouts from a model spec.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] for an empty model, duplicated names,
    /// or a default value that does not fit its wire type.
    pub fn build(spec: &ModelSpec) -> Result<Self, CatalogError> {
        if spec.agent_types.is_empty() {
            return Err(CatalogError::NoAgentTypes {
                model: spec.name.clone(),
            });
        }

        let mut types = Vec::with_capacity(spec.agent_types.len());
        let mut type_names = HashMap::new();
        let mut max_record_size = 0usize;

        for (type_index, type_def) in spec.agent_types.iter().enumerate() {
            if type_names
                .insert(type_def.name.clone(), TypeId(type_index as u32))
                .is_some()
            {
                return Err(CatalogError::DuplicateTypeName {
                    name: type_def.name.clone(),
                });
            }

            let mut attributes = Vec::with_capacity(type_def.attributes.len());
            let mut name_to_attr = HashMap::new();
            let mut record_offset = 0usize;
            let mut public_offset = 0usize;
            let mut critical_offset = 0usize;

            for (attr_index, attr_def) in type_def.attributes.iter().enumerate() {
                if name_to_attr
                    .insert(attr_def.name.clone(), AttrId(attr_index as u32))
                    .is_some()
                {
                    return Err(CatalogError::DuplicateAttributeName {
                        agent_type: type_def.name.clone(),
                        attr: attr_def.name.clone(),
                    });
                }

                let sub_offset = match attr_def.visibility {
                    Visibility::Private => None,
                    Visibility::Public => {
                        let o = public_offset;
                        public_offset += attr_def.wire.size();
                        Some(o)
                    }
                    Visibility::Critical => {
                        let o = critical_offset;
                        critical_offset += attr_def.wire.size();
                        Some(o)
                    }
                };

                let default = match &attr_def.default {
                    None => attr_def.wire.zero(),
                    Some(json) => Value::from_json(attr_def.wire, json).map_err(|source| {
                        CatalogError::InvalidDefault {
                            agent_type: type_def.name.clone(),
                            attr: attr_def.name.clone(),
                            source,
                        }
                    })?,
                };

                attributes.push(AttributeLayout {
                    name: attr_def.name.clone(),
                    wire: attr_def.wire,
                    visibility: attr_def.visibility,
                    record_offset,
                    sub_offset,
                    default,
                });
                record_offset += attr_def.wire.size();
            }

            max_record_size = max_record_size.max(record_offset);
            types.push(AgentTypeLayout {
                name: type_def.name.clone(),
                sendable: type_def.sendable,
                attributes,
                record_size: record_offset,
                public_size: public_offset,
                critical_size: critical_offset,
                name_to_attr,
            });
        }

        let mut interactions = Vec::with_capacity(spec.interactions.len());
        let mut interaction_names = HashMap::new();
        for (kind_index, inter_def) in spec.interactions.iter().enumerate() {
            if interaction_names
                .insert(inter_def.name.clone(), InteractionKind(kind_index as u32))
                .is_some()
            {
                return Err(CatalogError::DuplicateInteractionName {
                    name: inter_def.name.clone(),
                });
            }

            let mut fields = Vec::with_capacity(inter_def.fields.len());
            let mut name_to_field = HashMap::new();
            let mut offset = 0usize;
            for (field_index, field_def) in inter_def.fields.iter().enumerate() {
                if name_to_field
                    .insert(field_def.name.clone(), field_index)
                    .is_some()
                {
                    return Err(CatalogError::DuplicateFieldName {
                        interaction: inter_def.name.clone(),
                        field: field_def.name.clone(),
                    });
                }
                fields.push(FieldLayout {
                    name: field_def.name.clone(),
                    wire: field_def.wire,
                    offset,
                });
                offset += field_def.wire.size();
            }

            interactions.push(InteractionLayout {
                name: inter_def.name.clone(),
                fields,
                payload_size: offset,
                name_to_field,
            });
        }

        Ok(Self {
            model_name: spec.name.clone(),
            types,
            interactions,
            type_names,
            interaction_names,
            max_record_size,
        })
    }

    /// Name of the model this catalog was built from.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Number of agent types, `T`.
    pub fn nb_types(&self) -> u32 {
        self.types.len() as u32
    }

    /// Number of interaction types, `I`.
    pub fn nb_interactions(&self) -> u32 {
        self.interactions.len() as u32
    }

    /// The id codec for this model.
    pub fn codec(&self) -> IdCodec {
        IdCodec::new(self.nb_types())
    }

    /// Largest full attribute record across all types, used to size
    /// transfer buffers.
    pub const fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Layout of an agent type.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownType`] for an out-of-range id.
    pub fn agent_type(&self, type_id: TypeId) -> Result<&AgentTypeLayout, CatalogError> {
        self.types
            .get(type_id.0 as usize)
            .ok_or(CatalogError::UnknownType { type_id })
    }

    /// Layout of one attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownType`] or
    /// [`CatalogError::UnknownAttribute`] for out-of-range ids.
    pub fn attribute(&self, type_id: TypeId, attr: AttrId) -> Result<&AttributeLayout, CatalogError> {
        self.agent_type(type_id)?
            .attributes
            .get(attr.0 as usize)
            .ok_or(CatalogError::UnknownAttribute { type_id, attr })
    }

    /// Whether an attribute is critical.
    pub fn is_critical(&self, type_id: TypeId, attr: AttrId) -> bool {
        self.attribute(type_id, attr)
            .map(|a| a.visibility == Visibility::Critical)
            .unwrap_or(false)
    }

    /// Layout of an interaction type.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownInteraction`] for an out-of-range kind.
    pub fn interaction(&self, kind: InteractionKind) -> Result<&InteractionLayout, CatalogError> {
        self.interactions
            .get(kind.0 as usize)
            .ok_or(CatalogError::UnknownInteraction { kind })
    }

    /// Resolve an agent type by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownName`] if no type has that name.
    pub fn type_by_name(&self, name: &str) -> Result<TypeId, CatalogError> {
        self.type_names
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownName {
                role: "agent type",
                name: name.to_owned(),
            })
    }

    /// Resolve an interaction kind by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownName`] if no interaction has that name.
    pub fn interaction_by_name(&self, name: &str) -> Result<InteractionKind, CatalogError> {
        self.interaction_names
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownName {
                role: "interaction",
                name: name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentTypeDef, AttributeDef, FieldDef, InteractionDef};

    fn sample_spec() -> ModelSpec {
        ModelSpec {
            name: "sample".to_owned(),
            agent_types: vec![AgentTypeDef {
                name: "walker".to_owned(),
                sendable: true,
                attributes: vec![
                    AttributeDef {
                        name: "x".to_owned(),
                        wire: WireType::F64,
                        visibility: Visibility::Public,
                        default: None,
                    },
                    AttributeDef {
                        name: "mood".to_owned(),
                        wire: WireType::I64,
                        visibility: Visibility::Private,
                        default: Some(serde_json::json!(5)),
                    },
                    AttributeDef {
                        name: "count".to_owned(),
                        wire: WireType::U64,
                        visibility: Visibility::Critical,
                        default: None,
                    },
                    AttributeDef {
                        name: "y".to_owned(),
                        wire: WireType::F64,
                        visibility: Visibility::Public,
                        default: None,
                    },
                ],
            }],
            interactions: vec![InteractionDef {
                name: "ping".to_owned(),
                fields: vec![
                    FieldDef {
                        name: "from".to_owned(),
                        wire: WireType::U64,
                    },
                    FieldDef {
                        name: "strength".to_owned(),
                        wire: WireType::F64,
                    },
                ],
            }],
        }
    }

    #[test]
    fn record_offsets_are_cumulative() {
        let catalog = Catalog::build(&sample_spec()).unwrap();
        let t = catalog.agent_type(TypeId(0)).unwrap();
        let offsets: Vec<usize> = t.attributes.iter().map(|a| a.record_offset).collect();
        assert_eq!(offsets, vec![0, 8, 16, 24]);
        assert_eq!(t.record_size, 32);
    }

    #[test]
    fn sub_records_are_disjoint_and_packed() {
        let catalog = Catalog::build(&sample_spec()).unwrap();
        let t = catalog.agent_type(TypeId(0)).unwrap();
        // Public sub-record holds x then y.
        assert_eq!(t.attributes[0].sub_offset, Some(0));
        assert_eq!(t.attributes[3].sub_offset, Some(8));
        assert_eq!(t.public_size, 16);
        // Critical sub-record holds count alone.
        assert_eq!(t.attributes[2].sub_offset, Some(0));
        assert_eq!(t.critical_size, 8);
        // Private attributes belong to neither.
        assert_eq!(t.attributes[1].sub_offset, None);
    }

    #[test]
    fn build_is_deterministic() {
        let spec = sample_spec();
        let a = Catalog::build(&spec).unwrap();
        let b = Catalog::build(&spec).unwrap();
        let ta = a.agent_type(TypeId(0)).unwrap();
        let tb = b.agent_type(TypeId(0)).unwrap();
        for (x, y) in ta.attributes.iter().zip(&tb.attributes) {
            assert_eq!(x.record_offset, y.record_offset);
            assert_eq!(x.sub_offset, y.sub_offset);
        }
    }

    #[test]
    fn name_relations_resolve_both_ways() {
        let catalog = Catalog::build(&sample_spec()).unwrap();
        let t = catalog.type_by_name("walker").unwrap();
        assert_eq!(t, TypeId(0));
        let attr = catalog.agent_type(t).unwrap().attr_by_name("count").unwrap();
        assert_eq!(attr, AttrId(2));
        assert!(catalog.is_critical(t, attr));
        assert_eq!(catalog.interaction_by_name("ping").unwrap(), InteractionKind(0));
    }

    #[test]
    fn interaction_payload_layout() {
        let catalog = Catalog::build(&sample_spec()).unwrap();
        let inter = catalog.interaction(InteractionKind(0)).unwrap();
        assert_eq!(inter.payload_size, 16);
        assert_eq!(inter.field_by_name("strength").unwrap(), 1);
        assert_eq!(inter.fields[1].offset, 8);
    }

    #[test]
    fn declared_default_is_decoded() {
        let catalog = Catalog::build(&sample_spec()).unwrap();
        let attr = catalog.attribute(TypeId(0), AttrId(1)).unwrap();
        assert_eq!(attr.default, Value::I64(5));
    }

    #[test]
    fn duplicate_attribute_is_rejected() {
        let mut spec = sample_spec();
        spec.agent_types[0].attributes[3].name = "x".to_owned();
        let err = Catalog::build(&spec).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateAttributeName { .. }));
    }

    #[test]
    fn empty_model_is_rejected() {
        let spec = ModelSpec {
            name: "empty".to_owned(),
            agent_types: vec![],
            interactions: vec![],
        };
        assert!(matches!(
            Catalog::build(&spec).unwrap_err(),
            CatalogError::NoAgentTypes { .. }
        ));
    }
}
