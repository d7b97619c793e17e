//! Agent cells: catalog-driven attribute records plus step bookkeeping.
//!
//! One cell type serves every agent type because the record layout is
//! catalog data. Besides the live record, a cell keeps:
//!
//! - the received-interaction lists, one per interaction kind, consumed
//!   by the behavior and cleared after it runs;
//! - a shadow copy of the critical sub-record as of the last commit,
//!   used to detect which critical attributes changed and so avoid
//!   re-broadcasting untouched ones;
//! - the list of changed critical attributes, filled after the behavior
//!   and drained by the publication phase.

use serde::{Deserialize, Serialize};

use lockstep_catalog::{Catalog, Visibility};
use lockstep_types::{AttrId, GlobalId, IdCodec, InteractionKind, LocalId, TypeId, Value};

use crate::error::AgentError;
use crate::interaction::Interaction;

/// Wire form of an agent: identity plus the full attribute record.
///
/// Used to distribute agents at initialization and as the self-owned
/// backing store of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Local identifier among agents of the same type.
    pub local_id: LocalId,
    /// Agent type.
    pub type_id: TypeId,
    /// Full attribute record bytes, catalog layout.
    pub bytes: Vec<u8>,
}

/// One agent's live state on its owning master.
#[derive(Debug)]
pub struct AgentCell {
    local_id: LocalId,
    type_id: TypeId,
    record: Vec<u8>,
    committed_critical: Vec<u8>,
    updated_critical: Vec<AttrId>,
    received: Vec<Vec<Interaction>>,
}

impl AgentCell {
    /// Create a cell with every attribute at its declared default.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown type.
    pub fn with_defaults(
        catalog: &Catalog,
        local_id: LocalId,
        type_id: TypeId,
    ) -> Result<Self, AgentError> {
        let layout = catalog.agent_type(type_id)?;
        let mut record = vec![0u8; layout.record_size];
        for attr in &layout.attributes {
            attr.default
                .encode(&mut record[attr.record_offset..attr.record_offset + attr.size()])?;
        }
        Self::from_parts(catalog, local_id, type_id, record)
    }

    /// Reconstruct a cell from its wire record.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RecordSize`] when the byte length does not
    /// match the catalog layout.
    pub fn from_record(catalog: &Catalog, record: &AgentRecord) -> Result<Self, AgentError> {
        Self::from_parts(
            catalog,
            record.local_id,
            record.type_id,
            record.bytes.clone(),
        )
    }

    fn from_parts(
        catalog: &Catalog,
        local_id: LocalId,
        type_id: TypeId,
        record: Vec<u8>,
    ) -> Result<Self, AgentError> {
        let layout = catalog.agent_type(type_id)?;
        if record.len() != layout.record_size {
            return Err(AgentError::RecordSize {
                type_id,
                expected: layout.record_size,
                got: record.len(),
            });
        }
        let mut cell = Self {
            local_id,
            type_id,
            record,
            committed_critical: vec![0u8; layout.critical_size],
            updated_critical: Vec::new(),
            received: (0..catalog.nb_interactions()).map(|_| Vec::new()).collect(),
        };
        // The initial state counts as committed.
        cell.commit_critical(catalog)?;
        Ok(cell)
    }

    /// Local identifier.
    pub const fn local_id(&self) -> LocalId {
        self.local_id
    }

    /// Agent type.
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Global identifier under the given codec.
    pub const fn global_id(&self, codec: IdCodec) -> GlobalId {
        codec.global(self.local_id, self.type_id)
    }

    /// The wire form of this agent.
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            local_id: self.local_id,
            type_id: self.type_id,
            bytes: self.record.clone(),
        }
    }

    /// Read one attribute as a typed value.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown attribute.
    pub fn value(&self, catalog: &Catalog, attr: AttrId) -> Result<Value, AgentError> {
        let layout = catalog.attribute(self.type_id, attr)?;
        Ok(Value::decode(layout.wire, &self.record[layout.record_offset..])?)
    }

    /// Write one attribute from a typed value.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown attribute or a value error
    /// on a wire-type mismatch.
    pub fn set_value(
        &mut self,
        catalog: &Catalog,
        attr: AttrId,
        value: Value,
    ) -> Result<(), AgentError> {
        let layout = catalog.attribute(self.type_id, attr)?;
        let value = value.expect_wire(layout.wire)?;
        value.encode(&mut self.record[layout.record_offset..layout.record_offset + layout.size()])?;
        Ok(())
    }

    /// Borrow the raw bytes of one attribute.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown attribute.
    pub fn attribute_bytes(&self, catalog: &Catalog, attr: AttrId) -> Result<&[u8], AgentError> {
        let layout = catalog.attribute(self.type_id, attr)?;
        Ok(&self.record[layout.record_offset..layout.record_offset + layout.size()])
    }

    /// Append a delivered interaction to its kind's received list.
    pub fn receive_message(&mut self, interaction: Interaction) {
        let kind = interaction.kind.0 as usize;
        if let Some(list) = self.received.get_mut(kind) {
            list.push(interaction);
        }
    }

    /// Interactions of one kind received for the current step.
    pub fn received(&self, kind: InteractionKind) -> &[Interaction] {
        self.received
            .get(kind.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Clear all received lists; called after the behavior runs.
    pub fn reset_messages(&mut self) {
        for list in &mut self.received {
            list.clear();
        }
    }

    /// Compare the critical attributes against the committed shadow and
    /// record which ones changed since the last commit.
    ///
    /// Runs right after the behavior; the publication phase drains the
    /// result. Attributes whose byte representation is unchanged are not
    /// listed, so they are not re-broadcast.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown type.
    pub fn check_modified_critical(&mut self, catalog: &Catalog) -> Result<(), AgentError> {
        let layout = catalog.agent_type(self.type_id)?;
        self.updated_critical.clear();
        for (index, attr) in layout.attributes.iter().enumerate() {
            if attr.visibility != Visibility::Critical {
                continue;
            }
            let sub_offset = match attr.sub_offset {
                Some(o) => o,
                None => continue,
            };
            let live = &self.record[attr.record_offset..attr.record_offset + attr.size()];
            let committed = &self.committed_critical[sub_offset..sub_offset + attr.size()];
            if live != committed {
                self.updated_critical.push(AttrId(index as u32));
            }
        }
        Ok(())
    }

    /// Drain the list of critical attributes modified since the last
    /// commit.
    pub fn take_critical_updates(&mut self) -> Vec<AttrId> {
        std::mem::take(&mut self.updated_critical)
    }

    /// Refresh the committed shadow from the live record; called by the
    /// publication phase after the deltas went out.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown type.
    pub fn commit_critical(&mut self, catalog: &Catalog) -> Result<(), AgentError> {
        let layout = catalog.agent_type(self.type_id)?;
        for attr in &layout.attributes {
            if let (Visibility::Critical, Some(sub_offset)) = (attr.visibility, attr.sub_offset) {
                let live = &self.record[attr.record_offset..attr.record_offset + attr.size()];
                self.committed_critical[sub_offset..sub_offset + attr.size()]
                    .copy_from_slice(live);
            }
        }
        Ok(())
    }

    /// Copy the public (non-critical) sub-record into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::CopySize`] when `dst` does not match the
    /// sub-record size.
    pub fn copy_public_record(&self, catalog: &Catalog, dst: &mut [u8]) -> Result<(), AgentError> {
        self.copy_sub_record(catalog, Visibility::Public, dst)
    }

    /// Copy the critical sub-record into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::CopySize`] when `dst` does not match the
    /// sub-record size.
    pub fn copy_critical_record(&self, catalog: &Catalog, dst: &mut [u8]) -> Result<(), AgentError> {
        self.copy_sub_record(catalog, Visibility::Critical, dst)
    }

    fn copy_sub_record(
        &self,
        catalog: &Catalog,
        visibility: Visibility,
        dst: &mut [u8],
    ) -> Result<(), AgentError> {
        let layout = catalog.agent_type(self.type_id)?;
        let expected = match visibility {
            Visibility::Public => layout.public_size,
            Visibility::Critical => layout.critical_size,
            Visibility::Private => 0,
        };
        if dst.len() != expected {
            return Err(AgentError::CopySize {
                expected,
                got: dst.len(),
            });
        }
        for attr in &layout.attributes {
            if attr.visibility != visibility {
                continue;
            }
            if let Some(sub_offset) = attr.sub_offset {
                dst[sub_offset..sub_offset + attr.size()].copy_from_slice(
                    &self.record[attr.record_offset..attr.record_offset + attr.size()],
                );
            }
        }
        Ok(())
    }

    /// The snapshot entry for this agent: `{id, attributes: {name -> value}}`.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown type.
    pub fn snapshot(&self, catalog: &Catalog) -> Result<serde_json::Value, AgentError> {
        let layout = catalog.agent_type(self.type_id)?;
        let mut attributes = serde_json::Map::new();
        for attr in &layout.attributes {
            let value = Value::decode(attr.wire, &self.record[attr.record_offset..])?;
            attributes.insert(attr.name.clone(), value.to_json());
        }
        Ok(serde_json::json!({
            "id": self.local_id,
            "attributes": attributes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_catalog::{AgentTypeDef, AttributeDef, InteractionDef, ModelSpec, Visibility};
    use lockstep_types::WireType;

    fn catalog() -> Catalog {
        Catalog::build(&ModelSpec {
            name: "test".to_owned(),
            agent_types: vec![AgentTypeDef {
                name: "walker".to_owned(),
                sendable: true,
                attributes: vec![
                    AttributeDef {
                        name: "x".to_owned(),
                        wire: WireType::F64,
                        visibility: Visibility::Public,
                        default: Some(serde_json::json!(1.5)),
                    },
                    AttributeDef {
                        name: "c".to_owned(),
                        wire: WireType::U64,
                        visibility: Visibility::Critical,
                        default: None,
                    },
                    AttributeDef {
                        name: "secret".to_owned(),
                        wire: WireType::I64,
                        visibility: Visibility::Private,
                        default: None,
                    },
                ],
            }],
            interactions: vec![InteractionDef {
                name: "nudge".to_owned(),
                fields: vec![],
            }],
        })
        .unwrap()
    }

    fn cell(catalog: &Catalog) -> AgentCell {
        AgentCell::with_defaults(catalog, LocalId(4), TypeId(0)).unwrap()
    }

    #[test]
    fn defaults_populate_the_record() {
        let catalog = catalog();
        let cell = cell(&catalog);
        assert_eq!(cell.value(&catalog, AttrId(0)).unwrap(), Value::F64(1.5));
        assert_eq!(cell.value(&catalog, AttrId(1)).unwrap(), Value::U64(0));
    }

    #[test]
    fn wire_record_round_trips() {
        let catalog = catalog();
        let mut original = cell(&catalog);
        original.set_value(&catalog, AttrId(2), Value::I64(-9)).unwrap();
        let restored = AgentCell::from_record(&catalog, &original.to_record()).unwrap();
        assert_eq!(restored.value(&catalog, AttrId(2)).unwrap(), Value::I64(-9));
    }

    #[test]
    fn unchanged_critical_attribute_is_not_reported() {
        let catalog = catalog();
        let mut cell = cell(&catalog);
        cell.check_modified_critical(&catalog).unwrap();
        assert!(cell.take_critical_updates().is_empty());
    }

    #[test]
    fn modified_critical_attribute_is_reported_once() {
        let catalog = catalog();
        let mut cell = cell(&catalog);
        cell.set_value(&catalog, AttrId(1), Value::U64(3)).unwrap();
        cell.check_modified_critical(&catalog).unwrap();
        assert_eq!(cell.take_critical_updates(), vec![AttrId(1)]);
        cell.commit_critical(&catalog).unwrap();
        // Committed: the same value must not be reported again.
        cell.check_modified_critical(&catalog).unwrap();
        assert!(cell.take_critical_updates().is_empty());
    }

    #[test]
    fn public_copy_excludes_critical_and_private() {
        let catalog = catalog();
        let mut cell = cell(&catalog);
        cell.set_value(&catalog, AttrId(0), Value::F64(2.0)).unwrap();
        let mut dst = vec![0u8; 8];
        cell.copy_public_record(&catalog, &mut dst).unwrap();
        assert_eq!(Value::decode(WireType::F64, &dst).unwrap(), Value::F64(2.0));
    }

    #[test]
    fn received_lists_clear_on_reset() {
        let catalog = catalog();
        let mut cell = cell(&catalog);
        let inter = Interaction::build(
            &catalog,
            InteractionKind(0),
            GlobalId(0),
            GlobalId(4),
            &[],
        )
        .unwrap();
        cell.receive_message(inter.clone());
        cell.receive_message(inter);
        assert_eq!(cell.received(InteractionKind(0)).len(), 2);
        cell.reset_messages();
        assert!(cell.received(InteractionKind(0)).is_empty());
    }

    #[test]
    fn snapshot_lists_every_attribute_by_name() {
        let catalog = catalog();
        let cell = cell(&catalog);
        let snap = cell.snapshot(&catalog).unwrap();
        assert_eq!(snap["id"], serde_json::json!(4));
        assert_eq!(snap["attributes"]["x"], serde_json::json!(1.5));
        assert_eq!(snap["attributes"]["c"], serde_json::json!(0));
        assert_eq!(snap["attributes"]["secret"], serde_json::json!(0));
    }
}
