//! Snapshot export, snapshot-to-instance conversion and instantiation.
//!
//! The snapshot is a self-describing document with one top-level
//! `agents` mapping from type name to the ordered sequence of
//! `{id, attributes: {name -> value}}`. `convert` rewrites a snapshot
//! into an instantiation document by wrapping each typed sequence into
//! `{type, number, agents}`; instantiation parses that document (with
//! optional `default_values`) back into agent records.

use std::collections::{BTreeMap, BTreeSet};

use lockstep_agents::{AgentCell, AgentError, AgentRecord};
use lockstep_catalog::{Catalog, CatalogError};
use lockstep_types::{LocalId, TypeId, Value, ValueError};

use crate::handler::HandlerGroup;

/// Errors raised by export, conversion and instantiation.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A catalog lookup failed (unknown type or attribute name).
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// An agent-state operation failed.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: AgentError,
    },

    /// A value conversion failed.
    #[error("value error: {source}")]
    Value {
        /// The underlying value error.
        #[from]
        source: ValueError,
    },

    /// A document does not have the expected shape.
    #[error("malformed document: {reason}")]
    Malformed {
        /// What is wrong with the document.
        reason: String,
    },
}

fn malformed(reason: impl Into<String>) -> ExportError {
    ExportError::Malformed {
        reason: reason.into(),
    }
}

/// This master's contribution to the snapshot: local agents grouped by
/// type name, each type's sequence ordered by local id.
pub(crate) fn local_snapshot(
    catalog: &Catalog,
    handlers: &[HandlerGroup],
) -> Result<serde_json::Value, ExportError> {
    let mut by_type: Vec<BTreeMap<u64, serde_json::Value>> =
        (0..catalog.nb_types()).map(|_| BTreeMap::new()).collect();
    for group in handlers {
        for cell in group.agents() {
            by_type[cell.type_id().0 as usize]
                .insert(cell.local_id().0, cell.snapshot(catalog)?);
        }
    }

    let mut map = serde_json::Map::new();
    for (type_index, agents) in by_type.into_iter().enumerate() {
        let name = catalog.agent_type(TypeId(type_index as u32))?.name.clone();
        map.insert(
            name,
            serde_json::Value::Array(agents.into_values().collect()),
        );
    }
    Ok(serde_json::Value::Object(map))
}

/// Assemble the global snapshot from the gathered per-master parts,
/// concatenated in rank order per type.
pub(crate) fn assemble_snapshot(
    catalog: &Catalog,
    parts: Vec<serde_json::Value>,
) -> Result<serde_json::Value, ExportError> {
    let mut agents = serde_json::Map::new();
    for type_index in 0..catalog.nb_types() {
        let name = catalog.agent_type(TypeId(type_index))?.name.clone();
        let mut sequence = Vec::new();
        for part in &parts {
            if let Some(list) = part.get(&name).and_then(serde_json::Value::as_array) {
                sequence.extend(list.iter().cloned());
            }
        }
        agents.insert(name, serde_json::Value::Array(sequence));
    }
    Ok(serde_json::json!({ "agents": agents }))
}

/// Rewrite a snapshot into an instantiation document.
///
/// # Errors
///
/// Returns [`ExportError::Malformed`] when the snapshot shape is wrong.
pub fn convert_snapshot(snapshot: &serde_json::Value) -> Result<serde_json::Value, ExportError> {
    let agents = snapshot
        .get("agents")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| malformed("snapshot has no `agents` mapping"))?;

    let mut agent_types = Vec::with_capacity(agents.len());
    for (name, sequence) in agents {
        let list = sequence
            .as_array()
            .ok_or_else(|| malformed(format!("agents of type `{name}` is not a sequence")))?;
        agent_types.push(serde_json::json!({
            "type": name,
            "number": list.len(),
            "agents": list,
        }));
    }
    Ok(serde_json::json!({ "agent_types": agent_types }))
}

/// Parse an instantiation document into agent records.
///
/// Each `agent_types` entry creates `number` agents of its type:
/// explicitly listed agents keep their ids and attribute overrides, the
/// rest take the smallest unused ids. Unspecified attributes fall back
/// to the entry's `default_values`, then to the type's declared default.
///
/// # Errors
///
/// Returns [`ExportError::Malformed`] for a wrongly shaped document, a
/// catalog error for unknown names, or a value error for ill-typed
/// values.
pub fn parse_instance(
    catalog: &Catalog,
    doc: &serde_json::Value,
) -> Result<Vec<AgentRecord>, ExportError> {
    let entries = doc
        .get("agent_types")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| malformed("instantiation has no `agent_types` sequence"))?;

    let mut records = Vec::new();
    for entry in entries {
        let type_name = entry
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| malformed("agent_types entry has no `type` name"))?;
        let type_id = catalog.type_by_name(type_name)?;

        let listed = match entry.get("agents") {
            None => &[][..],
            Some(value) => value
                .as_array()
                .map(Vec::as_slice)
                .ok_or_else(|| malformed(format!("agents of `{type_name}` is not a sequence")))?,
        };
        let number = entry
            .get("number")
            .and_then(serde_json::Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(listed.len())
            .max(listed.len());
        let defaults = entry
            .get("default_values")
            .and_then(serde_json::Value::as_object);

        let mut used_ids = BTreeSet::new();
        for agent in listed {
            let local_id = agent
                .get("id")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| malformed(format!("agent of `{type_name}` has no integer `id`")))?;
            if !used_ids.insert(local_id) {
                return Err(malformed(format!(
                    "agent id {local_id} of `{type_name}` appears twice"
                )));
            }
            let mut cell = AgentCell::with_defaults(catalog, LocalId(local_id), type_id)?;
            if let Some(defaults) = defaults {
                apply_overrides(catalog, &mut cell, type_id, defaults)?;
            }
            if let Some(attributes) = agent
                .get("attributes")
                .and_then(serde_json::Value::as_object)
            {
                apply_overrides(catalog, &mut cell, type_id, attributes)?;
            }
            records.push(cell.to_record());
        }

        // Fill up to `number` with fresh ids at the declared defaults.
        let mut next_id = 0u64;
        let mut created = listed.len();
        while created < number {
            while used_ids.contains(&next_id) {
                next_id += 1;
            }
            let mut cell = AgentCell::with_defaults(catalog, LocalId(next_id), type_id)?;
            if let Some(defaults) = defaults {
                apply_overrides(catalog, &mut cell, type_id, defaults)?;
            }
            records.push(cell.to_record());
            used_ids.insert(next_id);
            created += 1;
        }
    }
    Ok(records)
}

/// Apply `{attribute name -> json value}` overrides to a cell.
fn apply_overrides(
    catalog: &Catalog,
    cell: &mut AgentCell,
    type_id: TypeId,
    overrides: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ExportError> {
    let type_layout = catalog.agent_type(type_id)?;
    for (attr_name, json) in overrides {
        let attr = type_layout.attr_by_name(attr_name)?;
        let wire = catalog.attribute(type_id, attr)?.wire;
        let value = Value::from_json(wire, json)?;
        cell.set_value(catalog, attr, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_catalog::{AgentTypeDef, AttributeDef, ModelSpec, Visibility};
    use lockstep_types::{AttrId, WireType};

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
                        default: Some(serde_json::json!(1.0)),
                    },
                    AttributeDef {
                        name: "c".to_owned(),
                        wire: WireType::U64,
                        visibility: Visibility::Critical,
                        default: None,
                    },
                ],
            }],
            interactions: vec![],
        })
        .unwrap()
    }

    #[test]
    fn instance_fills_unlisted_agents_with_defaults() {
        let catalog = catalog();
        let doc = serde_json::json!({
            "agent_types": [{
                "type": "walker",
                "number": 3,
                "default_values": { "c": 7 },
                "agents": [{ "id": 1, "attributes": { "x": 5.0 } }],
            }]
        });
        let records = parse_instance(&catalog, &doc).unwrap();
        assert_eq!(records.len(), 3);
        // Listed agent keeps its id and override.
        let listed = AgentCell::from_record(&catalog, &records[0]).unwrap();
        assert_eq!(listed.local_id(), LocalId(1));
        assert_eq!(listed.value(&catalog, AttrId(0)).unwrap(), Value::F64(5.0));
        assert_eq!(listed.value(&catalog, AttrId(1)).unwrap(), Value::U64(7));
        // Fresh agents take the smallest unused ids: 0 and 2.
        let fresh: Vec<u64> = records[1..]
            .iter()
            .map(|record| record.local_id.0)
            .collect();
        assert_eq!(fresh, vec![0, 2]);
        let fresh_cell = AgentCell::from_record(&catalog, &records[1]).unwrap();
        assert_eq!(fresh_cell.value(&catalog, AttrId(0)).unwrap(), Value::F64(1.0));
        assert_eq!(fresh_cell.value(&catalog, AttrId(1)).unwrap(), Value::U64(7));
    }

    #[test]
    fn duplicate_listed_id_is_malformed() {
        let catalog = catalog();
        let doc = serde_json::json!({
            "agent_types": [{
                "type": "walker",
                "number": 2,
                "agents": [{ "id": 0 }, { "id": 0 }],
            }]
        });
        assert!(matches!(
            parse_instance(&catalog, &doc).unwrap_err(),
            ExportError::Malformed { .. }
        ));
    }

    #[test]
    fn unknown_type_name_is_reported() {
        let catalog = catalog();
        let doc = serde_json::json!({
            "agent_types": [{ "type": "ghost", "number": 1 }]
        });
        assert!(matches!(
            parse_instance(&catalog, &doc).unwrap_err(),
            ExportError::Catalog { .. }
        ));
    }

    #[test]
    fn convert_wraps_each_typed_sequence() {
        let snapshot = serde_json::json!({
            "agents": {
                "walker": [
                    { "id": 0, "attributes": { "x": 1.0, "c": 2 } },
                    { "id": 1, "attributes": { "x": 3.0, "c": 4 } },
                ],
            }
        });
        let instance = convert_snapshot(&snapshot).unwrap();
        let entry = &instance["agent_types"][0];
        assert_eq!(entry["type"], "walker");
        assert_eq!(entry["number"], 2);
        assert_eq!(entry["agents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn convert_rejects_missing_agents_mapping() {
        let err = convert_snapshot(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ExportError::Malformed { .. }));
    }

    #[test]
    fn snapshot_convert_instance_round_trips_values() {
        let catalog = catalog();
        let doc = serde_json::json!({
            "agent_types": [{
                "type": "walker",
                "number": 2,
                "agents": [
                    { "id": 0, "attributes": { "x": 0.5, "c": 10 } },
                    { "id": 1, "attributes": { "x": 1.5, "c": 11 } },
                ],
            }]
        });
        let records = parse_instance(&catalog, &doc).unwrap();
        // Snapshot the parsed agents and run them back through convert.
        let mut handlers = vec![HandlerGroup::new()];
        for record in &records {
            handlers[0].add_agent(AgentCell::from_record(&catalog, record).unwrap());
        }
        let local = local_snapshot(&catalog, &handlers).unwrap();
        let snapshot = assemble_snapshot(&catalog, vec![local]).unwrap();
        let instance = convert_snapshot(&snapshot).unwrap();
        let reparsed = parse_instance(&catalog, &instance).unwrap();
        assert_eq!(records, reparsed);
    }
}
