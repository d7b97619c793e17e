//! Built-in models.
//!
//! The catalog-building toolchain that derives model metadata from user
//! code is an external collaborator; the engine ships the models it can
//! run as data plus registered behaviors. `drift` is the default: a
//! ring of walkers chasing their successor's public position, keeping a
//! critical step counter, and greeting their neighbour now and then.

use std::sync::Arc;

use rand::Rng;

use lockstep_catalog::{
    AgentTypeDef, AttributeDef, Catalog, FieldDef, InteractionDef, ModelSpec, Visibility,
};
use lockstep_core::behavior::BehaviorTable;
use lockstep_core::BehaviorCtx;
use lockstep_types::{AttrId, InteractionKind, LocalId, TypeId, Value, WireType};

use crate::error::EngineError;

/// A catalog plus its registered behaviors, ready to launch.
#[derive(Debug)]
pub struct LoadedModel {
    /// The immutable layout catalog.
    pub catalog: Arc<Catalog>,
    /// The per-type behavior dispatch table.
    pub behaviors: Arc<BehaviorTable>,
}

/// Load a built-in model by name.
///
/// # Errors
///
/// Returns [`EngineError::UnknownModel`] for a name the engine does not
/// ship.
pub fn load(name: &str) -> Result<LoadedModel, EngineError> {
    match name {
        "drift" => drift(),
        other => Err(EngineError::UnknownModel {
            name: other.to_owned(),
        }),
    }
}

fn drift_spec() -> ModelSpec {
    ModelSpec {
        name: "drift".to_owned(),
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
                    name: "pace".to_owned(),
                    wire: WireType::F64,
                    visibility: Visibility::Private,
                    default: Some(serde_json::json!(0.25)),
                },
                AttributeDef {
                    name: "steps".to_owned(),
                    wire: WireType::U64,
                    visibility: Visibility::Critical,
                    default: None,
                },
            ],
        }],
        interactions: vec![InteractionDef {
            name: "greet".to_owned(),
            fields: vec![FieldDef {
                name: "from".to_owned(),
                wire: WireType::U64,
            }],
        }],
    }
}

fn drift() -> Result<LoadedModel, EngineError> {
    let catalog = Arc::new(Catalog::build(&drift_spec())?);
    let walker = TypeId(0);
    let x = AttrId(0);
    let pace = AttrId(1);
    let steps = AttrId(2);
    let greet = InteractionKind(0);

    let mut table = BehaviorTable::new(&catalog);
    table.register(walker, move |ctx: &mut BehaviorCtx<'_, '_>| {
        let bound = ctx.agent_id_type_bound(walker);
        if bound == 0 {
            return Ok(());
        }
        let next = LocalId((ctx.self_local_id().0 + 1) % bound);

        // Chase the successor's committed position.
        let target = ctx.ask_attribute(x, next, walker)?.as_f64().unwrap_or(0.0);
        let mine = ctx.own(x)?.as_f64().unwrap_or(0.0);
        let gait = ctx.own(pace)?.as_f64().unwrap_or(0.0);
        ctx.set_own(x, Value::F64(mine + (target - mine) * gait))?;

        let walked = ctx.own(steps)?.as_u64().unwrap_or(0);
        ctx.set_own(steps, Value::U64(walked + 1))?;

        if rand::rng().random_bool(0.1) {
            let from = ctx.self_local_id().0;
            ctx.send_message(greet, next, walker, &[Value::U64(from)])?;
        }
        Ok(())
    });

    Ok(LoadedModel {
        catalog,
        behaviors: Arc::new(table),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_model_builds() {
        let model = load("drift").unwrap();
        assert_eq!(model.catalog.nb_types(), 1);
        assert_eq!(model.catalog.nb_interactions(), 1);
        assert!(model.behaviors.get(TypeId(0)).is_some());
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(matches!(
            load("does-not-exist").unwrap_err(),
            EngineError::UnknownModel { .. }
        ));
    }

    #[test]
    fn drift_attributes_have_expected_visibility() {
        let model = load("drift").unwrap();
        let walker = model.catalog.agent_type(TypeId(0)).unwrap();
        assert_eq!(walker.public_size, 8);
        assert_eq!(walker.critical_size, 8);
        assert_eq!(walker.attr_by_name("pace").unwrap(), AttrId(1));
    }
}
