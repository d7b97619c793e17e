//! Behavior dispatch and the context behaviors run against.
//!
//! The runtime is polymorphic over a per-type dispatch table: a
//! [`BehaviorTable`] maps each agent type to the user function invoked
//! once per agent per step. The function receives a [`BehaviorCtx`]
//! exposing exactly the model surface:
//!
//! - its own live attributes (mutable);
//! - committed attributes of any agent, local or remote, as of the
//!   previous step's publication;
//! - interaction emission and the interactions received this step;
//! - the cluster queries (`does_agent_exist`, `agents_of_type`,
//!   `agent_id_type_bound`, `time_step`).
//!
//! Attribute requests route by visibility: critical attributes come from
//! the local replica, public ones go through the read cache backed by a
//! one-sided fetch from the owner's window.

use std::sync::Arc;

use tracing::warn;

use lockstep_agents::{AgentCell, AgentError, Interaction};
use lockstep_catalog::{Catalog, CatalogError, Visibility};
use lockstep_fabric::{FabricError, ReadEpoch};
use lockstep_types::{
    AttrId, GlobalId, IdCodec, InteractionKind, LocalId, MasterId, TypeId, Value, ValueError,
};

use crate::cache::ReadCache;
use crate::master::Directory;
use crate::router::Outbox;
use crate::windows::WindowLayout;

/// Errors a behavior invocation can produce.
///
/// They are caught at the handler-thread boundary, logged, and do not
/// abort the step for other agents.
#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    /// An attribute was requested for an agent that does not exist.
    #[error("agent {local_id} of type `{type_name}` does not exist")]
    AgentNotFound {
        /// Local id of the missing agent.
        local_id: LocalId,
        /// Name of its claimed type.
        type_name: String,
    },

    /// A private attribute cannot be requested remotely.
    #[error("attribute `{attr_name}` of type `{type_name}` is private")]
    AttributeNotReadable {
        /// The agent type.
        type_name: String,
        /// The private attribute.
        attr_name: String,
    },

    /// A catalog lookup failed.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// A one-sided read failed.
    #[error("fabric error: {source}")]
    Fabric {
        /// The underlying fabric error.
        #[from]
        source: FabricError,
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

    /// A window offset lookup failed.
    #[error("agent {global} has no window offset")]
    UnknownOffset {
        /// The unmapped global id.
        global: GlobalId,
    },

    /// A model-level failure reported by the behavior itself.
    #[error("model error: {message}")]
    Model {
        /// The behavior's description of the failure.
        message: String,
    },
}

/// The function type a behavior registers as.
pub type BehaviorFn =
    Arc<dyn for<'a, 'b> Fn(&mut BehaviorCtx<'a, 'b>) -> Result<(), BehaviorError> + Send + Sync>;

/// Per-type behavior dispatch table, indexed by `TypeId`.
///
/// Types without a registered behavior simply do nothing each step;
/// their agents still receive interactions and publish attributes.
pub struct BehaviorTable {
    by_type: Vec<Option<BehaviorFn>>,
}

impl std::fmt::Debug for BehaviorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorTable")
            .field("types", &self.by_type.len())
            .finish()
    }
}

impl BehaviorTable {
    /// Create an empty table sized for the catalog's agent types.
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            by_type: (0..catalog.nb_types()).map(|_| None).collect(),
        }
    }

    /// Register the behavior of one agent type.
    pub fn register<F>(&mut self, type_id: TypeId, behavior: F)
    where
        F: for<'a, 'b> Fn(&mut BehaviorCtx<'a, 'b>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        if let Some(slot) = self.by_type.get_mut(type_id.0 as usize) {
            *slot = Some(Arc::new(behavior));
        }
    }

    /// The behavior registered for a type, if any.
    pub fn get(&self, type_id: TypeId) -> Option<&BehaviorFn> {
        self.by_type.get(type_id.0 as usize).and_then(Option::as_ref)
    }
}

/// Everything a behavior phase shares between handler threads.
pub struct StepResources<'a> {
    pub(crate) catalog: &'a Catalog,
    pub(crate) codec: IdCodec,
    pub(crate) rank: MasterId,
    pub(crate) step: u64,
    pub(crate) directory: &'a Directory,
    pub(crate) layout: &'a WindowLayout,
    pub(crate) cache: &'a ReadCache,
    pub(crate) outbox: &'a Outbox,
    pub(crate) public: ReadEpoch<'a>,
    pub(crate) critical: ReadEpoch<'a>,
    pub(crate) behaviors: &'a BehaviorTable,
}

/// The surface one behavior invocation sees.
pub struct BehaviorCtx<'a, 'b> {
    res: &'a StepResources<'b>,
    cell: &'a mut AgentCell,
}

impl<'a, 'b> BehaviorCtx<'a, 'b> {
    pub(crate) fn new(res: &'a StepResources<'b>, cell: &'a mut AgentCell) -> Self {
        Self { res, cell }
    }

    /// The current time step.
    pub const fn time_step(&self) -> u64 {
        self.res.step
    }

    /// The model catalog.
    pub const fn catalog(&self) -> &'b Catalog {
        self.res.catalog
    }

    /// This agent's local id.
    pub const fn self_local_id(&self) -> LocalId {
        self.cell.local_id()
    }

    /// This agent's type.
    pub const fn self_type(&self) -> TypeId {
        self.cell.type_id()
    }

    /// This agent's global id.
    pub const fn self_global_id(&self) -> GlobalId {
        self.cell.global_id(self.res.codec)
    }

    /// Read one of this agent's own attributes from its live state.
    ///
    /// Own writes are visible here immediately; other agents observe
    /// them only after the next publication.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown attribute.
    pub fn own(&self, attr: AttrId) -> Result<Value, BehaviorError> {
        Ok(self.cell.value(self.res.catalog, attr)?)
    }

    /// Write one of this agent's own attributes.
    ///
    /// # Errors
    ///
    /// Returns a catalog error for an unknown attribute or a value
    /// error on a wire-type mismatch.
    pub fn set_own(&mut self, attr: AttrId, value: Value) -> Result<(), BehaviorError> {
        Ok(self.cell.set_value(self.res.catalog, attr, value)?)
    }

    /// Interactions of one kind received for this step.
    pub fn received(&self, kind: InteractionKind) -> &[Interaction] {
        self.cell.received(kind)
    }

    /// Whether an agent exists anywhere in the cluster.
    pub fn does_agent_exist(&self, local_id: LocalId, type_id: TypeId) -> bool {
        self.res.directory.exists(local_id, type_id)
    }

    /// The ordered local ids of every agent of a type, cluster-wide.
    pub fn agents_of_type(&self, type_id: TypeId) -> Vec<LocalId> {
        self.res.directory.agents_of_type(type_id)
    }

    /// Max local id + 1 among agents of a type (0 when there are none).
    pub fn agent_id_type_bound(&self, type_id: TypeId) -> u64 {
        self.res.directory.bound(type_id)
    }

    /// Request a committed attribute of any agent in the cluster.
    ///
    /// Critical attributes are served from the local replica; public
    /// non-critical ones through the per-step cache backed by a
    /// one-sided fetch from the owner's public window. Values are as of
    /// the previous step's publication.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError::AgentNotFound`] for a nonexistent
    /// recipient and [`BehaviorError::AttributeNotReadable`] for a
    /// private attribute.
    pub fn ask_attribute(
        &self,
        attr: AttrId,
        recipient_id: LocalId,
        recipient_type: TypeId,
    ) -> Result<Value, BehaviorError> {
        let res = self.res;
        let type_layout = res.catalog.agent_type(recipient_type)?;
        if !res.directory.exists(recipient_id, recipient_type) {
            return Err(BehaviorError::AgentNotFound {
                local_id: recipient_id,
                type_name: type_layout.name.clone(),
            });
        }
        let global = res.codec.global(recipient_id, recipient_type);
        let attr_layout = res.catalog.attribute(recipient_type, attr)?;
        let size = attr_layout.size();
        match (attr_layout.visibility, attr_layout.sub_offset) {
            (Visibility::Critical, Some(sub_offset)) => {
                let base = res
                    .layout
                    .critical_offset(global)
                    .map_err(|_| BehaviorError::UnknownOffset { global })?;
                let bytes = res.critical.get(res.rank, base + sub_offset, size)?;
                Ok(Value::decode(attr_layout.wire, &bytes)?)
            }
            (Visibility::Public, Some(sub_offset)) => {
                let owner = res
                    .directory
                    .owner(global)
                    .ok_or(BehaviorError::UnknownOffset { global })?;
                let base = res
                    .layout
                    .public_offset(global)
                    .map_err(|_| BehaviorError::UnknownOffset { global })?;
                let wire = attr_layout.wire;
                let public = &res.public;
                let bytes = res.cache.get_or_fetch((global, attr), || {
                    public.get(owner, base + sub_offset, size)
                })?;
                Ok(Value::decode(wire, &bytes)?)
            }
            _ => Err(BehaviorError::AttributeNotReadable {
                type_name: type_layout.name.clone(),
                attr_name: attr_layout.name.clone(),
            }),
        }
    }

    /// Emit an interaction to another agent.
    ///
    /// The payload fields are encoded per the catalog's layout for
    /// `kind`. An interaction to a nonexistent recipient is dropped with
    /// a warning and counted; it is not an error for the behavior.
    ///
    /// # Errors
    ///
    /// Returns an agent error when the payload does not match the
    /// interaction's declaration.
    pub fn send_message(
        &mut self,
        kind: InteractionKind,
        recipient_id: LocalId,
        recipient_type: TypeId,
        fields: &[Value],
    ) -> Result<(), BehaviorError> {
        let res = self.res;
        let recipient = res.codec.global(recipient_id, recipient_type);
        if !res.directory.exists(recipient_id, recipient_type) {
            warn!(
                sender = %self.cell.global_id(res.codec),
                recipient_id = %recipient_id,
                recipient_type = %recipient_type,
                "interaction sent to an agent which does not exist; it is ignored"
            );
            res.outbox.record_drop();
            return Ok(());
        }
        let interaction = Interaction::build(
            res.catalog,
            kind,
            self.cell.global_id(res.codec),
            recipient,
            fields,
        )?;
        let owner = res
            .directory
            .owner(recipient)
            .ok_or(BehaviorError::UnknownOffset { global: recipient })?;
        res.outbox.push(owner, interaction);
        Ok(())
    }
}
