//! Control plane: coordinator opcodes and the follower wait loop.
//!
//! Master 0 is the coordinator. Every control method begins on the
//! coordinator by broadcasting its opcode; followers parked in
//! [`Master::wait_for_orders`] dispatch on the received opcode, run the
//! same method cooperatively, and re-enter the loop. `Kill` exits it.
//!
//! User commands never interleave with the step phases: they are
//! applied between runs, on an order boundary, which preserves the
//! phase invariants.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lockstep_types::{AttrId, LocalId, MasterId, TypeId, Value};

use crate::error::MasterError;
use crate::export;
use crate::master::Master;

/// Opcodes the coordinator broadcasts to the followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// No-op; followers re-enter the wait loop.
    Idle,
    /// Advance `period` time steps.
    Run,
    /// Receive a new period length from the coordinator.
    ChangePeriod,
    /// Bulk agent insertion; semantics deliberately undefined.
    AddAgents,
    /// Commit one attribute value on its owner.
    ModifyAttribute,
    /// Gather every master's agent state into the global snapshot.
    Export,
    /// Terminate the wait loop.
    Kill,
}

/// The payload of a `ModifyAttribute` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// Type of the agent to modify.
    pub type_id: TypeId,
    /// Local id of the agent to modify.
    pub local_id: LocalId,
    /// The attribute to overwrite.
    pub attr: AttrId,
    /// The new value.
    pub value: Value,
}

const ROOT: MasterId = MasterId(0);

impl Master {
    /// Whether this master is the coordinator.
    pub const fn is_coordinator(&self) -> bool {
        self.rank.0 == ROOT.0
    }

    /// Advance `period` time steps on every master.
    ///
    /// Control method: externally called on the coordinator while the
    /// followers sit in [`Master::wait_for_orders`].
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a step failure.
    pub fn run_simulation(&mut self) -> Result<(), MasterError> {
        if self.is_coordinator() {
            self.endpoint.broadcast(ROOT, Some(Order::Run))?;
        }
        for _ in 0..self.period {
            self.run_time_step()?;
        }
        debug!(rank = %self.rank, step = self.step, "run batch complete");
        Ok(())
    }

    /// Change the period on every master.
    ///
    /// The argument is only meaningful on the coordinator; followers
    /// receive the new value from the broadcast.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a broadcast failure.
    pub fn change_period(&mut self, new_period: u64) -> Result<(), MasterError> {
        if self.is_coordinator() {
            self.endpoint.broadcast(ROOT, Some(Order::ChangePeriod))?;
            self.period = new_period;
        }
        self.period = self
            .endpoint
            .broadcast(ROOT, self.is_coordinator().then_some(self.period))?;
        info!(rank = %self.rank, period = self.period, "period changed");
        Ok(())
    }

    /// Bulk agent insertion. The opcode is kept for protocol
    /// compatibility; its payload semantics are deliberately undefined
    /// and the order is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a broadcast failure.
    pub fn add_user_agents(&mut self) -> Result<(), MasterError> {
        if self.is_coordinator() {
            self.endpoint.broadcast(ROOT, Some(Order::AddAgents))?;
        }
        warn!(rank = %self.rank, "bulk agent insertion is not implemented; order ignored");
        Ok(())
    }

    /// Overwrite one agent attribute cluster-wide: the coordinator
    /// validates and broadcasts the request, the owner commits it, every
    /// other master ignores it.
    ///
    /// `request` is only meaningful on the coordinator.
    ///
    /// # Errors
    ///
    /// On the coordinator, returns [`MasterError::AgentNotFound`],
    /// [`MasterError::AttributeNotSendable`] for a private attribute, a
    /// catalog error for an unknown type or attribute, or a value error
    /// for a wire-type mismatch; validation failures abort before any
    /// broadcast, so the cluster state is unchanged.
    pub fn modify_attribute(
        &mut self,
        request: Option<ModifyRequest>,
    ) -> Result<(), MasterError> {
        let validated = if self.is_coordinator() {
            let request = request.ok_or(MasterError::CoordinatorArgument {
                detail: "modify_attribute needs a request on the coordinator",
            })?;
            let type_layout = self.catalog.agent_type(request.type_id)?;
            let attr_layout = self.catalog.attribute(request.type_id, request.attr)?;
            // Sendability is a per-attribute property: only attributes
            // with a public or critical sub-record slot cross the wire.
            // The type-level migration flag plays no part here.
            if attr_layout.sub_offset.is_none() {
                return Err(MasterError::AttributeNotSendable {
                    type_name: type_layout.name.clone(),
                    attr_name: attr_layout.name.clone(),
                });
            }
            request.value.expect_wire(attr_layout.wire)?;
            if !self.directory.exists(request.local_id, request.type_id) {
                return Err(MasterError::AgentNotFound {
                    local_id: request.local_id,
                    type_name: type_layout.name.clone(),
                });
            }
            self.endpoint.broadcast(ROOT, Some(Order::ModifyAttribute))?;
            Some(request)
        } else {
            None
        };

        let request: ModifyRequest = self.endpoint.broadcast(ROOT, validated)?;
        let global = self.codec.global(request.local_id, request.type_id);
        if self.directory.owner(global) == Some(self.rank) {
            if let Some(&(group, slot)) = self.agent_index.get(&global) {
                if let Some(cell) = self
                    .handlers
                    .get_mut(group)
                    .and_then(|g| g.agent_mut(slot))
                {
                    cell.set_value(&self.catalog, request.attr, request.value)?;
                    debug!(
                        rank = %self.rank,
                        agent = %global,
                        attr = %request.attr,
                        "attribute modified"
                    );
                }
            }
        }
        Ok(())
    }

    /// Gather every master's agent state and assemble the global
    /// snapshot on the coordinator.
    ///
    /// Returns `Some(snapshot)` on the coordinator, `None` on followers.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a gather or serialization failure.
    pub fn export_simulation(&mut self) -> Result<Option<serde_json::Value>, MasterError> {
        if self.is_coordinator() {
            self.endpoint.broadcast(ROOT, Some(Order::Export))?;
        }
        let local = export::local_snapshot(&self.catalog, &self.handlers)?;
        match self.endpoint.gather(ROOT, &local)? {
            Some(parts) => Ok(Some(export::assemble_snapshot(&self.catalog, parts)?)),
            None => Ok(None),
        }
    }

    /// Order every follower out of its wait loop.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a broadcast failure.
    pub fn kill_simulation(&mut self) -> Result<(), MasterError> {
        if self.is_coordinator() {
            self.endpoint.broadcast(ROOT, Some(Order::Kill))?;
        }
        Ok(())
    }

    /// Park until the coordinator broadcasts orders; dispatch each one
    /// and re-enter the loop. Returns when `Kill` arrives. Does nothing
    /// on the coordinator.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] when a dispatched order fails.
    pub fn wait_for_orders(&mut self) -> Result<(), MasterError> {
        if self.is_coordinator() {
            return Ok(());
        }
        loop {
            let order: Order = self.endpoint.broadcast(ROOT, None)?;
            debug!(rank = %self.rank, ?order, "order received");
            match order {
                Order::Idle => {}
                Order::Run => self.run_simulation()?,
                Order::ChangePeriod => self.change_period(0)?,
                Order::AddAgents => self.add_user_agents()?,
                Order::ModifyAttribute => self.modify_attribute(None)?,
                Order::Export => {
                    self.export_simulation()?;
                }
                Order::Kill => return Ok(()),
            }
        }
    }
}
