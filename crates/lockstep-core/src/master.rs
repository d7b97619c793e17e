//! The master: one peer's view of the cluster and its per-step state
//! machine.
//!
//! A master owns a partition of the agent population, one public window,
//! one critical replica, the per-step read cache and the interaction
//! outbox/inbox. [`Master::run_time_step`] drives the barrier-separated
//! phase cycle; the control plane in [`crate::control`] wraps it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use lockstep_agents::{AgentRecord, Interaction};
use lockstep_catalog::Catalog;
use lockstep_fabric::{Endpoint, WindowKind};
use lockstep_types::{AttrId, GlobalId, IdCodec, LocalId, MasterId, TypeId, Value};

use crate::behavior::{BehaviorTable, StepResources};
use crate::cache::ReadCache;
use crate::error::MasterError;
use crate::handler::{HandlerGroup, PublishResources};
use crate::init;
use crate::router::{self, Outbox};
use crate::windows::WindowLayout;

/// Cluster-wide agent directory: every master holds the same one.
///
/// Maps each agent to its owning master and keeps the per-type id sets
/// behaviors can query.
#[derive(Debug, Default)]
pub struct Directory {
    owners: HashMap<GlobalId, MasterId>,
    by_type: Vec<BTreeSet<LocalId>>,
    bounds: Vec<u64>,
}

impl Directory {
    /// Create an empty directory for a model with `nb_types` types.
    pub fn new(nb_types: u32) -> Self {
        Self {
            owners: HashMap::new(),
            by_type: (0..nb_types).map(|_| BTreeSet::new()).collect(),
            bounds: vec![0; nb_types as usize],
        }
    }

    /// Record an agent and its owner.
    pub fn insert(&mut self, codec: IdCodec, global: GlobalId, owner: MasterId) {
        let local = codec.local_of(global);
        let type_index = codec.type_of(global).0 as usize;
        self.owners.insert(global, owner);
        if let Some(set) = self.by_type.get_mut(type_index) {
            set.insert(local);
        }
        if let Some(bound) = self.bounds.get_mut(type_index) {
            *bound = (*bound).max(local.0 + 1);
        }
    }

    /// Whether an agent exists anywhere in the cluster.
    pub fn exists(&self, local_id: LocalId, type_id: TypeId) -> bool {
        self.by_type
            .get(type_id.0 as usize)
            .is_some_and(|set| set.contains(&local_id))
    }

    /// The master owning an agent.
    pub fn owner(&self, global: GlobalId) -> Option<MasterId> {
        self.owners.get(&global).copied()
    }

    /// The ordered local ids of every agent of a type.
    pub fn agents_of_type(&self, type_id: TypeId) -> Vec<LocalId> {
        self.by_type
            .get(type_id.0 as usize)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Max local id + 1 among agents of a type (0 when there are none).
    pub fn bound(&self, type_id: TypeId) -> u64 {
        self.bounds.get(type_id.0 as usize).copied().unwrap_or(0)
    }

    /// Total number of agents in the cluster.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether the cluster holds no agents.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// One peer of the cluster.
pub struct Master {
    pub(crate) rank: MasterId,
    pub(crate) endpoint: Endpoint,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) codec: IdCodec,
    pub(crate) behaviors: Arc<BehaviorTable>,
    pub(crate) step: u64,
    pub(crate) period: u64,
    pub(crate) directory: Directory,
    pub(crate) layout: WindowLayout,
    pub(crate) handlers: Vec<HandlerGroup>,
    pub(crate) agent_index: HashMap<GlobalId, (usize, usize)>,
    pub(crate) cache: ReadCache,
    pub(crate) outbox: Outbox,
    pub(crate) inbox: Vec<Interaction>,
}

impl Master {
    /// Initialize this peer: receive its agents from the coordinator,
    /// build the directory and window layout, allocate and fill the
    /// windows, and make the critical replicas coherent.
    ///
    /// `initial_agents` is only meaningful on rank 0; every other rank
    /// passes an empty vector.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] if any part of the initialization
    /// protocol fails.
    pub fn initialize(
        mut endpoint: Endpoint,
        catalog: Arc<Catalog>,
        behaviors: Arc<BehaviorTable>,
        nb_handlers: usize,
        initial_agents: Vec<AgentRecord>,
    ) -> Result<Self, MasterError> {
        let rank = endpoint.rank();
        let codec = catalog.codec();
        let parts = init::initialize_agents(
            &mut endpoint,
            &catalog,
            codec,
            nb_handlers,
            initial_agents,
        )?;
        let outbox = Outbox::new(endpoint.peers(), catalog.nb_interactions());
        Ok(Self {
            rank,
            endpoint,
            catalog,
            codec,
            behaviors,
            step: 0,
            period: 1,
            directory: parts.directory,
            layout: parts.layout,
            handlers: parts.handlers,
            agent_index: parts.agent_index,
            cache: ReadCache::new(),
            outbox,
            inbox: Vec::new(),
        })
    }

    /// This master's rank.
    pub const fn rank(&self) -> MasterId {
        self.rank
    }

    /// Number of masters in the cluster.
    pub const fn nb_masters(&self) -> u32 {
        self.endpoint.peers()
    }

    /// The current time step.
    pub const fn time_step(&self) -> u64 {
        self.step
    }

    /// The current run period (steps per `run` order).
    pub const fn period(&self) -> u64 {
        self.period
    }

    /// Whether an agent exists anywhere in the cluster.
    pub fn does_agent_exist(&self, local_id: LocalId, type_id: TypeId) -> bool {
        self.directory.exists(local_id, type_id)
    }

    /// The ordered local ids of every agent of a type, cluster-wide.
    pub fn agents_of_type(&self, type_id: TypeId) -> Vec<LocalId> {
        self.directory.agents_of_type(type_id)
    }

    /// Max local id + 1 among agents of a type.
    pub fn agent_id_type_bound(&self, type_id: TypeId) -> u64 {
        self.directory.bound(type_id)
    }

    /// Cumulative count of interactions dropped for missing recipients.
    pub fn dropped_interactions(&self) -> u64 {
        self.outbox.dropped()
    }

    /// Cumulative attribute-read cache statistics `(hits, fetches)`.
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.hits(), self.cache.fetches())
    }

    /// Read a locally owned agent's attribute from its live state.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::AgentNotFound`] when the agent is not
    /// owned by this master.
    pub fn agent_value(
        &self,
        local_id: LocalId,
        type_id: TypeId,
        attr: AttrId,
    ) -> Result<Value, MasterError> {
        let global = self.codec.global(local_id, type_id);
        let cell = self
            .agent_index
            .get(&global)
            .and_then(|&(group, slot)| self.handlers.get(group)?.agent(slot))
            .ok_or_else(|| MasterError::AgentNotFound {
                local_id,
                type_name: self
                    .catalog
                    .agent_type(type_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_default(),
            })?;
        Ok(cell.value(&self.catalog, attr)?)
    }

    /// The used prefix of a peer's critical replica.
    ///
    /// All replicas hold the same bytes at the end of every step; this
    /// is the audit hook that checks it.
    ///
    /// # Errors
    ///
    /// Returns a fabric error when the peer or window is unknown.
    pub fn critical_replica(&self, peer: MasterId) -> Result<Vec<u8>, MasterError> {
        let epoch = self.endpoint.read_epoch(WindowKind::Critical);
        Ok(epoch.get(peer, 0, self.layout.critical_total())?)
    }

    /// Run one time step: distribute, behaviors, publish, exchange,
    /// each phase bracketed by cluster barriers.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a phase failure; behavior-level
    /// errors are contained per agent and do not surface here.
    pub fn run_time_step(&mut self) -> Result<(), MasterError> {
        self.step += 1;
        debug!(rank = %self.rank, step = self.step, "time step starting");

        self.endpoint.barrier();
        self.distribute_received_interactions();
        self.endpoint.barrier();
        self.run_behaviors();
        self.endpoint.barrier();
        self.publish_attributes()?;
        self.endpoint.barrier();
        self.inbox = router::exchange(
            &mut self.endpoint,
            &self.outbox,
            self.catalog.nb_interactions(),
        )?;
        self.endpoint.barrier();
        Ok(())
    }

    /// Hand the interactions received at the previous exchange to their
    /// local recipients.
    fn distribute_received_interactions(&mut self) {
        let inbox = std::mem::take(&mut self.inbox);
        for interaction in inbox {
            match self.agent_index.get(&interaction.recipient).copied() {
                Some((group, slot)) => {
                    if let Some(cell) =
                        self.handlers.get_mut(group).and_then(|g| g.agent_mut(slot))
                    {
                        cell.receive_message(interaction);
                    }
                }
                None => {
                    warn!(
                        rank = %self.rank,
                        recipient = %interaction.recipient,
                        "received interaction for an agent this master does not hold"
                    );
                }
            }
        }
    }

    /// Run all handler groups' behaviors in parallel with the public
    /// window pinned for one-sided reads.
    fn run_behaviors(&mut self) {
        self.cache.begin_step();
        let resources = StepResources {
            catalog: self.catalog.as_ref(),
            codec: self.codec,
            rank: self.rank,
            step: self.step,
            directory: &self.directory,
            layout: &self.layout,
            cache: &self.cache,
            outbox: &self.outbox,
            public: self.endpoint.read_epoch(WindowKind::Public),
            critical: self.endpoint.read_epoch(WindowKind::Critical),
            behaviors: self.behaviors.as_ref(),
        };
        std::thread::scope(|scope| {
            for group in &mut self.handlers {
                let resources = &resources;
                scope.spawn(move || group.run_behaviors(resources));
            }
        });
    }

    /// Publish all handler groups' attributes in parallel inside one
    /// dedicated critical write epoch.
    fn publish_attributes(&mut self) -> Result<(), MasterError> {
        let resources = PublishResources {
            catalog: self.catalog.as_ref(),
            codec: self.codec,
            layout: &self.layout,
            endpoint: &self.endpoint,
            critical: self.endpoint.write_epoch(WindowKind::Critical),
            peers: self.endpoint.peers(),
        };
        let mut first_error = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .handlers
                .iter_mut()
                .map(|group| {
                    let resources = &resources;
                    scope.spawn(move || group.publish_attributes(resources))
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(_) => {
                        if first_error.is_none() {
                            first_error = Some(MasterError::WorkerPanicked);
                        }
                    }
                }
            }
        });
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
