//! In-process cluster launcher.
//!
//! Builds the peer group, spawns one thread per follower master (each
//! initializing and then parking in the order wait loop), and keeps the
//! coordinator on the calling thread so the caller drives the control
//! plane directly. A peer failure surfaces when the followers are
//! joined at shutdown; there is no per-peer fault tolerance.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

use lockstep_agents::AgentRecord;
use lockstep_catalog::Catalog;
use lockstep_fabric::Endpoint;

use crate::behavior::BehaviorTable;
use crate::control::ModifyRequest;
use crate::error::MasterError;
use crate::master::Master;

/// A running cluster: the coordinator plus the follower threads.
pub struct Cluster {
    coordinator: Master,
    followers: Vec<JoinHandle<Result<(), MasterError>>>,
}

impl Cluster {
    /// Launch `nb_masters` peers with `nb_handlers` worker threads each
    /// and distribute `initial_agents` among them.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::EmptyGroup`] for a zero-sized group, or
    /// any initialization failure of the coordinator.
    pub fn launch(
        catalog: Arc<Catalog>,
        behaviors: Arc<BehaviorTable>,
        nb_masters: u32,
        nb_handlers: usize,
        initial_agents: Vec<AgentRecord>,
    ) -> Result<Self, MasterError> {
        if nb_masters == 0 {
            return Err(MasterError::EmptyGroup);
        }

        let mut endpoints = Endpoint::group(nb_masters);
        let coordinator_endpoint = endpoints.remove(0);

        let mut followers = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let catalog = Arc::clone(&catalog);
            let behaviors = Arc::clone(&behaviors);
            let rank = endpoint.rank();
            let handle = std::thread::Builder::new()
                .name(format!("master-{rank}"))
                .spawn(move || -> Result<(), MasterError> {
                    let mut master =
                        Master::initialize(endpoint, catalog, behaviors, nb_handlers, Vec::new())?;
                    let outcome = master.wait_for_orders();
                    if let Err(ref e) = outcome {
                        error!(rank = %master.rank(), error = %e, "master aborted");
                    }
                    outcome
                })?;
            followers.push(handle);
        }

        let coordinator = Master::initialize(
            coordinator_endpoint,
            catalog,
            behaviors,
            nb_handlers,
            initial_agents,
        )?;
        info!(
            masters = nb_masters,
            handlers = nb_handlers,
            agents = coordinator.directory.len(),
            "cluster launched"
        );
        Ok(Self {
            coordinator,
            followers,
        })
    }

    /// The coordinator master, for queries.
    pub const fn coordinator(&self) -> &Master {
        &self.coordinator
    }

    /// Run `batches` run-orders of `period` steps each.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a step failure.
    pub fn run(&mut self, batches: u64) -> Result<(), MasterError> {
        for _ in 0..batches {
            self.coordinator.run_simulation()?;
        }
        Ok(())
    }

    /// Change the steps-per-run period cluster-wide.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a broadcast failure.
    pub fn set_period(&mut self, period: u64) -> Result<(), MasterError> {
        self.coordinator.change_period(period)
    }

    /// Overwrite one agent attribute cluster-wide.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's validation error when the request names
    /// an unknown agent, type or attribute.
    pub fn modify_attribute(&mut self, request: ModifyRequest) -> Result<(), MasterError> {
        self.coordinator.modify_attribute(Some(request))
    }

    /// Issue the (stubbed) bulk-insertion order.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a broadcast failure.
    pub fn add_agents(&mut self) -> Result<(), MasterError> {
        self.coordinator.add_user_agents()
    }

    /// Export the global snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a gather failure.
    pub fn export(&mut self) -> Result<serde_json::Value, MasterError> {
        Ok(self
            .coordinator
            .export_simulation()?
            .unwrap_or_else(|| serde_json::json!({ "agents": {} })))
    }

    /// Stop the cluster: broadcast `Kill` and join every follower.
    ///
    /// # Errors
    ///
    /// Returns the first follower failure, or
    /// [`MasterError::WorkerPanicked`] if a follower thread panicked.
    pub fn shutdown(mut self) -> Result<(), MasterError> {
        self.coordinator.kill_simulation()?;
        for handle in self.followers {
            match handle.join() {
                Ok(outcome) => outcome?,
                Err(_) => return Err(MasterError::WorkerPanicked),
            }
        }
        info!("cluster shut down");
        Ok(())
    }
}
