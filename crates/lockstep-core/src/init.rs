//! Initialization and partitioning.
//!
//! The coordinator holds the initial agent records; everyone else
//! arrives empty-handed. The protocol:
//!
//! 1. broadcast the total agent count, the master assignment and the
//!    global-id vector;
//! 2. the coordinator sends every record point-to-point to its assigned
//!    master; receivers insert them into handler groups round-robin;
//! 3. every master sorts the same global-id vector, computes the same
//!    window layout, and registers windows sized twice the used space;
//! 4. each master copies its own agents' public and critical
//!    sub-records into its windows, then every critical sub-record is
//!    broadcast from its owner so all replicas start coherent.
//!
//! The assignment heuristic is deliberately naive round-robin; it is a
//! single function so a smarter placement can slot in.

use std::collections::HashMap;

use tracing::info;

use lockstep_agents::{AgentCell, AgentRecord};
use lockstep_catalog::Catalog;
use lockstep_fabric::{Endpoint, Tag, WindowKind};
use lockstep_types::{GlobalId, IdCodec, MasterId};

use crate::error::MasterError;
use crate::handler::HandlerGroup;
use crate::master::Directory;
use crate::windows::WindowLayout;

/// What initialization hands back to the master constructor.
pub(crate) struct InitParts {
    pub directory: Directory,
    pub layout: WindowLayout,
    pub handlers: Vec<HandlerGroup>,
    pub agent_index: HashMap<GlobalId, (usize, usize)>,
}

/// Assign `nb_agents` agents to `nb_masters` masters, round-robin.
fn assign_initial_masters(nb_agents: usize, nb_masters: u32) -> Vec<MasterId> {
    (0..nb_agents)
        .map(|k| MasterId((k as u32) % nb_masters))
        .collect()
}

/// Run the initialization protocol on this peer.
pub(crate) fn initialize_agents(
    endpoint: &mut Endpoint,
    catalog: &Catalog,
    codec: IdCodec,
    nb_handlers: usize,
    initial_agents: Vec<AgentRecord>,
) -> Result<InitParts, MasterError> {
    let rank = endpoint.rank();
    let root = MasterId(0);
    let is_root = rank == root;

    // 1. Total count, assignment and global ids, all decided by the root.
    let nb_agents: u64 =
        endpoint.broadcast(root, is_root.then(|| initial_agents.len() as u64))?;
    let assignment: Vec<MasterId> = endpoint.broadcast(
        root,
        is_root.then(|| assign_initial_masters(nb_agents as usize, endpoint.peers())),
    )?;
    let global_ids: Vec<GlobalId> = endpoint.broadcast(
        root,
        is_root.then(|| {
            initial_agents
                .iter()
                .map(|record| codec.global(record.local_id, record.type_id))
                .collect()
        }),
    )?;

    // 2. The root ships each record to its assigned master.
    if is_root {
        for (record, owner) in initial_agents.iter().zip(&assignment) {
            endpoint.send(*owner, Tag::AgentTransfer, record)?;
        }
    }

    let mut directory = Directory::new(catalog.nb_types());
    for (&global, &owner) in global_ids.iter().zip(&assignment) {
        directory.insert(codec, global, owner);
    }

    let nb_local = assignment.iter().filter(|owner| **owner == rank).count();
    let mut handlers: Vec<HandlerGroup> = (0..nb_handlers.max(1))
        .map(|_| HandlerGroup::new())
        .collect();
    let mut agent_index = HashMap::with_capacity(nb_local);
    for k in 0..nb_local {
        let record: AgentRecord = endpoint.recv(root, Tag::AgentTransfer)?;
        let cell = AgentCell::from_record(catalog, &record)?;
        let global = cell.global_id(codec);
        let group = k % handlers.len();
        let slot = handlers[group].add_agent(cell);
        agent_index.insert(global, (group, slot));
    }

    // 3. Windows, sized from the canonical order.
    let mut sorted_ids = global_ids;
    sorted_ids.sort_unstable();
    let layout = WindowLayout::compute(catalog, codec, &sorted_ids, &directory, endpoint.peers())?;
    endpoint.register_window(WindowKind::Public, layout.public_window_size());
    endpoint.register_window(WindowKind::Critical, layout.critical_window_size());
    endpoint.barrier();

    // 4a. Fill the local windows with the locally owned sub-records.
    for (&global, &(group, slot)) in &agent_index {
        let cell = handlers
            .get(group)
            .and_then(|g| g.agent(slot))
            .ok_or(MasterError::UnknownAgent { global })?;
        let type_layout = catalog.agent_type(cell.type_id())?;
        if type_layout.public_size > 0 {
            let offset = layout.public_offset(global)?;
            let size = type_layout.public_size;
            endpoint.fill_local(WindowKind::Public, |window| {
                cell.copy_public_record(catalog, &mut window[offset..offset + size])
            })??;
        }
        if type_layout.critical_size > 0 {
            let offset = layout.critical_offset(global)?;
            let size = type_layout.critical_size;
            endpoint.fill_local(WindowKind::Critical, |window| {
                cell.copy_critical_record(catalog, &mut window[offset..offset + size])
            })??;
        }
    }
    endpoint.barrier();

    // 4b. Broadcast every critical sub-record from its owner so the
    //     replicas start identical.
    for &global in &sorted_ids {
        let type_layout = catalog.agent_type(codec.type_of(global))?;
        let size = type_layout.critical_size;
        if size == 0 {
            continue;
        }
        let owner = directory
            .owner(global)
            .ok_or(MasterError::UnknownAgent { global })?;
        let offset = layout.critical_offset(global)?;
        let mine = if owner == rank {
            Some(
                endpoint
                    .read_epoch(WindowKind::Critical)
                    .get(rank, offset, size)?,
            )
        } else {
            None
        };
        let bytes: Vec<u8> = endpoint.broadcast(owner, mine)?;
        if owner != rank {
            endpoint.fill_local(WindowKind::Critical, |window| {
                window[offset..offset + size].copy_from_slice(&bytes);
            })?;
        }
    }
    endpoint.barrier();

    info!(
        rank = %rank,
        local_agents = nb_local,
        total_agents = nb_agents,
        handler_groups = handlers.len(),
        "master initialized"
    );

    Ok(InitParts {
        directory,
        layout,
        handlers,
        agent_index,
    })
}
