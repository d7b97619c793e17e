//! Handler groups: the per-thread partitions of a master's agents.
//!
//! A master splits its agents into `K` groups; each group runs on
//! exactly one worker thread per phase, so there is no cross-group
//! synchronization inside a phase. Behaviors mutate only their own
//! agent and talk to the shared structures (cache, outbox, windows)
//! through thread-safe handles.

use tracing::error;

use lockstep_agents::AgentCell;
use lockstep_catalog::Catalog;
use lockstep_fabric::{Endpoint, WindowKind, WriteEpoch};
use lockstep_types::{IdCodec, MasterId};

use crate::behavior::{BehaviorCtx, StepResources};
use crate::error::MasterError;
use crate::windows::WindowLayout;

/// Everything a publication phase shares between handler threads.
pub struct PublishResources<'a> {
    pub(crate) catalog: &'a Catalog,
    pub(crate) codec: IdCodec,
    pub(crate) layout: &'a WindowLayout,
    pub(crate) endpoint: &'a Endpoint,
    pub(crate) critical: WriteEpoch<'a>,
    pub(crate) peers: u32,
}

/// The agents of one worker thread.
#[derive(Debug, Default)]
pub struct HandlerGroup {
    agents: Vec<AgentCell>,
}

impl HandlerGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent and return its slot within the group.
    pub fn add_agent(&mut self, cell: AgentCell) -> usize {
        self.agents.push(cell);
        self.agents.len() - 1
    }

    /// Number of agents in the group.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the group has no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Borrow the agents for read-only walks (export, queries).
    pub fn agents(&self) -> &[AgentCell] {
        &self.agents
    }

    /// Borrow one agent by slot.
    pub fn agent(&self, slot: usize) -> Option<&AgentCell> {
        self.agents.get(slot)
    }

    /// Mutably borrow one agent by slot.
    pub fn agent_mut(&mut self, slot: usize) -> Option<&mut AgentCell> {
        self.agents.get_mut(slot)
    }

    /// Run every agent's behavior, then clear its received messages and
    /// record which critical attributes the behavior changed.
    ///
    /// A failing behavior is logged and skipped; it cannot corrupt the
    /// step for other agents.
    pub fn run_behaviors(&mut self, res: &StepResources<'_>) {
        for cell in &mut self.agents {
            let outcome = res.behaviors.get(cell.type_id()).map(|behavior| {
                let mut ctx = BehaviorCtx::new(res, cell);
                behavior(&mut ctx)
            });
            if let Some(Err(behavior_error)) = outcome {
                error!(
                    agent = %cell.global_id(res.codec),
                    error = %behavior_error,
                    "behavior failed; agent skipped for this step"
                );
            }
            cell.reset_messages();
            if let Err(agent_error) = cell.check_modified_critical(res.catalog) {
                error!(
                    agent = %cell.global_id(res.codec),
                    error = %agent_error,
                    "critical diff check failed"
                );
            }
        }
    }

    /// Publish this group's agents: copy each public sub-record into the
    /// master's public window, and put each changed critical attribute
    /// into every peer's replica at its fixed offset.
    ///
    /// # Errors
    ///
    /// Returns a [`MasterError`] on a window or catalog failure.
    pub fn publish_attributes(&mut self, res: &PublishResources<'_>) -> Result<(), MasterError> {
        for cell in &mut self.agents {
            let global = cell.global_id(res.codec);
            let type_layout = res.catalog.agent_type(cell.type_id())?;

            if type_layout.public_size > 0 {
                let offset = res.layout.public_offset(global)?;
                let size = type_layout.public_size;
                res.endpoint.fill_local(WindowKind::Public, |window| {
                    cell.copy_public_record(res.catalog, &mut window[offset..offset + size])
                })??;
            }

            let updates = cell.take_critical_updates();
            if !updates.is_empty() {
                let base = res.layout.critical_offset(global)?;
                for attr in updates {
                    let attr_layout = res.catalog.attribute(cell.type_id(), attr)?;
                    let sub_offset = attr_layout.sub_offset.ok_or(
                        lockstep_catalog::CatalogError::WrongVisibility {
                            type_id: cell.type_id(),
                            attr,
                            expected: "critical",
                        },
                    )?;
                    let bytes = cell.attribute_bytes(res.catalog, attr)?.to_vec();
                    for peer in 0..res.peers {
                        res.critical.put(MasterId(peer), base + sub_offset, &bytes)?;
                    }
                }
            }
            cell.commit_critical(res.catalog)?;
        }
        Ok(())
    }
}
