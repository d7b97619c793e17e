//! Canonical window layout: offset maps and window sizing.
//!
//! All masters walk the same sorted vector of global ids, so they derive
//! identical offset maps. The public map places each agent inside its
//! *owner's* public window; the critical map places every agent at the
//! same offset of every replica. Windows are over-allocated at twice the
//! used size so a step never reallocates, and every master's public
//! window gets the same size so a remote agent's offset is derivable
//! anywhere.

use std::collections::HashMap;

use lockstep_catalog::Catalog;
use lockstep_types::{GlobalId, IdCodec, MasterId};

use crate::error::MasterError;
use crate::master::Directory;

/// Offset maps and window sizes shared by the whole cluster.
#[derive(Debug, Default)]
pub struct WindowLayout {
    public_offsets: HashMap<GlobalId, usize>,
    critical_offsets: HashMap<GlobalId, usize>,
    public_used: Vec<usize>,
    critical_total: usize,
    public_window_size: usize,
    critical_window_size: usize,
}

impl WindowLayout {
    /// Derive the layout from the globally sorted id vector.
    ///
    /// Every master calls this with identical inputs and obtains
    /// identical maps.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::UnknownAgent`] when an id has no owner in
    /// the directory, or a catalog error for an unknown type.
    pub fn compute(
        catalog: &Catalog,
        codec: IdCodec,
        sorted_ids: &[GlobalId],
        directory: &Directory,
        nb_masters: u32,
    ) -> Result<Self, MasterError> {
        let mut layout = Self {
            public_used: vec![0; nb_masters as usize],
            ..Self::default()
        };

        for &global in sorted_ids {
            let type_layout = catalog.agent_type(codec.type_of(global))?;
            let owner = directory
                .owner(global)
                .ok_or(MasterError::UnknownAgent { global })?;
            let owner_used = &mut layout.public_used[owner.0 as usize];
            layout.public_offsets.insert(global, *owner_used);
            layout.critical_offsets.insert(global, layout.critical_total);
            *owner_used += type_layout.public_size;
            layout.critical_total += type_layout.critical_size;
        }

        let max_public_used = layout.public_used.iter().max().copied().unwrap_or(0);
        layout.public_window_size = 2 * max_public_used;
        layout.critical_window_size = 2 * layout.critical_total;
        Ok(layout)
    }

    /// Offset of an agent's public sub-record within its owner's window.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::UnknownAgent`] for an unmapped id.
    pub fn public_offset(&self, global: GlobalId) -> Result<usize, MasterError> {
        self.public_offsets
            .get(&global)
            .copied()
            .ok_or(MasterError::UnknownAgent { global })
    }

    /// Offset of an agent's critical sub-record, identical in every
    /// replica.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::UnknownAgent`] for an unmapped id.
    pub fn critical_offset(&self, global: GlobalId) -> Result<usize, MasterError> {
        self.critical_offsets
            .get(&global)
            .copied()
            .ok_or(MasterError::UnknownAgent { global })
    }

    /// Bytes used in `master`'s public window.
    pub fn public_used(&self, master: MasterId) -> usize {
        self.public_used
            .get(master.0 as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Bytes used in every critical replica.
    pub const fn critical_total(&self) -> usize {
        self.critical_total
    }

    /// Allocation size of every master's public window.
    pub const fn public_window_size(&self) -> usize {
        self.public_window_size
    }

    /// Allocation size of every critical replica.
    pub const fn critical_window_size(&self) -> usize {
        self.critical_window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_catalog::{AgentTypeDef, AttributeDef, ModelSpec, Visibility};
    use lockstep_types::{LocalId, TypeId, WireType};

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
                        default: None,
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

    fn setup(n: u64, masters: u32) -> (Catalog, IdCodec, Vec<GlobalId>, Directory) {
        let catalog = catalog();
        let codec = catalog.codec();
        let mut directory = Directory::new(catalog.nb_types());
        let mut ids = Vec::new();
        for local in 0..n {
            let global = codec.global(LocalId(local), TypeId(0));
            directory.insert(codec, global, MasterId((local % u64::from(masters)) as u32));
            ids.push(global);
        }
        ids.sort_unstable();
        (catalog, codec, ids, directory)
    }

    #[test]
    fn critical_offsets_cover_all_agents() {
        let (catalog, codec, ids, directory) = setup(6, 3);
        let layout = WindowLayout::compute(&catalog, codec, &ids, &directory, 3).unwrap();
        assert_eq!(layout.critical_total(), 6 * 8);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(layout.critical_offset(*id).unwrap(), i * 8);
        }
    }

    #[test]
    fn public_offsets_are_per_owner() {
        let (catalog, codec, ids, directory) = setup(6, 3);
        let layout = WindowLayout::compute(&catalog, codec, &ids, &directory, 3).unwrap();
        // Agents 0 and 3 live on master 0; their public offsets are 0 and 8.
        assert_eq!(layout.public_offset(ids[0]).unwrap(), 0);
        assert_eq!(layout.public_offset(ids[3]).unwrap(), 8);
        assert_eq!(layout.public_used(MasterId(0)), 16);
    }

    #[test]
    fn windows_are_double_the_used_size() {
        let (catalog, codec, ids, directory) = setup(5, 2);
        let layout = WindowLayout::compute(&catalog, codec, &ids, &directory, 2).unwrap();
        // Master 0 owns 3 agents, master 1 owns 2; both windows get 2 * 24.
        assert_eq!(layout.public_window_size(), 2 * 3 * 8);
        assert_eq!(layout.critical_window_size(), 2 * 5 * 8);
    }

    #[test]
    fn identical_inputs_give_identical_maps() {
        let (catalog, codec, ids, directory) = setup(10, 4);
        let a = WindowLayout::compute(&catalog, codec, &ids, &directory, 4).unwrap();
        let b = WindowLayout::compute(&catalog, codec, &ids, &directory, 4).unwrap();
        for id in &ids {
            assert_eq!(a.public_offset(*id).unwrap(), b.public_offset(*id).unwrap());
            assert_eq!(a.critical_offset(*id).unwrap(), b.critical_offset(*id).unwrap());
        }
    }

    #[test]
    fn empty_cluster_has_zero_sized_windows() {
        let (catalog, codec, _, directory) = setup(0, 2);
        let layout = WindowLayout::compute(&catalog, codec, &[], &directory, 2).unwrap();
        assert_eq!(layout.public_window_size(), 0);
        assert_eq!(layout.critical_window_size(), 0);
    }
}
