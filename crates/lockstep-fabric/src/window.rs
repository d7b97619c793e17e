//! Named byte regions with epoch-bracketed one-sided access.
//!
//! Each peer registers one region per [`WindowKind`]; any peer may then
//! read (`get`) or write (`put`) any peer's region at exact byte
//! offsets. Access happens through a [`ReadEpoch`] or [`WriteEpoch`]
//! obtained from the local endpoint; the runtime opens an epoch only
//! between the cluster barriers that separate phases, which is what
//! keeps readers and writers of a region from ever overlapping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use lockstep_types::MasterId;

use crate::group::FabricError;

/// The two window classes a peer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// Public non-critical attribute records of the owner's agents.
    Public,
    /// The owner's replica of every agent's critical record.
    Critical,
}

/// Region table shared by the whole peer group.
#[derive(Debug, Default)]
pub(crate) struct RegionTable {
    regions: RwLock<HashMap<(MasterId, WindowKind), Arc<RwLock<Vec<u8>>>>>,
}

impl RegionTable {
    /// Register (or replace) `rank`'s region of the given kind.
    pub(crate) fn register(&self, rank: MasterId, kind: WindowKind, size: usize) {
        self.regions
            .write()
            .insert((rank, kind), Arc::new(RwLock::new(vec![0u8; size])));
    }

    fn region(
        &self,
        rank: MasterId,
        kind: WindowKind,
    ) -> Result<Arc<RwLock<Vec<u8>>>, FabricError> {
        self.regions
            .read()
            .get(&(rank, kind))
            .cloned()
            .ok_or(FabricError::WindowUnregistered { rank, kind })
    }

    pub(crate) fn len(&self, rank: MasterId, kind: WindowKind) -> Result<usize, FabricError> {
        Ok(self.region(rank, kind)?.read().len())
    }

    pub(crate) fn get(
        &self,
        rank: MasterId,
        kind: WindowKind,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        let region = self.region(rank, kind)?;
        let bytes = region.read();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(FabricError::OutOfBounds {
                rank,
                kind,
                offset,
                len,
                window: bytes.len(),
            })?;
        Ok(bytes[offset..end].to_vec())
    }

    pub(crate) fn put(
        &self,
        rank: MasterId,
        kind: WindowKind,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FabricError> {
        let region = self.region(rank, kind)?;
        let mut bytes = region.write();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(FabricError::OutOfBounds {
                rank,
                kind,
                offset,
                len: data.len(),
                window: bytes.len(),
            })?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn with_local_mut<R>(
        &self,
        rank: MasterId,
        kind: WindowKind,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, FabricError> {
        let region = self.region(rank, kind)?;
        let mut bytes = region.write();
        Ok(f(&mut bytes))
    }
}

/// A read epoch over one window kind.
///
/// Valid between the barrier that ends the publication phase and the
/// barrier that ends the phase the reads happen in. All peers' regions
/// of the kind are readable at exact offsets.
#[derive(Debug)]
pub struct ReadEpoch<'a> {
    pub(crate) table: &'a RegionTable,
    pub(crate) kind: WindowKind,
}

impl ReadEpoch<'_> {
    /// One-sided fetch of `len` bytes at `offset` from `target`'s region.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::WindowUnregistered`] or
    /// [`FabricError::OutOfBounds`].
    pub fn get(&self, target: MasterId, offset: usize, len: usize) -> Result<Vec<u8>, FabricError> {
        self.table.get(target, self.kind, offset, len)
    }
}

/// A write epoch over one window kind.
///
/// Valid during the publication phase only; no peer reads the kind's
/// regions while a write epoch is open anywhere.
#[derive(Debug)]
pub struct WriteEpoch<'a> {
    pub(crate) table: &'a RegionTable,
    pub(crate) kind: WindowKind,
}

impl WriteEpoch<'_> {
    /// One-sided store of `data` at `offset` into `target`'s region.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::WindowUnregistered`] or
    /// [`FabricError::OutOfBounds`].
    pub fn put(&self, target: MasterId, offset: usize, data: &[u8]) -> Result<(), FabricError> {
        self.table.put(target, self.kind, offset, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_get_put_round_trip() {
        let table = RegionTable::default();
        table.register(MasterId(0), WindowKind::Public, 16);
        table.put(MasterId(0), WindowKind::Public, 4, &[1, 2, 3]).unwrap();
        let got = table.get(MasterId(0), WindowKind::Public, 4, 3).unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let table = RegionTable::default();
        table.register(MasterId(0), WindowKind::Critical, 8);
        let err = table.get(MasterId(0), WindowKind::Critical, 6, 4).unwrap_err();
        assert!(matches!(err, FabricError::OutOfBounds { .. }));
        let err = table
            .put(MasterId(0), WindowKind::Critical, usize::MAX, &[0])
            .unwrap_err();
        assert!(matches!(err, FabricError::OutOfBounds { .. }));
    }

    #[test]
    fn unregistered_window_is_reported() {
        let table = RegionTable::default();
        let err = table.get(MasterId(3), WindowKind::Public, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            FabricError::WindowUnregistered {
                rank: MasterId(3),
                kind: WindowKind::Public
            }
        ));
    }

    #[test]
    fn zero_sized_window_allows_empty_access() {
        let table = RegionTable::default();
        table.register(MasterId(0), WindowKind::Public, 0);
        assert_eq!(table.get(MasterId(0), WindowKind::Public, 0, 0).unwrap(), Vec::<u8>::new());
    }
}
