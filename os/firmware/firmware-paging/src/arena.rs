//! Registry of the table blocks that make up one hierarchy.
//!
//! Tables are addressed by [`TableId`] handles instead of raw pointers; each
//! block remembers its physical frame, its level and whether the editor
//! allocated it or adopted it from whoever built the hierarchy.

use crate::table::Level;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use firmware_addresses::{PhysicalPage, Size4K};

/// Handle of one table block in a [`TableArena`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableId(u32);

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableOrigin {
    /// Found in a hierarchy this editor did not build.
    Adopted,
    /// Obtained from the frame source by this editor.
    Allocated,
}

#[derive(Copy, Clone, Debug)]
pub struct TableBlock {
    pub frame: PhysicalPage<Size4K>,
    pub level: Level,
    pub origin: TableOrigin,
}

#[derive(Default)]
pub struct TableArena {
    blocks: Vec<TableBlock>,
    by_frame: BTreeMap<PhysicalPage<Size4K>, TableId>,
}

impl TableArena {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            by_frame: BTreeMap::new(),
        }
    }

    /// Register `frame` as a table at `level`; returns the existing handle if
    /// the frame is already known.
    pub fn insert(&mut self, frame: PhysicalPage<Size4K>, level: Level, origin: TableOrigin) -> TableId {
        if let Some(&id) = self.by_frame.get(&frame) {
            return id;
        }
        #[allow(clippy::cast_possible_truncation)]
        let id = TableId(self.blocks.len() as u32);
        self.blocks.push(TableBlock {
            frame,
            level,
            origin,
        });
        self.by_frame.insert(frame, id);
        id
    }

    #[must_use]
    pub fn lookup(&self, frame: PhysicalPage<Size4K>) -> Option<TableId> {
        self.by_frame.get(&frame).copied()
    }

    #[must_use]
    pub fn block(&self, id: TableId) -> Option<&TableBlock> {
        self.blocks.get(id.0 as usize)
    }

    /// Block in insertion order (the root is at 0).
    #[must_use]
    pub fn block_at(&self, index: usize) -> Option<&TableBlock> {
        self.blocks.get(index)
    }

    #[must_use]
    pub fn frame(&self, id: TableId) -> Option<PhysicalPage<Size4K>> {
        self.block(id).map(|b| b.frame)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks at `level`.
    #[must_use]
    pub fn count_at(&self, level: Level) -> usize {
        self.blocks.iter().filter(|b| b.level == level).count()
    }

    /// Frames this editor allocated itself.
    pub fn allocated_frames(&self) -> impl Iterator<Item = PhysicalPage<Size4K>> + '_ {
        self.blocks
            .iter()
            .filter(|b| b.origin == TableOrigin::Allocated)
            .map(|b| b.frame)
    }
}

impl fmt::Debug for TableArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableArena")
            .field("tables", &self.blocks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmware_addresses::PhysicalAddress;

    fn frame(pa: u64) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(pa))
    }

    #[test]
    fn insert_is_idempotent_per_frame() {
        let mut a = TableArena::new();
        let root = a.insert(frame(0x1000), Level::Pml4, TableOrigin::Adopted);
        let pd = a.insert(frame(0x2000), Level::Pd, TableOrigin::Allocated);
        assert_ne!(root, pd);
        assert_eq!(a.insert(frame(0x1000), Level::Pml4, TableOrigin::Adopted), root);
        assert_eq!(a.len(), 2);
        assert_eq!(a.lookup(frame(0x2000)), Some(pd));
        assert_eq!(a.allocated_frames().count(), 1);
        assert_eq!(a.count_at(Level::Pd), 1);
    }
}
