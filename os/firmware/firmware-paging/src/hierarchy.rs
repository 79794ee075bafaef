//! One translation hierarchy: the table arena plus its root, and the walks
//! and structural edits that operate on it.
//!
//! Nothing in here invalidates translation caches or takes locks; the
//! [`PageTableEditor`](crate::PageTableEditor) wraps these steps in both.

use crate::arena::{TableArena, TableId, TableOrigin};
use crate::entry::{PageEntry, Permissions};
use crate::error::PagingError;
use crate::frames::{FrameSource, claim_outside};
use crate::mapper::PhysMapper;
use crate::table::{ENTRIES, Level, PageTable};
use firmware_addresses::{LeafSize, PhysicalPage, PhysicalRange, Size4K, VirtualAddress};

/// What a walk found in the entry that translates an address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotKind {
    /// A present leaf of the given size.
    Leaf(LeafSize),
    /// A not-present entry at the slot's level.
    Absent,
}

/// The entry a walk stopped at.
#[derive(Copy, Clone)]
pub struct Slot<'t> {
    pub address: VirtualAddress,
    pub table_id: TableId,
    pub table: &'t PageTable,
    pub level: Level,
    pub index: usize,
    pub entry: PageEntry,
    pub kind: SlotKind,
    /// Intersection of the rights of every present entry on the way down.
    pub permissions: Permissions,
}

pub struct Hierarchy {
    pub arena: TableArena,
    pub root: TableId,
    pub root_frame: PhysicalPage<Size4K>,
    /// First address past everything this hierarchy may edit.
    pub limit: u64,
}

/// Clear `frame` and hand it out as a table.
pub fn fresh_table<'t, M: PhysMapper + ?Sized>(
    mapper: &M,
    frame: PhysicalPage<Size4K>,
) -> Result<&'t PageTable, PagingError> {
    // SAFETY: frames handed to the editor are reserved for page tables.
    let table = unsafe { mapper.table(frame) }.ok_or(PagingError::ForeignTable(frame.base()))?;
    table.zero();
    Ok(table)
}

impl Hierarchy {
    pub fn with_root(root_frame: PhysicalPage<Size4K>, origin: TableOrigin, limit: u64) -> Self {
        let mut arena = TableArena::new();
        let root = arena.insert(root_frame, Level::Pml4, origin);
        Self {
            arena,
            root,
            root_frame,
            limit,
        }
    }

    pub fn table<'t, M: PhysMapper + ?Sized>(
        &self,
        mapper: &M,
        id: TableId,
    ) -> Result<&'t PageTable, PagingError> {
        let frame = self.arena.frame(id).ok_or(PagingError::ForeignTable(self.root_frame.base()))?;
        // SAFETY: every frame in the arena holds a table of this hierarchy.
        unsafe { mapper.table(frame) }.ok_or(PagingError::ForeignTable(frame.base()))
    }

    /// Register every table reachable from `id` (at `level`) as adopted.
    pub fn adopt_children<M: PhysMapper + ?Sized>(
        &mut self,
        mapper: &M,
        id: TableId,
        level: Level,
    ) -> Result<(), PagingError> {
        let Some(next) = level.next() else {
            return Ok(());
        };
        let table = self.table(mapper, id)?;
        for index in 0..ENTRIES {
            let entry = table.load(index);
            if !entry.present() || (level != Level::Pml4 && entry.page_size()) {
                continue;
            }
            let frame = entry.table_frame();
            if self.arena.lookup(frame).is_some() {
                continue;
            }
            let child = self.arena.insert(frame, next, TableOrigin::Adopted);
            self.adopt_children(mapper, child, next)?;
        }
        Ok(())
    }

    /// Walk from the root to the entry translating `address`.
    pub fn walk<'t, M: PhysMapper + ?Sized>(
        &self,
        mapper: &M,
        address: VirtualAddress,
    ) -> Result<Slot<'t>, PagingError> {
        let mut id = self.root;
        let mut level = Level::Pml4;
        let mut permissions = Permissions::ALL;
        loop {
            let table = self.table(mapper, id)?;
            let index = address.table_index(level.shift());
            let entry = table.load(index);
            let mut slot = Slot {
                address,
                table_id: id,
                table,
                level,
                index,
                entry,
                kind: SlotKind::Absent,
                permissions,
            };
            if !entry.present() {
                return Ok(slot);
            }
            permissions = permissions.restricted_by(entry);

            if let Some(size) = level.leaf_size()
                && (level == Level::Pt || entry.page_size())
            {
                slot.kind = SlotKind::Leaf(size);
                slot.permissions = permissions;
                return Ok(slot);
            }

            let Some(next) = level.next() else {
                return Ok(slot);
            };
            let frame = entry.table_frame();
            id = self
                .arena
                .lookup(frame)
                .ok_or(PagingError::ForeignTable(frame.base()))?;
            level = next;
        }
    }

    /// Replace the large leaf at `slot` by a table of 512 demoted leaves in `frame`.
    ///
    /// The new table is fully written before the parent entry flips, so every
    /// address resolves identically before and after the single store. On
    /// error nothing was stored and `frame` is still the caller's.
    pub fn demote<M: PhysMapper + ?Sized>(
        &mut self,
        mapper: &M,
        slot: &Slot<'_>,
        frame: PhysicalPage<Size4K>,
    ) -> Result<LeafSize, PagingError> {
        let SlotKind::Leaf(size) = slot.kind else {
            return Err(PagingError::NotMapped(slot.address));
        };
        let (Some(sub), Some(next)) = (size.demoted(), slot.level.next()) else {
            return Err(PagingError::NotLargePage(slot.address));
        };

        // Re-read under the structural lock; the walker may have set A/D.
        let entry = slot.table.load(slot.index);
        let table = fresh_table(mapper, frame)?;
        for (index, sub_entry) in (0..ENTRIES as u64).filter_map(|i| entry.demoted(size, i)).enumerate() {
            table.store(index, sub_entry);
        }
        self.arena.insert(frame, next, TableOrigin::Allocated);
        slot.table.store(slot.index, PageEntry::table_pointer(frame, entry));
        Ok(sub)
    }

    /// Store `entry` as a leaf of `size` for `address`, creating missing
    /// intermediate tables from `frames` (outside `reserved`).
    pub fn install_leaf<M: PhysMapper + ?Sized, F: FrameSource + ?Sized>(
        &mut self,
        mapper: &M,
        frames: &mut F,
        reserved: PhysicalRange,
        address: VirtualAddress,
        entry: PageEntry,
        size: LeafSize,
    ) -> Result<(), PagingError> {
        let target = Level::for_leaf(size);
        let mut id = self.root;
        let mut level = Level::Pml4;
        loop {
            let table = self.table(mapper, id)?;
            let index = address.table_index(level.shift());
            if level == target {
                table.store(index, entry);
                return Ok(());
            }
            let Some(next) = level.next() else {
                return Err(PagingError::NotMapped(address));
            };

            let current = table.load(index);
            id = if current.present() {
                if level != Level::Pml4 && current.page_size() {
                    return Err(PagingError::NotFineGrained {
                        address,
                        size: level.leaf_size().unwrap_or(LeafSize::Size1G),
                    });
                }
                let frame = current.table_frame();
                self.arena
                    .lookup(frame)
                    .ok_or(PagingError::ForeignTable(frame.base()))?
            } else {
                let frame = claim_outside(frames, reserved).ok_or(PagingError::OutOfTableFrames)?;
                if let Err(e) = fresh_table(mapper, frame) {
                    frames.release_frame(frame);
                    return Err(e);
                }
                let child = self.arena.insert(frame, next, TableOrigin::Allocated);
                table.store(index, PageEntry::new_table_pointer(frame));
                child
            };
            level = next;
        }
    }
}
