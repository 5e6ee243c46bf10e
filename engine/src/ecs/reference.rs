//! Reference table: stable per-entity pointers to other entities.
//!
//! A flat vector of `ownerSlot -> targetEntity` groups, grounded in the same
//! "store relationships as ids into a dense table" idiom the directory uses
//! for parent/child links (§4.5 glossary: "cyclic/back-references ... stored
//! as ids (indices), not pointers"). Each entity's references occupy a
//! contiguous `[referenceStart, referenceStart + referenceCount)` range of
//! this table; a [`Handle`] is a 1-based index local to that range, with
//! `0` reserved as "no reference".

use crate::ecs::{entity, world::error::WorldError};

/// A 1-based, per-entity-local reference index. `0` is the sentinel for
/// "no reference".
pub type Handle = u32;

/// The world's flat reference table.
#[derive(Default)]
pub struct ReferenceTable {
    targets: Vec<entity::Id>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self { targets: Vec::new() }
    }

    /// Append `target` to `owner`'s range, inserting into the shared table
    /// at `owner.referenceStart + owner.referenceCount` and shifting every
    /// other owner's `referenceStart` that falls at or after the insertion
    /// point. Returns the new 1-based handle.
    pub fn add(
        &mut self,
        directory: &mut entity::Directory,
        owner: entity::Entity,
        target: entity::Id,
    ) -> Result<Handle, WorldError> {
        let slot = directory
            .slot(owner)
            .ok_or(WorldError::EntityDoesNotExist(owner.id()))?;
        let insert_at = slot.reference_start + slot.reference_count;

        self.targets.insert(insert_at as usize, target);
        for (id, other) in directory.slots_mut() {
            if id == owner.id() {
                continue;
            }
            if other.reference_start >= insert_at {
                other.reference_start += 1;
            }
        }

        let slot = directory.slot_mut(owner).expect("checked live above");
        slot.reference_count += 1;
        Ok(slot.reference_count)
    }

    /// Resolve `handle` within `owner`'s range. `handle == 0` always
    /// resolves to `None` (the sentinel); any other out-of-range handle is
    /// an error. A handle within range that was previously removed
    /// resolves to `None` rather than erroring (the removed slot's hole).
    pub fn get(
        &self,
        directory: &entity::Directory,
        owner: entity::Entity,
        handle: Handle,
    ) -> Result<Option<entity::Id>, WorldError> {
        if handle == 0 {
            return Ok(None);
        }
        let slot = directory
            .slot(owner)
            .ok_or(WorldError::EntityDoesNotExist(owner.id()))?;
        if handle > slot.reference_count {
            return Err(WorldError::ReferenceOutOfRange(owner.id(), handle));
        }
        let index = (slot.reference_start + handle - 1) as usize;
        let target = self.targets[index];
        Ok((target != entity::Id::NONE).then_some(target))
    }

    /// Remove `handle` from `owner`'s range: the slot is zeroed out (not
    /// removed from the table), so every other handle for `owner` — and
    /// every other owner's range — keeps its position.
    pub fn remove(
        &mut self,
        directory: &entity::Directory,
        owner: entity::Entity,
        handle: Handle,
    ) -> Result<(), WorldError> {
        let slot = directory
            .slot(owner)
            .ok_or(WorldError::EntityDoesNotExist(owner.id()))?;
        if handle == 0 || handle > slot.reference_count {
            return Err(WorldError::ReferenceOutOfRange(owner.id(), handle));
        }
        let index = (slot.reference_start + handle - 1) as usize;
        self.targets[index] = entity::Id::NONE;
        Ok(())
    }

    /// Zero every table entry pointing at `target` — called when `target`
    /// is destroyed, so any reference still pointing at it resolves to the
    /// sentinel rather than a dangling id.
    pub fn invalidate_target(&mut self, target: entity::Id) {
        for slot in &mut self.targets {
            if *slot == target {
                *slot = entity::Id::NONE;
            }
        }
    }

    /// Zero out an owner's whole range in place, without resizing the
    /// table. Used when an entity is destroyed.
    pub fn clear_range(&mut self, start: u32, count: u32) {
        for slot in &mut self.targets[start as usize..(start + count) as usize] {
            *slot = entity::Id::NONE;
        }
    }

    /// Append an arbitrary list of targets as a brand-new range at the end
    /// of the table, returning its `(start, count)`. Used by `cloneEntity`
    /// (copy an existing range verbatim) and `append` (copy a remapped
    /// range from another world).
    pub fn append_range(&mut self, targets: &[entity::Id]) -> (u32, u32) {
        let start = self.targets.len() as u32;
        self.targets.extend_from_slice(targets);
        (start, targets.len() as u32)
    }

    pub fn range(&self, start: u32, count: u32) -> &[entity::Id] {
        &self.targets[start as usize..(start + count) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        // Given
        let mut directory = entity::Directory::new();
        let owner = directory.allocate();
        let target = directory.allocate();
        let mut refs = ReferenceTable::new();

        // When
        let handle = refs.add(&mut directory, owner, target.id()).unwrap();

        // Then
        assert_eq!(handle, 1);
        assert_eq!(refs.get(&directory, owner, handle).unwrap(), Some(target.id()));
    }

    #[test]
    fn handle_zero_is_always_the_sentinel() {
        let mut directory = entity::Directory::new();
        let owner = directory.allocate();
        let refs = ReferenceTable::new();
        assert_eq!(refs.get(&directory, owner, 0).unwrap(), None);
    }

    #[test]
    fn adding_to_one_owner_shifts_a_later_owners_range() {
        // Given: two owners, b's range already established after a's.
        let mut directory = entity::Directory::new();
        let a = directory.allocate();
        let b = directory.allocate();
        let t1 = directory.allocate();
        let t2 = directory.allocate();
        let mut refs = ReferenceTable::new();

        let a_handle = refs.add(&mut directory, a, t1.id()).unwrap();
        let b_start_before = directory.slot(b).unwrap().reference_start;
        refs.add(&mut directory, b, t1.id()).unwrap();
        let b_start_after_own_add = directory.slot(b).unwrap().reference_start;
        assert_eq!(b_start_before, b_start_after_own_add);

        // When: adding a second reference to `a` must shift `b`'s range right.
        refs.add(&mut directory, a, t2.id()).unwrap();

        // Then
        assert_eq!(directory.slot(b).unwrap().reference_start, b_start_after_own_add + 1);
        assert_eq!(refs.get(&directory, a, a_handle).unwrap(), Some(t1.id()));
    }

    #[test]
    fn remove_leaves_a_hole_and_keeps_other_handles_stable() {
        // Given
        let mut directory = entity::Directory::new();
        let owner = directory.allocate();
        let t1 = directory.allocate();
        let t2 = directory.allocate();
        let mut refs = ReferenceTable::new();
        let h1 = refs.add(&mut directory, owner, t1.id()).unwrap();
        let h2 = refs.add(&mut directory, owner, t2.id()).unwrap();

        // When
        refs.remove(&directory, owner, h1).unwrap();

        // Then
        assert_eq!(refs.get(&directory, owner, h1).unwrap(), None);
        assert_eq!(refs.get(&directory, owner, h2).unwrap(), Some(t2.id()));
    }

    #[test]
    fn invalidate_target_zeroes_every_pointer_to_it() {
        let mut directory = entity::Directory::new();
        let a = directory.allocate();
        let b = directory.allocate();
        let target = directory.allocate();
        let mut refs = ReferenceTable::new();
        let ha = refs.add(&mut directory, a, target.id()).unwrap();
        let hb = refs.add(&mut directory, b, target.id()).unwrap();

        refs.invalidate_target(target.id());

        assert_eq!(refs.get(&directory, a, ha).unwrap(), None);
        assert_eq!(refs.get(&directory, b, hb).unwrap(), None);
    }

    #[test]
    fn out_of_range_handle_is_an_error() {
        let mut directory = entity::Directory::new();
        let owner = directory.allocate();
        let refs = ReferenceTable::new();
        assert_eq!(
            refs.get(&directory, owner, 5),
            Err(WorldError::ReferenceOutOfRange(owner.id(), 5))
        );
    }
}
