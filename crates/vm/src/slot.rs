//! Flat variable slots: static fields, arguments and locals.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;

/// A fixed-size vector of items. Each occupied position counts as a stack
/// reference.
pub struct Slot {
    items: Vec<StackItem>,
    reference_counter: ReferenceCounter,
}

impl Slot {
    /// Creates a slot of `count` nulls.
    pub fn new(count: usize, reference_counter: ReferenceCounter) -> Self {
        let items = vec![StackItem::Null; count];
        for item in &items {
            reference_counter.add_stack_reference(item);
        }
        Self {
            items,
            reference_counter,
        }
    }

    /// Creates a slot holding the given items.
    pub fn with_items(items: Vec<StackItem>, reference_counter: ReferenceCounter) -> Self {
        for item in &items {
            reference_counter.add_stack_reference(item);
        }
        Self {
            items,
            reference_counter,
        }
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the slot has no positions.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reads a position.
    pub fn get(&self, index: usize) -> VmResult<StackItem> {
        self.items
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::index_out_of_range(index, self.items.len()))
    }

    /// Writes a position.
    pub fn put(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        if index >= self.items.len() {
            return Err(VmError::index_out_of_range(index, self.items.len()));
        }
        self.reference_counter.add_stack_reference(&item);
        let old = std::mem::replace(&mut self.items[index], item);
        self.reference_counter.remove_stack_reference(&old);
        Ok(())
    }

    /// Releases every position's reference.
    pub fn clear_references(&mut self) {
        for item in self.items.drain(..) {
            self.reference_counter.remove_stack_reference(&item);
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.clear_references();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_null_initialised() {
        let rc = ReferenceCounter::new();
        let slot = Slot::new(3, rc.clone());
        assert_eq!(slot.len(), 3);
        assert!(slot.get(0).unwrap().is_null());
        assert_eq!(rc.count(), 3);
    }

    #[test]
    fn test_put_swaps_references() {
        let rc = ReferenceCounter::new();
        let mut slot = Slot::new(1, rc.clone());
        slot.put(0, StackItem::from_int(5)).unwrap();
        assert_eq!(rc.count(), 1);
        assert_eq!(slot.get(0).unwrap().to_int().unwrap(), 5.into());
        assert!(slot.put(1, StackItem::Null).is_err());
    }

    #[test]
    fn test_drop_releases_references() {
        let rc = ReferenceCounter::new();
        {
            let _slot = Slot::with_items(vec![StackItem::from_int(1)], rc.clone());
            assert_eq!(rc.count(), 1);
        }
        assert_eq!(rc.count(), 0);
    }
}
