//! The per-context working stack.
//!
//! The backing storage is shared: `CALL` frames operate on the caller's
//! stack, while `LoadScript` creates a fresh one. Every push and pop is
//! mirrored into the reference counter.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;
use std::cell::RefCell;
use std::rc::Rc;

/// An evaluation stack. Cloning shares the storage.
#[derive(Clone)]
pub struct EvaluationStack {
    items: Rc<RefCell<Vec<StackItem>>>,
    reference_counter: ReferenceCounter,
}

impl EvaluationStack {
    /// Creates an empty stack bound to the given reference counter.
    pub fn new(reference_counter: ReferenceCounter) -> Self {
        Self {
            items: Rc::new(RefCell::new(Vec::new())),
            reference_counter,
        }
    }

    /// The reference counter this stack reports into.
    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    /// Whether two handles refer to the same backing storage.
    pub fn same_stack(&self, other: &EvaluationStack) -> bool {
        Rc::ptr_eq(&self.items, &other.items)
    }

    /// Number of items on the stack.
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Pushes an item.
    pub fn push(&self, item: StackItem) {
        self.reference_counter.add_stack_reference(&item);
        self.items.borrow_mut().push(item);
    }

    /// Pops the top item.
    pub fn pop(&self) -> VmResult<StackItem> {
        match self.items.borrow_mut().pop() {
            Some(item) => {
                self.reference_counter.remove_stack_reference(&item);
                Ok(item)
            }
            None => Err(VmError::stack_underflow(1, 0)),
        }
    }

    /// Reads the item `depth` positions from the top without removing it.
    pub fn peek(&self, depth: usize) -> VmResult<StackItem> {
        let items = self.items.borrow();
        if depth >= items.len() {
            return Err(VmError::stack_underflow(depth + 1, items.len()));
        }
        Ok(items[items.len() - 1 - depth].clone())
    }

    /// Removes the item `depth` positions from the top.
    pub fn remove(&self, depth: usize) -> VmResult<StackItem> {
        let mut items = self.items.borrow_mut();
        if depth >= items.len() {
            return Err(VmError::stack_underflow(depth + 1, items.len()));
        }
        let index = items.len() - 1 - depth;
        let item = items.remove(index);
        self.reference_counter.remove_stack_reference(&item);
        Ok(item)
    }

    /// Inserts an item `depth` positions from the top.
    pub fn insert(&self, depth: usize, item: StackItem) -> VmResult<()> {
        let mut items = self.items.borrow_mut();
        if depth > items.len() {
            return Err(VmError::stack_underflow(depth, items.len()));
        }
        self.reference_counter.add_stack_reference(&item);
        let index = items.len() - depth;
        items.insert(index, item);
        Ok(())
    }

    /// Reverses the order of the top `count` items.
    pub fn reverse(&self, count: usize) -> VmResult<()> {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        if count > len {
            return Err(VmError::stack_underflow(count, len));
        }
        items[len - count..].reverse();
        Ok(())
    }

    /// Swaps the items at the two depths.
    pub fn swap(&self, a: usize, b: usize) -> VmResult<()> {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        if a >= len || b >= len {
            return Err(VmError::stack_underflow(a.max(b) + 1, len));
        }
        items.swap(len - 1 - a, len - 1 - b);
        Ok(())
    }

    /// Pops every item.
    pub fn clear(&self) {
        let mut items = self.items.borrow_mut();
        for item in items.drain(..) {
            self.reference_counter.remove_stack_reference(&item);
        }
    }

    /// Moves every item to the bottom→top order of `target`, preserving
    /// order. Used when a context unloads to a different stack.
    pub fn drain_to(&self, target: &EvaluationStack) {
        let drained: Vec<StackItem> = {
            let mut items = self.items.borrow_mut();
            items.drain(..).collect()
        };
        for item in drained {
            self.reference_counter.remove_stack_reference(&item);
            target.push(item);
        }
    }

    /// A snapshot of the items, bottom first.
    pub fn to_vec(&self) -> Vec<StackItem> {
        self.items.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> EvaluationStack {
        EvaluationStack::new(ReferenceCounter::new())
    }

    #[test]
    fn test_push_pop_order() {
        let s = stack();
        s.push(StackItem::from_int(1));
        s.push(StackItem::from_int(2));
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 2.into());
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 1.into());
        assert!(s.pop().is_err());
    }

    #[test]
    fn test_reference_count_tracks_stack() {
        let s = stack();
        s.push(StackItem::from_int(1));
        s.push(StackItem::Null);
        assert_eq!(s.reference_counter().count(), 2);
        s.clear();
        assert_eq!(s.reference_counter().count(), 0);
    }

    #[test]
    fn test_peek_and_remove_by_depth() {
        let s = stack();
        for i in 0..4 {
            s.push(StackItem::from_int(i));
        }
        assert_eq!(s.peek(0).unwrap().to_int().unwrap(), 3.into());
        assert_eq!(s.peek(3).unwrap().to_int().unwrap(), 0.into());
        assert!(s.peek(4).is_err());

        let removed = s.remove(1).unwrap();
        assert_eq!(removed.to_int().unwrap(), 2.into());
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_reverse_top() {
        let s = stack();
        for i in 0..4 {
            s.push(StackItem::from_int(i));
        }
        s.reverse(3).unwrap();
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 1.into());
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 2.into());
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 3.into());
        assert_eq!(s.pop().unwrap().to_int().unwrap(), 0.into());
    }

    #[test]
    fn test_shared_storage_on_clone() {
        let s = stack();
        let alias = s.clone();
        s.push(StackItem::from_int(9));
        assert_eq!(alias.len(), 1);
        assert!(s.same_stack(&alias));
    }

    #[test]
    fn test_drain_to_preserves_order() {
        let rc = ReferenceCounter::new();
        let a = EvaluationStack::new(rc.clone());
        let b = EvaluationStack::new(rc.clone());
        a.push(StackItem::from_int(1));
        a.push(StackItem::from_int(2));
        a.drain_to(&b);
        assert_eq!(a.len(), 0);
        assert_eq!(b.pop().unwrap().to_int().unwrap(), 2.into());
        assert_eq!(b.pop().unwrap().to_int().unwrap(), 1.into());
        assert_eq!(rc.count(), 0);
    }
}
