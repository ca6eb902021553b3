//! Typed per-context auxiliary state.
//!
//! Hosts attach data to execution frames without the engine knowing the
//! concrete types: the table is owned by the host and keyed by the frame
//! id plus the state's type.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A host-owned table of per-context state objects.
#[derive(Default)]
pub struct ContextStateRegistry {
    entries: RefCell<HashMap<(u64, TypeId), Rc<dyn Any>>>,
}

impl ContextStateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the state of type `T` for a frame, creating it with the
    /// factory on first access.
    pub fn get_or_insert_with<T: 'static, F: FnOnce() -> T>(
        &self,
        context_id: u64,
        factory: F,
    ) -> Rc<T> {
        let key = (context_id, TypeId::of::<T>());
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .entry(key)
            .or_insert_with(|| Rc::new(factory()) as Rc<dyn Any>);
        entry
            .clone()
            .downcast::<T>()
            .expect("entry stored under its own type id")
    }

    /// Fetches the state of type `T` for a frame, if present.
    pub fn get<T: 'static>(&self, context_id: u64) -> Option<Rc<T>> {
        let key = (context_id, TypeId::of::<T>());
        self.entries
            .borrow()
            .get(&key)
            .cloned()
            .map(|entry| entry.downcast::<T>().expect("entry stored under its own type id"))
    }

    /// Drops every state attached to a frame.
    pub fn remove_context(&self, context_id: u64) {
        self.entries
            .borrow_mut()
            .retain(|(id, _), _| *id != context_id);
    }

    /// Number of stored entries, for tests.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_state_is_per_context_and_per_type() {
        let registry = ContextStateRegistry::new();
        let a = registry.get_or_insert_with(1, || Counter(10));
        let b = registry.get_or_insert_with(2, || Counter(20));
        assert_eq!(a.0, 10);
        assert_eq!(b.0, 20);
        // Repeated access returns the same object.
        let again = registry.get_or_insert_with(1, || Counter(99));
        assert!(Rc::ptr_eq(&a, &again));
        // A different type under the same context is distinct.
        let name = registry.get_or_insert_with(1, || "frame".to_string());
        assert_eq!(*name, "frame");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_context_drops_all_types() {
        let registry = ContextStateRegistry::new();
        registry.get_or_insert_with(1, || Counter(1));
        registry.get_or_insert_with(1, || "x".to_string());
        registry.get_or_insert_with(2, || Counter(2));
        registry.remove_context(1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get::<Counter>(1).is_none());
        assert!(registry.get::<Counter>(2).is_some());
    }
}
