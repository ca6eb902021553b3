//! Host objects surfaced to scripts as interop interfaces.

use crate::reference_counter::ReferenceCounter;
use crate::stack_item::{InteropObject, StackItem};
use neoxide_core::UInt160;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;

/// A storage context: the handle `System.Storage.GetContext` returns.
#[derive(Debug, Clone)]
pub struct StorageContext {
    /// The contract whose storage the context reads.
    pub contract: UInt160,
    /// Whether writes are forbidden through this handle.
    pub read_only: bool,
}

impl InteropObject for StorageContext {
    fn interface_type(&self) -> &'static str {
        "StorageContext"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A host-side enumerator driven by `System.Iterator.Next` / `Value`.
pub trait VmIterator {
    /// Advances; returns whether an element is available.
    fn next(&mut self) -> bool;

    /// The current element. Undefined before the first `next`.
    fn value(&self, rc: &ReferenceCounter) -> StackItem;
}

/// Iterator over storage entries, yielding `Struct(key, value)` items.
pub struct StorageIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: Option<usize>,
}

impl StorageIterator {
    /// Wraps a materialised storage range.
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries,
            position: None,
        }
    }
}

impl VmIterator for StorageIterator {
    fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.entries.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.entries.len());
            false
        }
    }

    fn value(&self, rc: &ReferenceCounter) -> StackItem {
        match self.position.and_then(|p| self.entries.get(p)) {
            Some((key, value)) => rc.new_struct(vec![
                StackItem::ByteString(key.clone()),
                StackItem::ByteString(value.clone()),
            ]),
            None => StackItem::Null,
        }
    }
}

/// The interop wrapper holding a mutable iterator.
pub struct IteratorHandle {
    inner: RefCell<Box<dyn VmIterator>>,
}

impl IteratorHandle {
    /// Wraps an iterator for the stack.
    pub fn new(iterator: Box<dyn VmIterator>) -> Self {
        Self {
            inner: RefCell::new(iterator),
        }
    }

    /// Advances the iterator.
    pub fn advance(&self) -> bool {
        self.inner.borrow_mut().next()
    }

    /// The current element.
    pub fn current(&self, rc: &ReferenceCounter) -> StackItem {
        self.inner.borrow().value(rc)
    }
}

impl fmt::Debug for IteratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IteratorHandle")
    }
}

impl InteropObject for IteratorHandle {
    fn interface_type(&self) -> &'static str {
        "Iterator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_iterator_walk() {
        let rc = ReferenceCounter::new();
        let iterator = StorageIterator::new(vec![
            (vec![1], vec![10]),
            (vec![2], vec![20]),
        ]);
        let handle = IteratorHandle::new(Box::new(iterator));

        assert!(handle.advance());
        let first = handle.current(&rc);
        let items = rc.seq_items(first.compound_handle().unwrap()).unwrap();
        assert_eq!(items[0].to_byte_slice().unwrap(), vec![1]);
        assert_eq!(items[1].to_byte_slice().unwrap(), vec![10]);

        assert!(handle.advance());
        assert!(!handle.advance());
        assert!(handle.current(&rc).is_null());
    }
}
