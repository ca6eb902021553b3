//! Reference counting over the compound-item arena.
//!
//! One counter belongs to one engine. It tracks two counts per compound:
//! stack references (positions in evaluation stacks and slots) and object
//! references (slots of other compounds). The scalar `count` sums every
//! stack position and every compound slot across all items, and the engine
//! bounds it by `MaxStackSize` after each step.
//!
//! Plain decrement cannot reclaim cycles, so the post-step sweep runs
//! Tarjan's strongly-connected-components algorithm over the candidates
//! whose stack references dropped to zero and frees every component that
//! is unreachable from a live reference.

use crate::error::{VmError, VmResult};
use crate::limits::ExecutionEngineLimits;
use crate::stack_item::{comparable_size, CompoundHandle, MapKey, StackItem};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// The contents of one arena entry.
#[derive(Debug)]
pub(crate) enum CompoundContents {
    Array(Vec<StackItem>),
    Struct(Vec<StackItem>),
    Map(IndexMap<MapKey, StackItem>),
}

impl CompoundContents {
    fn edge_total(&self) -> usize {
        match self {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => items.len(),
            // Each map entry holds a key and a value.
            CompoundContents::Map(map) => map.len() * 2,
        }
    }

    fn child_handles(&self) -> Vec<CompoundHandle> {
        let mut children = Vec::new();
        match self {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                for item in items {
                    if let Some(handle) = item.compound_handle() {
                        children.push(handle);
                    }
                }
            }
            CompoundContents::Map(map) => {
                for value in map.values() {
                    if let Some(handle) = value.compound_handle() {
                        children.push(handle);
                    }
                }
            }
        }
        children
    }
}

#[derive(Debug)]
struct CompoundEntry {
    contents: CompoundContents,
    stack_refs: usize,
    /// Referring parent handle → number of edges from it.
    parents: HashMap<usize, usize>,
}

#[derive(Default)]
struct CounterInner {
    arena: Vec<Option<CompoundEntry>>,
    free: Vec<usize>,
    total: usize,
    zero_referred: HashSet<usize>,
}

impl CounterInner {
    fn entry(&self, handle: CompoundHandle) -> VmResult<&CompoundEntry> {
        self.arena
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| VmError::invalid_operation("compound handle is no longer alive"))
    }

    fn entry_mut(&mut self, handle: CompoundHandle) -> VmResult<&mut CompoundEntry> {
        self.arena
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| VmError::invalid_operation("compound handle is no longer alive"))
    }

    fn allocate(&mut self, contents: CompoundContents) -> CompoundHandle {
        let entry = CompoundEntry {
            contents,
            stack_refs: 0,
            parents: HashMap::new(),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.arena[index] = Some(entry);
                index
            }
            None => {
                self.arena.push(Some(entry));
                self.arena.len() - 1
            }
        };
        // Until something references the new item it is a sweep candidate.
        self.zero_referred.insert(index);
        CompoundHandle(index)
    }

    /// Records one edge from `parent` to `child`.
    fn add_object_reference(&mut self, parent: CompoundHandle, child: &StackItem) {
        self.total += 1;
        if let Some(handle) = child.compound_handle() {
            if let Ok(entry) = self.entry_mut(handle) {
                *entry.parents.entry(parent.0).or_insert(0) += 1;
                self.zero_referred.remove(&handle.0);
            }
        }
    }

    /// Removes one edge from `parent` to `child`.
    fn remove_object_reference(&mut self, parent: CompoundHandle, child: &StackItem) {
        self.total -= 1;
        if let Some(handle) = child.compound_handle() {
            let mut became_candidate = false;
            if let Ok(entry) = self.entry_mut(handle) {
                if let Some(count) = entry.parents.get_mut(&parent.0) {
                    *count -= 1;
                    if *count == 0 {
                        entry.parents.remove(&parent.0);
                    }
                }
                became_candidate = entry.stack_refs == 0;
            }
            if became_candidate {
                self.zero_referred.insert(handle.0);
            }
        }
    }
}

/// Shared handle to the per-engine reference counter and compound arena.
#[derive(Clone, Default)]
pub struct ReferenceCounter {
    inner: Rc<RefCell<CounterInner>>,
}

impl ReferenceCounter {
    /// Creates an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The total reference count: every stack and slot position plus every
    /// compound slot.
    pub fn count(&self) -> usize {
        self.inner.borrow().total
    }

    /// Number of live arena entries, for tests and diagnostics.
    pub fn tracked_items(&self) -> usize {
        let inner = self.inner.borrow();
        inner.arena.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether an arena entry is still alive.
    pub fn is_alive(&self, handle: CompoundHandle) -> bool {
        self.inner.borrow().entry(handle).is_ok()
    }

    /// Allocates an array from the given items.
    pub fn new_array(&self, items: Vec<StackItem>) -> StackItem {
        let handle = self.allocate_sequence(items, false);
        StackItem::Array(handle)
    }

    /// Allocates a struct from the given items.
    pub fn new_struct(&self, items: Vec<StackItem>) -> StackItem {
        let handle = self.allocate_sequence(items, true);
        StackItem::Struct(handle)
    }

    fn allocate_sequence(&self, items: Vec<StackItem>, is_struct: bool) -> CompoundHandle {
        let mut inner = self.inner.borrow_mut();
        let contents = if is_struct {
            CompoundContents::Struct(Vec::new())
        } else {
            CompoundContents::Array(Vec::new())
        };
        let handle = inner.allocate(contents);
        for item in items {
            inner.add_object_reference(handle, &item);
            match &mut inner.entry_mut(handle).expect("just allocated").contents {
                CompoundContents::Array(vec) | CompoundContents::Struct(vec) => vec.push(item),
                CompoundContents::Map(_) => unreachable!("allocated a sequence"),
            }
        }
        handle
    }

    /// Allocates a map from the given entries.
    pub fn new_map(&self, entries: Vec<(MapKey, StackItem)>) -> StackItem {
        let mut inner = self.inner.borrow_mut();
        let handle = inner.allocate(CompoundContents::Map(IndexMap::new()));
        for (key, value) in entries {
            inner.total += 1; // the key
            inner.add_object_reference(handle, &value);
            match &mut inner.entry_mut(handle).expect("just allocated").contents {
                CompoundContents::Map(map) => {
                    map.insert(key, value);
                }
                _ => unreachable!("allocated a map"),
            }
        }
        StackItem::Map(handle)
    }

    /// Adds one stack reference to an item.
    pub fn add_stack_reference(&self, item: &StackItem) {
        self.add_stack_references(item, 1);
    }

    /// Adds `count` stack references to an item.
    pub fn add_stack_references(&self, item: &StackItem, count: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.total += count;
        if let Some(handle) = item.compound_handle() {
            if let Ok(entry) = inner.entry_mut(handle) {
                entry.stack_refs += count;
            }
            inner.zero_referred.remove(&handle.0);
        }
    }

    /// Removes one stack reference from an item.
    pub fn remove_stack_reference(&self, item: &StackItem) {
        let mut inner = self.inner.borrow_mut();
        inner.total -= 1;
        if let Some(handle) = item.compound_handle() {
            let mut became_candidate = false;
            if let Ok(entry) = inner.entry_mut(handle) {
                entry.stack_refs = entry.stack_refs.saturating_sub(1);
                became_candidate = entry.stack_refs == 0;
            }
            if became_candidate {
                inner.zero_referred.insert(handle.0);
            }
        }
    }

    /// Stack-reference count of a compound, for tests.
    pub fn stack_references_of(&self, handle: CompoundHandle) -> usize {
        self.inner
            .borrow()
            .entry(handle)
            .map(|e| e.stack_refs)
            .unwrap_or(0)
    }

    /// Number of elements (sequence length or map entry count).
    pub fn item_count(&self, handle: CompoundHandle) -> VmResult<usize> {
        let inner = self.inner.borrow();
        let entry = inner.entry(handle)?;
        Ok(match &entry.contents {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => items.len(),
            CompoundContents::Map(map) => map.len(),
        })
    }

    /// Clones out the elements of an array or struct.
    pub fn seq_items(&self, handle: CompoundHandle) -> VmResult<Vec<StackItem>> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => Ok(items.clone()),
            CompoundContents::Map(_) => Err(VmError::invalid_type("Array or Struct", "Map")),
        }
    }

    /// Reads one element of an array or struct.
    pub fn seq_get(&self, handle: CompoundHandle, index: usize) -> VmResult<StackItem> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => items
                .get(index)
                .cloned()
                .ok_or_else(|| VmError::index_out_of_range(index, items.len())),
            CompoundContents::Map(_) => Err(VmError::invalid_type("Array or Struct", "Map")),
        }
    }

    /// Replaces one element of an array or struct.
    pub fn seq_set(&self, handle: CompoundHandle, index: usize, item: StackItem) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let old = {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                    if index >= items.len() {
                        return Err(VmError::index_out_of_range(index, items.len()));
                    }
                    std::mem::replace(&mut items[index], item.clone())
                }
                CompoundContents::Map(_) => {
                    return Err(VmError::invalid_type("Array or Struct", "Map"))
                }
            }
        };
        inner.remove_object_reference(handle, &old);
        inner.add_object_reference(handle, &item);
        Ok(())
    }

    /// Appends an element to an array or struct.
    pub fn seq_append(&self, handle: CompoundHandle, item: StackItem) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                    items.push(item.clone());
                }
                CompoundContents::Map(_) => {
                    return Err(VmError::invalid_type("Array or Struct", "Map"))
                }
            }
        }
        inner.add_object_reference(handle, &item);
        Ok(())
    }

    /// Removes the element at `index` from an array or struct.
    pub fn seq_remove(&self, handle: CompoundHandle, index: usize) -> VmResult<StackItem> {
        let mut inner = self.inner.borrow_mut();
        let removed = {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                    if index >= items.len() {
                        return Err(VmError::index_out_of_range(index, items.len()));
                    }
                    items.remove(index)
                }
                CompoundContents::Map(_) => {
                    return Err(VmError::invalid_type("Array or Struct", "Map"))
                }
            }
        };
        inner.remove_object_reference(handle, &removed);
        Ok(removed)
    }

    /// Removes and returns the last element of an array or struct.
    pub fn seq_pop(&self, handle: CompoundHandle) -> VmResult<StackItem> {
        let len = self.item_count(handle)?;
        if len == 0 {
            return Err(VmError::index_out_of_range(0usize, 0));
        }
        self.seq_remove(handle, len - 1)
    }

    /// Reverses the elements of an array or struct in place.
    pub fn seq_reverse(&self, handle: CompoundHandle) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.entry_mut(handle)?.contents {
            CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                items.reverse();
                Ok(())
            }
            CompoundContents::Map(_) => Err(VmError::invalid_type("Array or Struct", "Map")),
        }
    }

    /// Drops every element (and edge) of a compound.
    pub fn clear_items(&self, handle: CompoundHandle) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let (items, keys) = {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Array(items) | CompoundContents::Struct(items) => {
                    (std::mem::take(items), 0)
                }
                CompoundContents::Map(map) => {
                    let keys = map.len();
                    let values = map.drain(..).map(|(_, v)| v).collect();
                    (values, keys)
                }
            }
        };
        inner.total -= keys;
        for item in &items {
            inner.remove_object_reference(handle, item);
        }
        Ok(())
    }

    /// Reads a map value.
    pub fn map_get(&self, handle: CompoundHandle, key: &MapKey) -> VmResult<Option<StackItem>> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Map(map) => Ok(map.get(key).cloned()),
            _ => Err(VmError::invalid_type("Map", "Array or Struct")),
        }
    }

    /// Whether a map holds a key.
    pub fn map_contains(&self, handle: CompoundHandle, key: &MapKey) -> VmResult<bool> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Map(map) => Ok(map.contains_key(key)),
            _ => Err(VmError::invalid_type("Map", "Array or Struct")),
        }
    }

    /// Inserts or replaces a map entry.
    pub fn map_set(&self, handle: CompoundHandle, key: MapKey, value: StackItem) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let replaced = {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Map(map) => map.insert(key, value.clone()),
                _ => return Err(VmError::invalid_type("Map", "Array or Struct")),
            }
        };
        match replaced {
            Some(old) => inner.remove_object_reference(handle, &old),
            None => inner.total += 1, // the new key
        }
        inner.add_object_reference(handle, &value);
        Ok(())
    }

    /// Removes a map entry; returns whether it existed.
    pub fn map_remove(&self, handle: CompoundHandle, key: &MapKey) -> VmResult<bool> {
        let mut inner = self.inner.borrow_mut();
        let removed = {
            let entry = inner.entry_mut(handle)?;
            match &mut entry.contents {
                CompoundContents::Map(map) => map.shift_remove(key),
                _ => return Err(VmError::invalid_type("Map", "Array or Struct")),
            }
        };
        match removed {
            Some(old) => {
                inner.total -= 1; // the key
                inner.remove_object_reference(handle, &old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The map's keys in insertion order.
    pub fn map_keys(&self, handle: CompoundHandle) -> VmResult<Vec<MapKey>> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Map(map) => Ok(map.keys().cloned().collect()),
            _ => Err(VmError::invalid_type("Map", "Array or Struct")),
        }
    }

    /// The map's values in insertion order.
    pub fn map_values(&self, handle: CompoundHandle) -> VmResult<Vec<StackItem>> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Map(map) => Ok(map.values().cloned().collect()),
            _ => Err(VmError::invalid_type("Map", "Array or Struct")),
        }
    }

    /// The map's entries in insertion order.
    pub fn map_entries(&self, handle: CompoundHandle) -> VmResult<Vec<(MapKey, StackItem)>> {
        let inner = self.inner.borrow();
        match &inner.entry(handle)?.contents {
            CompoundContents::Map(map) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            _ => Err(VmError::invalid_type("Map", "Array or Struct")),
        }
    }

    /// Whether the handle refers to a struct.
    pub fn is_struct(&self, handle: CompoundHandle) -> bool {
        self.inner
            .borrow()
            .entry(handle)
            .map(|e| matches!(e.contents, CompoundContents::Struct(_)))
            .unwrap_or(false)
    }

    /// Deep-copies a struct: nested structs are copied, every other element
    /// is shared. Iterative; bounded by `max_stack_size` created elements.
    pub fn clone_struct(
        &self,
        handle: CompoundHandle,
        limits: &ExecutionEngineLimits,
    ) -> VmResult<StackItem> {
        if !self.is_struct(handle) {
            return Err(VmError::invalid_type("Struct", "other"));
        }
        let mut budget = limits.max_stack_size;
        let root = match self.new_struct(Vec::new()) {
            StackItem::Struct(h) => h,
            _ => unreachable!(),
        };
        let mut queue = vec![(handle, root)];
        while let Some((source, target)) = queue.pop() {
            for item in self.seq_items(source)? {
                if budget == 0 {
                    return Err(VmError::limit_exceeded(
                        "struct clone size",
                        limits.max_stack_size + 1,
                        limits.max_stack_size,
                    ));
                }
                budget -= 1;
                match item {
                    StackItem::Struct(nested) => {
                        let copy = match self.new_struct(Vec::new()) {
                            StackItem::Struct(h) => h,
                            _ => unreachable!(),
                        };
                        self.seq_append(target, StackItem::Struct(copy))?;
                        queue.push((nested, copy));
                    }
                    other => self.seq_append(target, other)?,
                }
            }
        }
        Ok(StackItem::Struct(root))
    }

    /// The charged total equality procedure: content for primitives, deep
    /// for structs, identity for every other compound. Iterative; the byte
    /// budget is `max_comparable_size` and overflow fails the operation.
    pub fn equals(
        &self,
        a: &StackItem,
        b: &StackItem,
        limits: &ExecutionEngineLimits,
    ) -> VmResult<bool> {
        let mut budget = limits.max_comparable_size as i64;
        let mut queue = vec![(a.clone(), b.clone())];
        while let Some((left, right)) = queue.pop() {
            let charge = |budget: &mut i64, amount: usize| -> VmResult<()> {
                *budget -= amount.max(1) as i64;
                if *budget < 0 {
                    return Err(VmError::limit_exceeded(
                        "comparable size",
                        limits.max_comparable_size + 1,
                        limits.max_comparable_size,
                    ));
                }
                Ok(())
            };
            let matched = match (&left, &right) {
                (StackItem::Null, StackItem::Null) => true,
                (
                    StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                    StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                ) => {
                    charge(
                        &mut budget,
                        comparable_size(&left) + comparable_size(&right),
                    )?;
                    left.to_byte_slice()? == right.to_byte_slice()?
                }
                (StackItem::Buffer(x), StackItem::Buffer(y)) => {
                    charge(&mut budget, 1)?;
                    x.same_buffer(y)
                }
                (StackItem::Array(x), StackItem::Array(y))
                | (StackItem::Map(x), StackItem::Map(y)) => {
                    charge(&mut budget, 1)?;
                    x == y
                }
                (StackItem::Struct(x), StackItem::Struct(y)) => {
                    charge(&mut budget, 1)?;
                    if x == y {
                        true
                    } else {
                        let left_items = self.seq_items(*x)?;
                        let right_items = self.seq_items(*y)?;
                        if left_items.len() != right_items.len() {
                            false
                        } else {
                            for pair in left_items.into_iter().zip(right_items) {
                                queue.push(pair);
                            }
                            true
                        }
                    }
                }
                (StackItem::InteropInterface(x), StackItem::InteropInterface(y)) => {
                    charge(&mut budget, 1)?;
                    Rc::ptr_eq(x, y)
                }
                (StackItem::Pointer(x), StackItem::Pointer(y)) => {
                    charge(&mut budget, 1)?;
                    x == y
                }
                _ => false,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The post-step sweep: detects and frees unreachable strongly-connected
    /// components among the zero-stack-reference candidates. Returns the
    /// total reference count.
    pub fn check_zero_referred(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        if inner.zero_referred.is_empty() {
            return inner.total;
        }

        let drained: Vec<usize> = inner.zero_referred.drain().collect();
        let candidates: Vec<usize> = drained
            .into_iter()
            .filter(|&h| inner.arena.get(h).map(|s| s.is_some()).unwrap_or(false))
            .collect();
        if candidates.is_empty() {
            return inner.total;
        }

        // Subgraph: everything reachable from the candidates along child
        // edges. Parents outside this subgraph necessarily hold live stack
        // references, because every zero-stack-reference compound is a
        // candidate.
        let mut subgraph: HashSet<usize> = HashSet::new();
        let mut stack: Vec<usize> = candidates.clone();
        while let Some(node) = stack.pop() {
            if !subgraph.insert(node) {
                continue;
            }
            if let Ok(entry) = inner.entry(CompoundHandle(node)) {
                for child in entry.contents.child_handles() {
                    if inner.entry(child).is_ok() {
                        stack.push(child.0);
                    }
                }
            }
        }

        let components = tarjan_scc(&inner, &subgraph);

        // Tarjan emits successors before predecessors; walk in reverse so a
        // component's parents are decided before the component itself.
        let mut component_of: HashMap<usize, usize> = HashMap::new();
        for (id, component) in components.iter().enumerate() {
            for &node in component {
                component_of.insert(node, id);
            }
        }
        let mut alive = vec![false; components.len()];
        for id in (0..components.len()).rev() {
            let component = &components[id];
            let mut component_alive = false;
            'nodes: for &node in component {
                let entry = match inner.entry(CompoundHandle(node)) {
                    Ok(entry) => entry,
                    Err(_) => continue,
                };
                if entry.stack_refs > 0 {
                    component_alive = true;
                    break;
                }
                for &parent in entry.parents.keys() {
                    match component_of.get(&parent) {
                        // A live reference outside the candidate subgraph.
                        None => {
                            component_alive = true;
                            break 'nodes;
                        }
                        Some(&parent_component) if parent_component != id => {
                            if alive[parent_component] {
                                component_alive = true;
                                break 'nodes;
                            }
                        }
                        _ => {}
                    }
                }
            }
            alive[id] = component_alive;
        }

        let dead: HashSet<usize> = components
            .iter()
            .enumerate()
            .filter(|(id, _)| !alive[*id])
            .flat_map(|(_, component)| component.iter().copied())
            .collect();

        let mut freed = 0usize;
        for &node in &dead {
            let entry = match inner.arena[node].take() {
                Some(entry) => entry,
                None => continue,
            };
            inner.total -= entry.contents.edge_total();
            for child in entry.contents.child_handles() {
                if dead.contains(&child.0) {
                    continue;
                }
                let mut became_candidate = false;
                if let Ok(child_entry) = inner.entry_mut(child) {
                    child_entry.parents.remove(&node);
                    became_candidate = child_entry.stack_refs == 0;
                }
                if became_candidate {
                    inner.zero_referred.insert(child.0);
                }
            }
            inner.free.push(node);
            freed += 1;
        }
        if freed > 0 {
            log::debug!("reference sweep freed {freed} compound items");
        }

        inner.total
    }
}

/// Iterative Tarjan over the candidate subgraph. Components are emitted in
/// reverse topological order of the condensation (successors first).
fn tarjan_scc(inner: &CounterInner, subgraph: &HashSet<usize>) -> Vec<Vec<usize>> {
    #[derive(Default, Clone)]
    struct NodeState {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }

    let mut states: HashMap<usize, NodeState> = HashMap::new();
    let mut components = Vec::new();
    let mut next_index = 0usize;
    let mut scc_stack: Vec<usize> = Vec::new();

    let successors = |node: usize| -> Vec<usize> {
        inner
            .entry(CompoundHandle(node))
            .map(|entry| {
                entry
                    .contents
                    .child_handles()
                    .into_iter()
                    .map(|h| h.0)
                    .filter(|h| subgraph.contains(h))
                    .collect()
            })
            .unwrap_or_default()
    };

    enum Step {
        Descend(usize, usize),
        Close(usize),
    }

    for &start in subgraph {
        if states.get(&start).and_then(|s| s.index).is_some() {
            continue;
        }
        // Explicit DFS frames: (node, successor list, next successor index).
        let mut frames: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        {
            let state = states.entry(start).or_default();
            state.index = Some(next_index);
            state.lowlink = next_index;
            state.on_stack = true;
        }
        scc_stack.push(start);
        frames.push((start, successors(start), 0));
        next_index += 1;

        while !frames.is_empty() {
            let step = {
                let (node, succs, cursor) = frames.last_mut().expect("frames is non-empty");
                if *cursor < succs.len() {
                    let next = succs[*cursor];
                    *cursor += 1;
                    Step::Descend(*node, next)
                } else {
                    Step::Close(*node)
                }
            };
            match step {
                Step::Descend(node, next) => {
                    let next_state = states.entry(next).or_default().clone();
                    match next_state.index {
                        None => {
                            let state = states.entry(next).or_default();
                            state.index = Some(next_index);
                            state.lowlink = next_index;
                            state.on_stack = true;
                            scc_stack.push(next);
                            next_index += 1;
                            frames.push((next, successors(next), 0));
                        }
                        Some(next_index_value) => {
                            if next_state.on_stack {
                                let state = states.get_mut(&node).expect("visited");
                                state.lowlink = state.lowlink.min(next_index_value);
                            }
                        }
                    }
                }
                Step::Close(node) => {
                    frames.pop();
                    let node_state = states.get(&node).expect("visited").clone();
                    if Some(node_state.lowlink) == node_state.index {
                        let mut component = Vec::new();
                        loop {
                            let member = scc_stack.pop().expect("scc stack tracks visits");
                            states.get_mut(&member).expect("visited").on_stack = false;
                            component.push(member);
                            if member == node {
                                break;
                            }
                        }
                        components.push(component);
                    }
                    if let Some((parent, _, _)) = frames.last() {
                        let parent = *parent;
                        let parent_state = states.get_mut(&parent).expect("visited");
                        parent_state.lowlink = parent_state.lowlink.min(node_state.lowlink);
                    }
                }
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ExecutionEngineLimits {
        ExecutionEngineLimits::default()
    }

    #[test]
    fn test_total_counts_stack_and_object_references() {
        let rc = ReferenceCounter::new();
        let array = rc.new_array(vec![StackItem::from_int(1), StackItem::from_int(2)]);
        assert_eq!(rc.count(), 2); // two element edges
        rc.add_stack_reference(&array);
        assert_eq!(rc.count(), 3);
        rc.remove_stack_reference(&array);
        assert_eq!(rc.count(), 2);
    }

    #[test]
    fn test_unreferenced_array_is_swept() {
        let rc = ReferenceCounter::new();
        let array = rc.new_array(vec![StackItem::from_int(1)]);
        let handle = array.compound_handle().unwrap();
        rc.add_stack_reference(&array);
        rc.remove_stack_reference(&array);
        assert!(rc.is_alive(handle));
        let total = rc.check_zero_referred();
        assert_eq!(total, 0);
        assert!(!rc.is_alive(handle));
    }

    #[test]
    fn test_cycle_is_reclaimed_by_scc() {
        let rc = ReferenceCounter::new();
        let a = rc.new_array(vec![]);
        let b = rc.new_array(vec![]);
        let ha = a.compound_handle().unwrap();
        let hb = b.compound_handle().unwrap();
        rc.seq_append(ha, b.clone()).unwrap();
        rc.seq_append(hb, a.clone()).unwrap();
        rc.add_stack_reference(&a);

        // Both alive while `a` is on a stack.
        rc.check_zero_referred();
        assert!(rc.is_alive(ha));
        assert!(rc.is_alive(hb));

        // Releasing the only stack reference leaves an unreachable cycle.
        rc.remove_stack_reference(&a);
        let total = rc.check_zero_referred();
        assert_eq!(total, 0);
        assert!(!rc.is_alive(ha));
        assert!(!rc.is_alive(hb));
    }

    #[test]
    fn test_item_referenced_by_live_parent_survives() {
        let rc = ReferenceCounter::new();
        let inner_item = rc.new_array(vec![StackItem::from_int(7)]);
        let inner_handle = inner_item.compound_handle().unwrap();
        let outer = rc.new_array(vec![]);
        let outer_handle = outer.compound_handle().unwrap();
        rc.seq_append(outer_handle, inner_item.clone()).unwrap();
        rc.add_stack_reference(&outer);

        // The inner array has zero stack references but a live parent.
        rc.check_zero_referred();
        assert!(rc.is_alive(inner_handle));
        assert_eq!(rc.seq_get(outer_handle, 0).unwrap().compound_handle(), Some(inner_handle));
    }

    #[test]
    fn test_dropping_parent_cascades() {
        let rc = ReferenceCounter::new();
        let child = rc.new_array(vec![]);
        let child_handle = child.compound_handle().unwrap();
        let parent = rc.new_array(vec![]);
        let parent_handle = parent.compound_handle().unwrap();
        rc.seq_append(parent_handle, child).unwrap();
        rc.add_stack_reference(&parent);
        rc.check_zero_referred();

        rc.remove_stack_reference(&parent);
        rc.check_zero_referred();
        assert!(!rc.is_alive(parent_handle));
        assert!(!rc.is_alive(child_handle));
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn test_map_reference_accounting() {
        let rc = ReferenceCounter::new();
        let map = rc.new_map(vec![]);
        let handle = map.compound_handle().unwrap();
        rc.add_stack_reference(&map);
        assert_eq!(rc.count(), 1);

        rc.map_set(handle, MapKey::Integer(1.into()), StackItem::from_int(10))
            .unwrap();
        assert_eq!(rc.count(), 3); // stack ref + key + value
        rc.map_set(handle, MapKey::Integer(1.into()), StackItem::from_int(20))
            .unwrap();
        assert_eq!(rc.count(), 3); // replacement keeps the key
        assert!(rc.map_remove(handle, &MapKey::Integer(1.into())).unwrap());
        assert_eq!(rc.count(), 1);
    }

    #[test]
    fn test_struct_clone_is_deep_for_structs_only() {
        let rc = ReferenceCounter::new();
        let nested = rc.new_struct(vec![StackItem::from_int(1)]);
        let shared_array = rc.new_array(vec![StackItem::from_int(2)]);
        let root = rc.new_struct(vec![nested.clone(), shared_array.clone()]);
        let root_handle = root.compound_handle().unwrap();

        let copy = rc.clone_struct(root_handle, &limits()).unwrap();
        let copy_handle = copy.compound_handle().unwrap();
        let copy_items = rc.seq_items(copy_handle).unwrap();

        // Nested struct duplicated, array shared by handle.
        assert_ne!(
            copy_items[0].compound_handle(),
            nested.compound_handle()
        );
        assert_eq!(
            copy_items[1].compound_handle(),
            shared_array.compound_handle()
        );
        assert!(rc.equals(&root, &copy, &limits()).unwrap());
    }

    #[test]
    fn test_struct_equality_is_deep() {
        let rc = ReferenceCounter::new();
        let a = rc.new_struct(vec![StackItem::from_int(1), StackItem::from_bytes(vec![2])]);
        let b = rc.new_struct(vec![StackItem::from_int(1), StackItem::from_bytes(vec![2])]);
        let c = rc.new_struct(vec![StackItem::from_int(9)]);
        assert!(rc.equals(&a, &b, &limits()).unwrap());
        assert!(!rc.equals(&a, &c, &limits()).unwrap());
    }

    #[test]
    fn test_array_equality_is_identity() {
        let rc = ReferenceCounter::new();
        let a = rc.new_array(vec![StackItem::from_int(1)]);
        let b = rc.new_array(vec![StackItem::from_int(1)]);
        assert!(!rc.equals(&a, &b, &limits()).unwrap());
        assert!(rc.equals(&a, &a.clone(), &limits()).unwrap());
    }

    #[test]
    fn test_equality_budget_overflows() {
        let rc = ReferenceCounter::new();
        let mut restricted = limits();
        restricted.max_comparable_size = 8;
        let a = StackItem::from_bytes(vec![1u8; 16]);
        let b = StackItem::from_bytes(vec![1u8; 16]);
        assert!(rc.equals(&a, &b, &restricted).is_err());
    }

    #[test]
    fn test_primitive_cross_type_equality_compares_content() {
        let rc = ReferenceCounter::new();
        assert!(rc
            .equals(
                &StackItem::from_int(1),
                &StackItem::Boolean(true),
                &limits()
            )
            .unwrap());
        assert!(rc
            .equals(
                &StackItem::from_int(256),
                &StackItem::from_bytes(vec![0, 1]),
                &limits()
            )
            .unwrap());
    }

    #[test]
    fn test_deeply_nested_struct_operations_do_not_recurse() {
        let rc = ReferenceCounter::new();
        // A 20k-deep struct chain would overflow the native call stack if
        // clone or equality recursed.
        let mut current = rc.new_struct(vec![StackItem::from_int(0)]);
        for _ in 0..20_000 {
            current = rc.new_struct(vec![current]);
        }
        rc.add_stack_reference(&current);
        let handle = current.compound_handle().unwrap();

        let mut wide = limits();
        wide.max_stack_size = 100_000;
        wide.max_comparable_size = 10_000_000;
        let copy = rc.clone_struct(handle, &wide).unwrap();
        assert!(rc.equals(&current, &copy, &wide).unwrap());

        // And the sweep over the released chain must not recurse either.
        rc.remove_stack_reference(&current);
        rc.check_zero_referred();
        assert!(!rc.is_alive(handle));
    }
}
