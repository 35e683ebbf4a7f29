use std::mem;

use cart_common::error::{Result, TypeError};

use crate::config::{LOAD_FACTOR, TABLE_MIN_CAPACITY};
use crate::gc::Heap;
use crate::value::{Scalar, Value};

/// A table key together with its precomputed hash.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Key {
    pub hash: u64,
    pub scalar: Scalar,
}

impl Key {
    pub fn new(heap: &Heap, scalar: Scalar) -> Result<Self> {
        match scalar.hash(heap) {
            Some(hash) => Ok(Self { hash, scalar }),
            None => Err(TypeError::Unhashable { type_: scalar.type_name(heap).to_string() }.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Link {
    Slot(usize),
    Node(usize),
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    key: Key,
    value: Value,
    next: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    entry: Entry,
    prev: Link,
}

/// Hash table with separate chaining. The head of every chain lives inline
/// in the slot array; the rest of the chain is a doubly linked list of nodes
/// in an arena.
///
/// Keys compare by hash alone: two distinct keys with the same hash are the
/// same key.
#[derive(Clone, Debug)]
pub struct Table {
    slots: Vec<Option<Entry>>,
    nodes: Vec<Option<Node>>,
    vacant: Vec<usize>,
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::with_capacity(TABLE_MIN_CAPACITY)
    }
}

impl Table {
    /// Creates a table with at least `capacity` slots, rounded up to a power
    /// of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(TABLE_MIN_CAPACITY).next_power_of_two();
        Self { slots: vec![None; capacity], nodes: Vec::new(), vacant: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.find(key.hash).map(|link| self.entry(link).value)
    }

    /// Inserts or overwrites. Returns the previous value for the key.
    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        if let Some(link) = self.find(key.hash) {
            return Some(mem::replace(&mut self.entry_mut(link).value, value));
        }

        if (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR {
            self.resize(self.capacity() * 2);
        }
        self.place(key, value);
        self.count += 1;
        None
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let link = self.find(key.hash)?;
        let removed = self.entry(link);

        match link {
            Link::Slot(idx) => {
                // Promote the first chained node into the slot.
                self.slots[idx] = match removed.next {
                    Some(next) => {
                        let node = self.release(next);
                        if let Some(after) = node.entry.next {
                            self.node_mut(after).prev = Link::Slot(idx);
                        }
                        Some(node.entry)
                    }
                    None => None,
                };
            }
            Link::Node(idx) => {
                let node = self.release(idx);
                match node.prev {
                    Link::Slot(prev) => {
                        if let Some(head) = &mut self.slots[prev] {
                            head.next = node.entry.next;
                        }
                    }
                    Link::Node(prev) => self.node_mut(prev).entry.next = node.entry.next,
                }
                if let Some(after) = node.entry.next {
                    self.node_mut(after).prev = node.prev;
                }
            }
        }

        self.count -= 1;
        Some(removed.value)
    }

    /// Every entry, chain heads first.
    pub fn iter(&self) -> impl Iterator<Item = (Key, Value)> + '_ {
        let heads = self.slots.iter().flatten();
        let chained = self.nodes.iter().flatten().map(|node| &node.entry);
        heads.chain(chained).map(|entry| (entry.key, entry.value))
    }

    /// Bytes of storage reserved by this table.
    pub fn footprint(&self) -> usize {
        self.slots.len() * mem::size_of::<Option<Entry>>()
            + self.nodes.len() * mem::size_of::<Option<Node>>()
    }

    fn resize(&mut self, capacity: usize) {
        log::trace!("table grows from {} to {capacity} slots", self.capacity());
        let mut table = Table::with_capacity(capacity);
        for (key, value) in self.iter() {
            table.place(key, value);
        }
        table.count = self.count;
        *self = table;
    }

    /// Adds an entry whose key is known to be absent.
    fn place(&mut self, key: Key, value: Value) {
        let idx = self.slot_of(key.hash);
        let entry = Entry { key, value, next: None };

        let Some(head) = self.slots[idx] else {
            self.slots[idx] = Some(entry);
            return;
        };

        let mut tail = Link::Slot(idx);
        let mut next = head.next;
        while let Some(node) = next {
            tail = Link::Node(node);
            next = self.node(node).entry.next;
        }

        let node = self.acquire(Node { entry, prev: tail });
        self.entry_mut(tail).next = Some(node);
    }

    fn find(&self, hash: u64) -> Option<Link> {
        let idx = self.slot_of(hash);
        let head = self.slots[idx].as_ref()?;
        if head.key.hash == hash {
            return Some(Link::Slot(idx));
        }

        let mut next = head.next;
        while let Some(node) = next {
            let entry = &self.node(node).entry;
            if entry.key.hash == hash {
                return Some(Link::Node(node));
            }
            next = entry.next;
        }
        None
    }

    fn slot_of(&self, hash: u64) -> usize {
        hash as usize & (self.capacity() - 1)
    }

    fn entry(&self, link: Link) -> Entry {
        match link {
            Link::Slot(idx) => self.slots[idx].expect("link to empty slot"),
            Link::Node(idx) => self.node(idx).entry,
        }
    }

    fn entry_mut(&mut self, link: Link) -> &mut Entry {
        match link {
            Link::Slot(idx) => self.slots[idx].as_mut().expect("link to empty slot"),
            Link::Node(idx) => &mut self.node_mut(idx).entry,
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("link to vacant node")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("link to vacant node")
    }

    fn acquire(&mut self, node: Node) -> usize {
        match self.vacant.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Node {
        let node = self.nodes[idx].take().expect("link to vacant node");
        self.vacant.push(idx);
        node
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Keys whose hashes all land in slot `slot` of a table with `capacity`
    /// slots.
    fn colliding(slot: u64, capacity: u64, n: u64) -> Vec<Key> {
        (0..n)
            .map(|i| Key { hash: slot + i * capacity, scalar: Scalar::Int(i as i32) })
            .collect()
    }

    fn int(i: i32) -> Value {
        Value::from(i)
    }

    #[test]
    fn insert_get_overwrite() {
        let mut table = Table::default();
        let key = Key { hash: 42, scalar: Scalar::Int(42) };

        assert_eq!(table.insert(key, int(1)), None);
        assert_eq!(table.insert(key, int(2)), Some(int(1)));
        assert_eq!(table.get(&key), Some(int(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn equal_hashes_are_the_same_key() {
        let mut table = Table::default();
        table.insert(Key { hash: 9, scalar: Scalar::Int(1) }, int(1));
        table.insert(Key { hash: 9, scalar: Scalar::Long(2) }, int(2));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&Key { hash: 9, scalar: Scalar::Null }), Some(int(2)));
    }

    #[test]
    fn remove_chain_head_promotes_successor() {
        let mut table = Table::with_capacity(16);
        let keys = colliding(3, 16, 3);
        for (i, &key) in keys.iter().enumerate() {
            table.insert(key, int(i as i32));
        }

        assert_eq!(table.remove(&keys[0]), Some(int(0)));
        assert_eq!(table.get(&keys[0]), None);
        assert_eq!(table.get(&keys[1]), Some(int(1)));
        assert_eq!(table.get(&keys[2]), Some(int(2)));

        assert_eq!(table.remove(&keys[1]), Some(int(1)));
        assert_eq!(table.remove(&keys[2]), Some(int(2)));
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn remove_middle_and_tail_relinks_neighbours() {
        let mut table = Table::with_capacity(16);
        let keys = colliding(5, 16, 4);
        for (i, &key) in keys.iter().enumerate() {
            table.insert(key, int(i as i32));
        }

        assert_eq!(table.remove(&keys[1]), Some(int(1)));
        assert_eq!(table.remove(&keys[3]), Some(int(3)));
        assert_eq!(table.get(&keys[0]), Some(int(0)));
        assert_eq!(table.get(&keys[2]), Some(int(2)));

        // Vacated nodes are reused and the chain is still walkable.
        table.insert(keys[3], int(30));
        table.insert(keys[1], int(10));
        for (key, value) in [(keys[0], 0), (keys[1], 10), (keys[2], 2), (keys[3], 30)] {
            assert_eq!(table.get(&key), Some(int(value)));
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn remove_missing_key() {
        let mut table = Table::default();
        assert_eq!(table.remove(&Key { hash: 1, scalar: Scalar::Null }), None);
    }

    #[test]
    fn grows_past_load_factor_and_keeps_entries() {
        let mut table = Table::with_capacity(8);
        for i in 0..6 {
            table.insert(Key { hash: i, scalar: Scalar::Int(i as i32) }, int(i as i32));
        }
        assert_eq!(table.capacity(), 8);

        table.insert(Key { hash: 6, scalar: Scalar::Int(6) }, int(6));
        assert_eq!(table.capacity(), 16);

        for i in 0..200 {
            table.insert(Key { hash: i * 7919, scalar: Scalar::Int(i as i32) }, int(i as i32));
        }
        for i in 0..200 {
            assert_eq!(table.get(&Key { hash: i * 7919, scalar: Scalar::Null }), Some(int(i as i32)));
        }
        assert!(table.len() as f64 <= table.capacity() as f64 * LOAD_FACTOR);
    }
}
