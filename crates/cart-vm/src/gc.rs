use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};

use cart_common::error::Result;

use crate::allocator::{Allocator, Block};
use crate::config::PAGE_SIZE;
use crate::object::{HeapObject, Object};
use crate::value::{Scalar, Value};

/// Untyped reference to a heap slot. The generation changes every time the
/// slot is reused, so a handle to a freed object never aliases a new one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    /// Packs the id into one word, for storage inside a block.
    pub(crate) fn to_bits(self) -> u64 {
        u64::from(self.index) << 32 | u64::from(self.generation)
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Self { index: (bits >> 32) as u32, generation: bits as u32 }
    }
}

/// Typed handle to an object owned by a [`Heap`].
pub struct Gc<T> {
    id: ObjectId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Gc<T> {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self { id, marker: PhantomData }
    }

    /// A handle that refers to no object. Indexing the heap with it panics.
    pub(crate) fn dangling() -> Self {
        Self::new(ObjectId { index: u32::MAX, generation: u32::MAX })
    }

    pub fn id(self) -> ObjectId {
        self.id
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Gc<T> {}

impl<T> Hash for Gc<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Debug for Gc<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({}v{})", self.id.index, self.id.generation)
    }
}

/// Bookkeeping kept in front of every object.
#[derive(Debug)]
pub struct Header {
    pub block: Block,
    pub is_marked: bool,
    /// Pinned objects are never swept.
    pub is_pinned: bool,
}

#[derive(Debug)]
struct Entry {
    header: Header,
    object: Object,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Outcome of a sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sweep {
    pub objects: usize,
    pub bytes: usize,
}

/// Owner of every garbage-collected object. Each object's footprint is
/// reserved as one block of the [`Allocator`], which is what the collection
/// threshold is measured against. Strings and arrays keep their contents in
/// that block; see [`Heap::block_bytes`].
#[derive(Debug)]
pub struct Heap {
    allocator: Allocator,
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    gray: Vec<ObjectId>,
    children: Vec<ObjectId>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(PAGE_SIZE)
    }
}

impl Heap {
    pub fn new(page_size: usize) -> Self {
        Self {
            allocator: Allocator::new(page_size),
            slots: Vec::new(),
            vacant: Vec::new(),
            gray: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Registers `object` with the collector. Never collects; callers that
    /// want a collection run one first.
    pub fn alloc<T: HeapObject>(&mut self, object: T) -> Result<Gc<T>> {
        self.insert(object.into_object(), false).map(Gc::new)
    }

    pub(crate) fn insert(&mut self, object: Object, is_pinned: bool) -> Result<ObjectId> {
        let block = self.allocator.allocate(object.size())?;
        log::trace!("alloc {} ({} bytes)", object.type_name(), block.size());

        let entry = Entry { header: Header { block, is_marked: false, is_pinned }, object };
        let index = match self.vacant.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        Ok(ObjectId { index, generation: slot.generation })
    }

    pub fn get<T: HeapObject>(&self, gc: Gc<T>) -> Option<&T> {
        T::from_object(self.object(gc.id)?)
    }

    pub fn get_mut<T: HeapObject>(&mut self, gc: Gc<T>) -> Option<&mut T> {
        T::from_object_mut(&mut self.entry_mut(gc.id)?.object)
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.entry(id).map(|entry| &entry.object)
    }

    pub fn header(&self, id: ObjectId) -> Option<&Header> {
        self.entry(id).map(|entry| &entry.header)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id).is_some()
    }

    /// The block backing a live object.
    pub fn block_bytes(&self, id: ObjectId) -> Option<&[u8]> {
        let entry = self.entry(id)?;
        Some(self.allocator.bytes(&entry.header.block))
    }

    pub fn block_bytes_mut(&mut self, id: ObjectId) -> Option<&mut [u8]> {
        let block = self.entry(id)?.header.block;
        Some(self.allocator.bytes_mut(&block))
    }

    /// Re-measures an object after it grew and reserves the extra bytes. The
    /// contents of the block move with it.
    pub fn resize(&mut self, id: ObjectId) -> Result<()> {
        let Some(index) = self.live_index(id) else { return Ok(()) };
        let Some(entry) = self.slots[index].entry.as_ref() else { return Ok(()) };
        let size = entry.object.size();
        let block = entry.header.block;
        if size > block.size() {
            let block = self.allocator.grow(block, size)?;
            if let Some(entry) = self.slots[index].entry.as_mut() {
                entry.header.block = block;
            }
        }
        Ok(())
    }

    /// Payload bytes reserved for live objects.
    pub fn bytes_allocated(&self) -> usize {
        self.allocator.allocated_bytes()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    /// Blackens gray objects until none are left.
    pub fn trace(&mut self) {
        let mut children = mem::take(&mut self.children);
        while let Some(id) = self.gray.pop() {
            if let Some(entry) = self.entry(id) {
                entry.object.children(self.allocator.bytes(&entry.header.block), &mut children);
            }
            for child in children.drain(..) {
                self.mark(child);
            }
        }
        self.children = children;
    }

    /// Frees every unmarked object that is not pinned and clears the mark of
    /// every survivor.
    pub fn sweep(&mut self) -> Sweep {
        debug_assert!(self.gray.is_empty(), "sweep started before tracing finished");

        let mut sweep = Sweep::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(entry) = &mut slot.entry else { continue };
            if entry.header.is_marked || entry.header.is_pinned {
                entry.header.is_marked = false;
                continue;
            }

            let block = entry.header.block;
            log::trace!("free {} ({} bytes)", entry.object.type_name(), block.size());
            self.allocator.free(block);
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.vacant.push(index as u32);

            sweep.objects += 1;
            sweep.bytes += block.size();
        }
        sweep
    }

    fn live_index(&self, id: ObjectId) -> Option<usize> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.generation == id.generation && slot.entry.is_some()).then_some(id.index as usize)
    }

    fn entry(&self, id: ObjectId) -> Option<&Entry> {
        let index = self.live_index(id)?;
        self.slots[index].entry.as_ref()
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry> {
        let index = self.live_index(id)?;
        self.slots[index].entry.as_mut()
    }
}

impl<T: HeapObject> Index<Gc<T>> for Heap {
    type Output = T;

    fn index(&self, gc: Gc<T>) -> &Self::Output {
        match self.get(gc) {
            Some(object) => object,
            None => panic!("{gc:?} does not refer to a live object of this type"),
        }
    }
}

impl<T: HeapObject> IndexMut<Gc<T>> for Heap {
    fn index_mut(&mut self, gc: Gc<T>) -> &mut Self::Output {
        match self.get_mut(gc) {
            Some(object) => object,
            None => panic!("{gc:?} does not refer to a live object of this type"),
        }
    }
}

pub trait GcMark<T> {
    fn mark(&mut self, object: T);
}

impl GcMark<ObjectId> for Heap {
    fn mark(&mut self, id: ObjectId) {
        let Some(entry) = self.entry_mut(id) else { return };
        if entry.header.is_marked {
            return;
        }
        entry.header.is_marked = true;
        if !entry.object.is_leaf() {
            self.gray.push(id);
        }
    }
}

impl<T> GcMark<Gc<T>> for Heap {
    fn mark(&mut self, gc: Gc<T>) {
        self.mark(gc.id);
    }
}

impl GcMark<Value> for Heap {
    fn mark(&mut self, value: Value) {
        if let Some(id) = value.as_object() {
            self.mark(id);
        }
    }
}

impl GcMark<Scalar> for Heap {
    fn mark(&mut self, scalar: Scalar) {
        if let Some(id) = scalar.as_object() {
            self.mark(id);
        }
    }
}
