use std::mem;

use crate::config::STACK_MIN_CAPACITY;

/// Growable array with an explicit logical capacity. Capacity doubles when a
/// push finds the stack full, and never drops below [`STACK_MIN_CAPACITY`]
/// once it has grown.
///
/// The same type backs the operand stack, the constant pool of a chunk, the
/// registries of the VM, and the user-visible stack, vector and array
/// objects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stack<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Copy + Default> Stack<T> {
    pub fn new() -> Self {
        Self { items: Vec::new(), capacity: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: T) {
        if self.items.len() == self.capacity {
            self.ensure_capacity(self.capacity + 1);
        }
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Returns the value `distance` slots below the top.
    pub fn peek(&self, distance: usize) -> Option<T> {
        let idx = self.items.len().checked_sub(distance + 1)?;
        self.items.get(idx).copied()
    }

    /// Grows the capacity by doubling until it holds at least `capacity`
    /// values.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        while self.capacity < capacity {
            self.capacity = grow_capacity(self.capacity);
        }
        self.items.reserve_exact(self.capacity - self.items.len());
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).copied()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// Stores `value` at `index`. An index past the count but within the
    /// capacity extends the count, filling the gap with `T::default()`.
    /// Returns `false` if `index` is outside the capacity.
    pub fn set(&mut self, index: usize, value: T) -> bool {
        if index < self.items.len() {
            self.items[index] = value;
        } else if index < self.capacity {
            self.items.resize(index, T::default());
            self.items.push(value);
        } else {
            return false;
        }
        true
    }

    /// Empties the stack, keeping its capacity.
    pub fn reset(&mut self) {
        self.items.clear();
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Bytes of storage reserved by this stack.
    pub fn footprint(&self) -> usize {
        self.capacity * mem::size_of::<T>()
    }
}

impl<T: Copy + Default> FromIterator<T> for Stack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut stack = Stack::new();
        for value in iter {
            stack.push(value);
        }
        stack
    }
}

pub fn grow_capacity(capacity: usize) -> usize {
    if capacity < STACK_MIN_CAPACITY {
        STACK_MIN_CAPACITY
    } else {
        capacity * 2
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn capacity_doubles_from_floor() {
        let mut stack = Stack::new();
        assert_eq!(stack.capacity(), 0);

        stack.push(1);
        assert_eq!(stack.capacity(), STACK_MIN_CAPACITY);

        for i in 1..=STACK_MIN_CAPACITY {
            stack.push(i);
        }
        assert_eq!(stack.len(), STACK_MIN_CAPACITY + 1);
        assert_eq!(stack.capacity(), STACK_MIN_CAPACITY * 2);
    }

    #[test]
    fn peek_counts_from_top() {
        let stack = [1, 2, 3].into_iter().collect::<Stack<i32>>();
        assert_eq!(stack.peek(0), Some(3));
        assert_eq!(stack.peek(2), Some(1));
        assert_eq!(stack.peek(3), None);
    }

    #[test]
    fn set_extends_within_capacity() {
        let mut stack = Stack::with_capacity(4);
        stack.push(7);

        assert!(stack.set(2, 9));
        assert_eq!(stack.as_slice(), &[7, 0, 9]);
        assert!(stack.set(0, 1));
        assert_eq!(stack.as_slice(), &[1, 0, 9]);
        assert!(!stack.set(4, 1));
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut stack = (0..100).collect::<Stack<i32>>();
        stack.reset();
        assert!(stack.is_empty());
        assert_eq!(stack.capacity(), 128);
        assert_eq!(stack.pop(), None);
    }
}
