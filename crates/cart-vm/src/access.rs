//! Indexing and the built-in container operations shared by arrays,
//! vectors, stacks, strings and tables.
//!
//! Strings index by byte. Only ASCII bytes can be read or written as
//! `char`s, so a store never leaves a string holding invalid UTF-8.

use cart_common::error::{Error, IndexError, Result, TypeError};

use crate::gc::Heap;
use crate::object::ObjStack;
use crate::table::Key;
use crate::value::{Scalar, Value};

pub fn get_index(heap: &Heap, container: Value, index: Value) -> Result<Value> {
    let scalar = match container {
        Value::Scalar(Scalar::Str(string)) => {
            let bytes = heap.str(string).as_bytes();
            let idx = position(heap, container, index, bytes.len())?;
            Scalar::Char(ascii(idx, bytes[idx])?)
        }
        Value::Scalar(Scalar::Array(array)) => {
            let idx = position(heap, container, index, heap[array].len())?;
            heap.array_get(array, idx).unwrap_or_default()
        }
        Value::Vector(vector) => {
            let items = &heap[vector];
            let idx = position(heap, container, index, items.len())?;
            items.as_slice()[idx]
        }
        Value::Stack(stack) => {
            let items = &heap[stack];
            let idx = position(heap, container, index, items.len())?;
            return Ok(items.as_slice()[idx]);
        }
        Value::Table(table) => {
            let key = key(heap, index)?;
            return Ok(heap[table].get(&key).unwrap_or(Value::NULL));
        }
        _ => return Err(TypeError::NotIndexable { type_: container.type_name(heap).to_string() }.into()),
    };
    Ok(Value::Scalar(scalar))
}

/// Stores `value` in `container`. Storing one past the count (but within the
/// capacity) extends the container.
pub fn set_index(heap: &mut Heap, container: Value, index: Value, value: Value) -> Result<()> {
    match container {
        Value::Scalar(Scalar::Array(array)) => {
            let kind = heap[array].kind;
            let scalar = value.as_scalar().and_then(|scalar| kind.coerce(scalar));
            let scalar = scalar.ok_or_else(|| element_mismatch(heap, container, value))?;
            let idx = position(heap, container, index, heap[array].capacity())?;
            heap.array_set(array, idx, scalar);
        }
        Value::Vector(vector) => {
            let scalar = value.as_scalar().ok_or_else(|| element_mismatch(heap, container, value))?;
            let idx = position(heap, container, index, heap[vector].capacity())?;
            heap[vector].set(idx, scalar);
        }
        Value::Stack(stack) => {
            let idx = position(heap, container, index, heap[stack].capacity())?;
            heap[stack].set(idx, value);
        }
        Value::Table(table) => {
            let key = key(heap, index)?;
            heap[table].insert(key, value);
        }
        Value::Scalar(Scalar::Str(string)) => {
            let Some(Scalar::Char(byte)) = value.as_scalar() else {
                return Err(element_mismatch(heap, container, value));
            };
            let idx = position(heap, container, index, heap[string].capacity())?;
            if let Some(&old) = heap.str(string).as_bytes().get(idx) {
                ascii(idx, old)?;
            }
            heap.set_char(string, idx, ascii(idx, byte)?);
        }
        _ => return Err(TypeError::NotIndexable { type_: container.type_name(heap).to_string() }.into()),
    }
    grown(heap, container)
}

pub fn len(heap: &Heap, container: Value) -> Result<usize> {
    Ok(match container {
        Value::Scalar(Scalar::Str(string)) => heap[string].len(),
        Value::Scalar(Scalar::Array(array)) => heap[array].len(),
        Value::Vector(vector) => heap[vector].len(),
        Value::Stack(stack) => heap[stack].len(),
        Value::Table(table) => heap[table].len(),
        _ => return Err(unsupported(heap, "len", container)),
    })
}

pub fn push(heap: &mut Heap, container: Value, value: Value) -> Result<()> {
    match container {
        Value::Scalar(Scalar::Array(array)) => {
            let kind = heap[array].kind;
            let scalar = value.as_scalar().and_then(|scalar| kind.coerce(scalar));
            let scalar = scalar.ok_or_else(|| element_mismatch(heap, container, value))?;
            heap.array_push(array, scalar)?;
        }
        Value::Vector(vector) => {
            let scalar = value.as_scalar().ok_or_else(|| element_mismatch(heap, container, value))?;
            heap[vector].push(scalar);
        }
        Value::Stack(stack) => heap[stack].push(value),
        _ => return Err(unsupported(heap, "push", container)),
    }
    grown(heap, container)
}

pub fn pop(heap: &mut Heap, container: Value) -> Result<Value> {
    let popped = match container {
        Value::Scalar(Scalar::Array(array)) => heap.array_pop(array).map(Value::Scalar),
        Value::Vector(vector) => heap[vector].pop().map(Value::Scalar),
        Value::Stack(stack) => heap[stack].pop(),
        _ => return Err(unsupported(heap, "pop", container)),
    };
    popped.ok_or_else(|| IndexError::PopFromEmpty { type_: container.type_name(heap).to_string() }.into())
}

/// Deletes `key` from a table, returning the removed value or `null`.
pub fn remove(heap: &mut Heap, container: Value, key_value: Value) -> Result<Value> {
    let Value::Table(table) = container else {
        return Err(unsupported(heap, "remove", container));
    };
    let key = key(heap, key_value)?;
    Ok(heap[table].remove(&key).unwrap_or(Value::NULL))
}

/// Shallow copy of a string or container. Never collects.
pub fn copy(heap: &mut Heap, value: Value) -> Result<Value> {
    Ok(match value {
        Value::Scalar(Scalar::Str(string)) => {
            let copy = heap.str(string).to_owned();
            heap.alloc_str(copy)?.into()
        }
        Value::Scalar(Scalar::Array(array)) => heap.copy_array(array)?.into(),
        Value::Vector(vector) => {
            let copy = heap[vector].clone();
            Value::Vector(heap.alloc(copy)?)
        }
        Value::Stack(stack) => {
            let copy: ObjStack = heap[stack].clone();
            Value::Stack(heap.alloc(copy)?)
        }
        Value::Table(table) => {
            let copy = heap[table].clone();
            heap.alloc(copy)?.into()
        }
        _ => return Err(unsupported(heap, "copy", value)),
    })
}

/// The element at `cursor` while iterating over `container`, or `null` once
/// the cursor runs past the end.
pub fn each(heap: &Heap, container: Value, cursor: usize) -> Result<Value> {
    let element = match container {
        Value::Scalar(Scalar::Str(string)) => match heap.str(string).as_bytes().get(cursor) {
            Some(&byte) => Some(Value::Scalar(Scalar::Char(ascii(cursor, byte)?))),
            None => None,
        },
        Value::Scalar(Scalar::Array(array)) => heap.array_get(array, cursor).map(Value::Scalar),
        Value::Vector(vector) => heap[vector].get(cursor).map(Value::Scalar),
        Value::Stack(stack) => heap[stack].get(cursor),
        _ => return Err(unsupported(heap, "iteration", container)),
    };
    Ok(element.unwrap_or(Value::NULL))
}

/// Builds a table key from an index value.
pub fn key(heap: &Heap, value: Value) -> Result<Key> {
    match value.as_scalar() {
        Some(scalar) => Key::new(heap, scalar),
        None => Err(TypeError::Unhashable { type_: value.type_name(heap).to_string() }.into()),
    }
}

/// Converts `index` to a position below `limit`.
fn position(heap: &Heap, container: Value, index: Value, limit: usize) -> Result<usize> {
    let Some(idx) = index.as_scalar().and_then(Scalar::integral) else {
        return Err(IndexError::InvalidIndexType { type_: index.type_name(heap).to_string() }.into());
    };
    match usize::try_from(idx) {
        Ok(position) if position < limit => Ok(position),
        _ => Err(IndexError::OutOfBounds {
            type_: container.type_name(heap).to_string(),
            index: idx,
            len: len(heap, container).unwrap_or(limit),
        }
        .into()),
    }
}

fn ascii(index: usize, byte: u8) -> Result<u8> {
    if byte.is_ascii() {
        Ok(byte)
    } else {
        Err(TypeError::NotAscii { index, byte }.into())
    }
}

fn grown(heap: &mut Heap, container: Value) -> Result<()> {
    match container.as_object() {
        Some(id) => heap.resize(id),
        None => Ok(()),
    }
}

fn element_mismatch(heap: &Heap, container: Value, value: Value) -> Error {
    TypeError::ElementMismatch {
        container: container.type_name(heap).to_string(),
        type_: value.type_name(heap).to_string(),
    }
    .into()
}

fn unsupported(heap: &Heap, op: &str, value: Value) -> Error {
    TypeError::Unsupported { op: op.to_string(), type_: value.type_name(heap).to_string() }.into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::object::{ArrayKind, Vector};
    use crate::table::Table;

    fn int(i: i32) -> Value {
        Value::from(i)
    }

    fn ints(heap: &mut Heap, capacity: usize, values: &[i32]) -> Value {
        let array = heap.alloc_array(ArrayKind::Ints, capacity).unwrap();
        for &value in values {
            heap.array_push(array, Scalar::Int(value)).unwrap();
        }
        array.into()
    }

    fn chars(heap: &Heap, container: Value) -> String {
        (0..)
            .map(|cursor| each(heap, container, cursor).unwrap())
            .take_while(|value| !value.is_null())
            .map(|value| value.display(heap).to_string())
            .collect()
    }

    #[test]
    fn array_get_checks_bounds() {
        let mut heap = Heap::default();
        let array = ints(&mut heap, 3, &[10, 20, 30]);

        assert_eq!(get_index(&heap, array, int(1)).unwrap(), int(20));
        assert_eq!(
            get_index(&heap, array, int(3)),
            Err(IndexError::OutOfBounds { type_: "ints".to_string(), index: 3, len: 3 }.into())
        );
        assert_eq!(
            get_index(&heap, array, int(-1)),
            Err(IndexError::OutOfBounds { type_: "ints".to_string(), index: -1, len: 3 }.into())
        );
        assert_eq!(
            get_index(&heap, array, Value::from(1.0)),
            Err(IndexError::InvalidIndexType { type_: "double".to_string() }.into())
        );
    }

    #[test]
    fn array_set_extends_and_coerces() {
        let mut heap = Heap::default();
        let array = ints(&mut heap, 4, &[1]);

        set_index(&mut heap, array, int(3), int(4)).unwrap();
        assert_eq!(len(&heap, array).unwrap(), 4);
        assert_eq!(get_index(&heap, array, int(2)).unwrap(), int(0));
        assert_eq!(
            set_index(&mut heap, array, int(4), int(5)),
            Err(IndexError::OutOfBounds { type_: "ints".to_string(), index: 4, len: 4 }.into())
        );
        assert_eq!(
            set_index(&mut heap, array, int(0), Value::from(1.5)),
            Err(TypeError::ElementMismatch { container: "ints".to_string(), type_: "double".to_string() }
                .into())
        );
    }

    #[test]
    fn string_index_yields_char() {
        let mut heap = Heap::default();
        let string = Value::from(heap.alloc_str("cart").unwrap());

        assert_eq!(get_index(&heap, string, int(1)).unwrap(), Value::Scalar(Scalar::Char(b'a')));
        assert_eq!(len(&heap, string).unwrap(), 4);
        assert_eq!(
            set_index(&mut heap, string, int(0), int(1)),
            Err(TypeError::ElementMismatch { container: "str".to_string(), type_: "int".to_string() }.into())
        );
    }

    #[test]
    fn string_stores_write_chars() {
        let mut heap = Heap::default();
        let gc = heap.alloc_str("cart").unwrap();
        let string = Value::from(gc);
        let ch = |c: u8| Value::Scalar(Scalar::Char(c));

        set_index(&mut heap, string, int(0), ch(b'p')).unwrap();
        set_index(&mut heap, string, int(4), ch(b's')).unwrap();
        assert_eq!(heap.str(gc), "parts");
        assert_eq!(heap[gc].hash, crate::value::hash_str("parts"));
        assert_eq!(
            set_index(&mut heap, string, int(8), ch(b'!')),
            Err(IndexError::OutOfBounds { type_: "str".to_string(), index: 8, len: 5 }.into())
        );
        assert_eq!(
            set_index(&mut heap, string, int(1), ch(0xE9)),
            Err(TypeError::NotAscii { index: 1, byte: 0xE9 }.into())
        );
    }

    #[test]
    fn non_ascii_bytes_are_not_chars() {
        let mut heap = Heap::default();
        let gc = heap.alloc_str("né").unwrap();
        let string = Value::from(gc);

        assert_eq!(get_index(&heap, string, int(0)).unwrap(), Value::Scalar(Scalar::Char(b'n')));
        assert_eq!(
            get_index(&heap, string, int(1)),
            Err(TypeError::NotAscii { index: 1, byte: 0xC3 }.into())
        );
        assert_eq!(
            set_index(&mut heap, string, int(2), Value::Scalar(Scalar::Char(b'e'))),
            Err(TypeError::NotAscii { index: 2, byte: 0xA9 }.into())
        );
        assert_eq!(heap.str(gc), "né");
    }

    #[test]
    fn each_walks_sequences() {
        let mut heap = Heap::default();
        let array = ints(&mut heap, 2, &[4, 5]);
        let string = Value::from(heap.alloc_str("ab").unwrap());
        let stack = Value::Stack(heap.alloc([int(1), Value::TRUE].into_iter().collect::<ObjStack>()).unwrap());
        let table = Value::Table(heap.alloc(Table::default()).unwrap());

        assert_eq!(chars(&heap, array), "45");
        assert_eq!(chars(&heap, string), "ab");
        assert_eq!(chars(&heap, stack), "1true");
        assert_eq!(each(&heap, array, 9).unwrap(), Value::NULL);
        assert_eq!(
            each(&heap, table, 0),
            Err(TypeError::Unsupported { op: "iteration".to_string(), type_: "table".to_string() }.into())
        );
    }

    #[test]
    fn table_index_by_scalar() {
        let mut heap = Heap::default();
        let table = Value::Table(heap.alloc(Table::default()).unwrap());
        let name = Value::from(heap.alloc_str("name").unwrap());

        set_index(&mut heap, table, name, int(7)).unwrap();
        assert_eq!(get_index(&heap, table, name).unwrap(), int(7));
        assert_eq!(get_index(&heap, table, int(1)).unwrap(), Value::NULL);
        assert_eq!(remove(&mut heap, table, name).unwrap(), int(7));
        assert_eq!(len(&heap, table).unwrap(), 0);
        assert!(get_index(&heap, table, table).is_err());
    }

    #[test]
    fn push_and_pop() {
        let mut heap = Heap::default();
        let stack = Value::Stack(heap.alloc(ObjStack::new()).unwrap());
        let vector = Value::Vector(heap.alloc(Vector::new()).unwrap());

        push(&mut heap, stack, stack).unwrap();
        push(&mut heap, vector, int(1)).unwrap();
        assert!(push(&mut heap, vector, stack).is_err());

        assert_eq!(pop(&mut heap, stack).unwrap(), stack);
        assert_eq!(pop(&mut heap, vector).unwrap(), int(1));
        assert_eq!(
            pop(&mut heap, vector),
            Err(IndexError::PopFromEmpty { type_: "vector".to_string() }.into())
        );
    }

    #[test]
    fn copy_is_shallow_and_distinct() {
        let mut heap = Heap::default();
        let array = ints(&mut heap, 2, &[1, 2]);
        let copy = copy(&mut heap, array).unwrap();

        assert_ne!(copy, array);
        set_index(&mut heap, copy, int(0), int(9)).unwrap();
        assert_eq!(get_index(&heap, array, int(0)).unwrap(), int(1));
        assert_eq!(get_index(&heap, copy, int(0)).unwrap(), int(9));
    }
}
