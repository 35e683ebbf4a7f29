use std::fmt::{self, Display, Formatter};
use std::mem;

use cart_common::error::Result;

use crate::allocator::ALIGN;
use crate::chunk::Chunk;
use crate::gc::{Gc, Heap, ObjectId};
use crate::stack::{grow_capacity, Stack};
use crate::table::Table;
use crate::value::{hash_bytes, Scalar, Value};

pub type ObjStack = Stack<Value>;
pub type Vector = Stack<Scalar>;

/// Signature of a built-in function. Natives may allocate on the heap but
/// never trigger a collection.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value>;

/// Every kind of object the collector manages.
#[remain::sorted]
#[derive(Debug)]
pub enum Object {
    Array(Array),
    Class(Class),
    Closure(Closure),
    Function(Function),
    Instance(Instance),
    Native(Native),
    Stack(ObjStack),
    String(ObjString),
    Table(Table),
    Upvalue(Upvalue),
    Vector(Vector),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Array(array) => array.kind.name(),
            Object::Class(_) => "class",
            Object::Closure(_) => "function",
            Object::Function(_) => "function_impl",
            Object::Instance(_) => "instance",
            Object::Native(_) => "native",
            Object::Stack(_) => "stack",
            Object::String(_) => "str",
            Object::Table(_) => "table",
            Object::Upvalue(_) => "upvalue",
            Object::Vector(_) => "vector",
        }
    }

    /// Bytes accounted to this object in the allocator.
    pub fn size(&self) -> usize {
        mem::size_of::<Object>()
            + match self {
                Object::Array(array) => array.capacity * array.kind.width(),
                Object::Class(class) => class.methods.footprint(),
                Object::Closure(closure) => closure.upvalues.capacity() * mem::size_of::<Gc<Upvalue>>(),
                Object::Function(function) => function.chunk.footprint(),
                Object::Instance(instance) => instance.fields.footprint(),
                Object::Native(_) | Object::Upvalue(_) => 0,
                Object::Stack(stack) => stack.footprint(),
                Object::String(string) => string.capacity,
                Object::Table(table) => table.footprint(),
                Object::Vector(vector) => vector.footprint(),
            }
    }

    /// Objects that can never reference another object are blackened
    /// immediately instead of going through the gray stack.
    pub fn is_leaf(&self) -> bool {
        match self {
            Object::Array(array) => array.kind != ArrayKind::Strings,
            Object::Native(_) | Object::String(_) => true,
            _ => false,
        }
    }

    /// Appends every object directly referenced by `self` to `out`. `block`
    /// holds the object's block.
    pub fn children(&self, block: &[u8], out: &mut Vec<ObjectId>) {
        let table = |out: &mut Vec<ObjectId>, table: &Table| {
            for (key, value) in table.iter() {
                out.extend(key.scalar.as_object());
                out.extend(value.as_object());
            }
        };

        match self {
            Object::Array(array) => out.extend(array.elements(block).filter_map(Scalar::as_object)),
            Object::Class(class) => {
                out.push(class.name.id());
                out.extend(class.init.map(Gc::id));
                table(out, &class.methods);
            }
            Object::Closure(closure) => {
                out.push(closure.function.id());
                out.extend(closure.upvalues.iter().map(|upvalue| upvalue.id()));
            }
            Object::Function(function) => {
                out.extend(function.chunk.constants.iter().filter_map(|value| value.as_object()));
            }
            Object::Instance(instance) => {
                out.push(instance.class.id());
                table(out, &instance.fields);
            }
            Object::Native(_) | Object::String(_) => {}
            Object::Stack(stack) => out.extend(stack.iter().filter_map(|value| value.as_object())),
            Object::Table(t) => table(out, t),
            Object::Upvalue(upvalue) => {
                if let Upvalue::Closed(value) = upvalue {
                    out.extend(value.as_object());
                }
            }
            Object::Vector(vector) => out.extend(vector.iter().filter_map(|scalar| scalar.as_object())),
        }
    }
}

/// Conversion between a concrete object type and [`Object`].
pub trait HeapObject: Sized {
    fn into_object(self) -> Object;
    fn from_object(object: &Object) -> Option<&Self>;
    fn from_object_mut(object: &mut Object) -> Option<&mut Self>;
}

macro_rules! impl_heap_object {
    ($variant:ident, $type_:ty) => {
        impl HeapObject for $type_ {
            fn into_object(self) -> Object {
                Object::$variant(self)
            }

            fn from_object(object: &Object) -> Option<&Self> {
                match object {
                    Object::$variant(object) => Some(object),
                    _ => None,
                }
            }

            fn from_object_mut(object: &mut Object) -> Option<&mut Self> {
                match object {
                    Object::$variant(object) => Some(object),
                    _ => None,
                }
            }
        }
    };
}

impl_heap_object!(Array, Array);
impl_heap_object!(Class, Class);
impl_heap_object!(Closure, Closure);
impl_heap_object!(Function, Function);
impl_heap_object!(Instance, Instance);
impl_heap_object!(Native, Native);
impl_heap_object!(Stack, ObjStack);
impl_heap_object!(String, ObjString);
impl_heap_object!(Table, Table);
impl_heap_object!(Upvalue, Upvalue);
impl_heap_object!(Vector, Vector);

/// A string. Its bytes live at the start of the object's block, which has
/// room for `capacity` of them. The bytes are always valid UTF-8 because
/// stores only ever write ASCII over ASCII.
#[derive(Clone, Copy, Debug)]
pub struct ObjString {
    len: usize,
    capacity: usize,
    pub hash: u64,
}

impl ObjString {
    fn new(value: &str) -> Self {
        let len = value.len();
        Self { len, capacity: (len + ALIGN - 1) & !(ALIGN - 1), hash: hash_bytes(value.as_bytes()) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Element kind of a homogeneous array.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrayKind {
    Bools,
    Bytes,
    Doubles,
    Ints,
    Longs,
    Strings,
}

impl ArrayKind {
    /// Decodes the operand of `op::ARRAY`.
    pub fn from_word(word: u16) -> Option<Self> {
        Some(match word {
            0 => ArrayKind::Ints,
            1 => ArrayKind::Longs,
            2 => ArrayKind::Doubles,
            3 => ArrayKind::Bools,
            4 => ArrayKind::Strings,
            5 => ArrayKind::Bytes,
            _ => return None,
        })
    }

    /// Bytes taken by one element.
    pub fn width(self) -> usize {
        match self {
            ArrayKind::Bools | ArrayKind::Bytes => 1,
            ArrayKind::Ints => 4,
            ArrayKind::Doubles | ArrayKind::Longs | ArrayKind::Strings => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArrayKind::Bools => "bools",
            ArrayKind::Bytes => "bytes",
            ArrayKind::Doubles => "doubles",
            ArrayKind::Ints => "ints",
            ArrayKind::Longs => "longs",
            ArrayKind::Strings => "strings",
        }
    }

    /// Value of a slot that was skipped over by an extending store.
    pub fn zero(self) -> Scalar {
        match self {
            ArrayKind::Bools => Scalar::Bool(false),
            ArrayKind::Bytes => Scalar::Byte(0),
            ArrayKind::Doubles => Scalar::Double(0.0),
            ArrayKind::Ints => Scalar::Int(0),
            ArrayKind::Longs => Scalar::Long(0),
            ArrayKind::Strings => Scalar::Null,
        }
    }

    /// Converts `scalar` to this element kind, widening where no precision
    /// is lost.
    pub fn coerce(self, scalar: Scalar) -> Option<Scalar> {
        match (self, scalar) {
            (ArrayKind::Bools, Scalar::Bool(_))
            | (ArrayKind::Bytes, Scalar::Byte(_))
            | (ArrayKind::Doubles, Scalar::Double(_))
            | (ArrayKind::Ints, Scalar::Int(_))
            | (ArrayKind::Longs, Scalar::Long(_))
            | (ArrayKind::Strings, Scalar::Str(_) | Scalar::Null) => Some(scalar),
            (ArrayKind::Bytes, Scalar::Int(i)) => u8::try_from(i).ok().map(Scalar::Byte),
            (ArrayKind::Doubles, Scalar::Int(i)) => Some(Scalar::Double(i.into())),
            (ArrayKind::Longs, Scalar::Int(i)) => Some(Scalar::Long(i.into())),
            _ => None,
        }
    }

    /// Writes a scalar already coerced to this kind into `out`, which is
    /// `self.width()` bytes long. A null string is stored as all ones.
    fn encode(self, scalar: Scalar, out: &mut [u8]) {
        match scalar {
            Scalar::Bool(b) => out[0] = u8::from(b),
            Scalar::Byte(b) => out[0] = b,
            Scalar::Int(i) => out.copy_from_slice(&i.to_ne_bytes()),
            Scalar::Long(l) => out.copy_from_slice(&l.to_ne_bytes()),
            Scalar::Double(d) => out.copy_from_slice(&d.to_ne_bytes()),
            Scalar::Str(string) => out.copy_from_slice(&string.id().to_bits().to_ne_bytes()),
            Scalar::Null => out.copy_from_slice(&u64::MAX.to_ne_bytes()),
            _ => unreachable!("{scalar:?} is not an element of {}", self.name()),
        }
    }

    fn decode(self, bytes: &[u8]) -> Scalar {
        let mut word = [0; 8];
        match self {
            ArrayKind::Bools => Scalar::Bool(bytes[0] != 0),
            ArrayKind::Bytes => Scalar::Byte(bytes[0]),
            ArrayKind::Ints => {
                let mut int = [0; 4];
                int.copy_from_slice(bytes);
                Scalar::Int(i32::from_ne_bytes(int))
            }
            ArrayKind::Longs => {
                word.copy_from_slice(bytes);
                Scalar::Long(i64::from_ne_bytes(word))
            }
            ArrayKind::Doubles => {
                word.copy_from_slice(bytes);
                Scalar::Double(f64::from_ne_bytes(word))
            }
            ArrayKind::Strings => {
                word.copy_from_slice(bytes);
                match u64::from_ne_bytes(word) {
                    u64::MAX => Scalar::Null,
                    bits => Scalar::Str(Gc::new(ObjectId::from_bits(bits))),
                }
            }
        }
    }
}

/// Homogeneous array of scalars, packed `kind.width()` bytes apiece at the
/// start of the object's block. Built with [`Heap::alloc_array`].
#[derive(Clone, Copy, Debug)]
pub struct Array {
    pub kind: ArrayKind,
    len: usize,
    capacity: usize,
}

impl Array {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decodes the elements stored in `block`.
    pub fn elements<'a>(&self, block: &'a [u8]) -> impl Iterator<Item = Scalar> + 'a {
        let kind = self.kind;
        block[..self.len * kind.width()].chunks_exact(kind.width()).map(move |bytes| kind.decode(bytes))
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub arity: u8,
    pub upvalue_count: u16,
    pub chunk: Chunk,
}

impl Function {
    /// Creates a function with an empty chunk. The top-level script has an
    /// empty name.
    pub fn new(name: impl Into<String>, arity: u8) -> Self {
        Self { name: name.into(), arity, upvalue_count: 0, chunk: Chunk::default() }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<script>")
        } else {
            write!(f, "<function {}>", self.name)
        }
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: Gc<Function>,
    pub upvalues: Vec<Gc<Upvalue>>,
}

impl Closure {
    pub fn new(function: Gc<Function>, upvalues: Vec<Gc<Upvalue>>) -> Self {
        Self { function, upvalues }
    }
}

/// A captured variable. Open upvalues refer to a live operand stack slot;
/// closing copies the slot's value into the upvalue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct Class {
    pub name: Gc<ObjString>,
    pub init: Option<Gc<Closure>>,
    pub methods: Table,
}

impl Class {
    pub fn new(name: Gc<ObjString>) -> Self {
        Self { name, init: None, methods: Table::default() }
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Gc<Class>,
    pub fields: Table,
}

impl Instance {
    pub fn new(class: Gc<Class>) -> Self {
        Self { class, fields: Table::default() }
    }
}

#[derive(Debug)]
pub struct Native {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

/// Strings and arrays, whose contents live in their blocks.
impl Heap {
    pub fn alloc_str(&mut self, value: impl AsRef<str>) -> Result<Gc<ObjString>> {
        self.insert_str(value.as_ref(), false)
    }

    /// Allocates a string that no sweep will ever free, such as a name
    /// borrowed from the program text.
    pub fn alloc_str_pinned(&mut self, value: &str) -> Result<Gc<ObjString>> {
        self.insert_str(value, true)
    }

    fn insert_str(&mut self, value: &str, is_pinned: bool) -> Result<Gc<ObjString>> {
        let id = self.insert(ObjString::new(value).into_object(), is_pinned)?;
        if let Some(block) = self.block_bytes_mut(id) {
            block[..value.len()].copy_from_slice(value.as_bytes());
        }
        Ok(Gc::new(id))
    }

    pub fn str(&self, string: Gc<ObjString>) -> &str {
        let len = self[string].len;
        let bytes = self.block_bytes(string.id()).map_or(&[][..], |block| &block[..len]);
        match std::str::from_utf8(bytes) {
            Ok(string) => string,
            Err(e) => unreachable!("string holds invalid UTF-8: {e}"),
        }
    }

    /// Stores the ASCII byte `byte` at `index`, which must not split a
    /// multi-byte character. Storing past the length but within the capacity
    /// extends the string, padding with NUL. Returns `false` when `index` is
    /// outside the capacity.
    pub fn set_char(&mut self, string: Gc<ObjString>, index: usize, byte: u8) -> bool {
        debug_assert!(byte.is_ascii(), "non-ASCII byte {byte:#04x} stored in a string");
        let ObjString { len, capacity, .. } = self[string];
        if index >= capacity {
            return false;
        }
        let len = len.max(index + 1);
        let Some(block) = self.block_bytes_mut(string.id()) else { return false };
        block[index] = byte;
        let hash = hash_bytes(&block[..len]);

        let string = &mut self[string];
        string.len = len;
        string.hash = hash;
        true
    }

    /// Allocates an empty array with room for `capacity` elements.
    pub fn alloc_array(&mut self, kind: ArrayKind, capacity: usize) -> Result<Gc<Array>> {
        self.alloc(Array { kind, len: 0, capacity })
    }

    pub fn array_get(&self, array: Gc<Array>, index: usize) -> Option<Scalar> {
        let Array { kind, len, .. } = self[array];
        if index >= len {
            return None;
        }
        let width = kind.width();
        let block = self.block_bytes(array.id())?;
        Some(kind.decode(&block[index * width..(index + 1) * width]))
    }

    /// Stores `scalar`, already coerced to the array's kind, at `index`.
    /// Skipped slots are filled with the kind's zero. Returns `false` when
    /// `index` is outside the capacity.
    pub fn array_set(&mut self, array: Gc<Array>, index: usize, scalar: Scalar) -> bool {
        let Array { kind, len, capacity } = self[array];
        if index >= capacity {
            return false;
        }
        for idx in len..index {
            self.write_element(array, idx, kind.zero());
        }
        self.write_element(array, index, scalar);
        self[array].len = len.max(index + 1);
        true
    }

    /// Appends `scalar`, doubling the capacity when the array is full.
    pub fn array_push(&mut self, array: Gc<Array>, scalar: Scalar) -> Result<()> {
        let Array { len, capacity, .. } = self[array];
        if len == capacity {
            self[array].capacity = grow_capacity(capacity);
            if let Err(e) = self.resize(array.id()) {
                self[array].capacity = capacity;
                return Err(e);
            }
        }
        self.array_set(array, len, scalar);
        Ok(())
    }

    pub fn array_pop(&mut self, array: Gc<Array>) -> Option<Scalar> {
        let len = self[array].len.checked_sub(1)?;
        let scalar = self.array_get(array, len)?;
        self[array].len = len;
        Some(scalar)
    }

    pub fn array_elements(&self, array: Gc<Array>) -> impl Iterator<Item = Scalar> + '_ {
        let block = self.block_bytes(array.id()).unwrap_or_default();
        self[array].elements(block)
    }

    /// Allocates an array with the same kind, capacity and elements.
    pub fn copy_array(&mut self, array: Gc<Array>) -> Result<Gc<Array>> {
        let source = self[array];
        let copy = self.alloc(source)?;
        let used = source.len * source.kind.width();
        let bytes = self.block_bytes(array.id()).map(|block| block[..used].to_vec()).unwrap_or_default();
        if let Some(block) = self.block_bytes_mut(copy.id()) {
            block[..used].copy_from_slice(&bytes);
        }
        Ok(copy)
    }

    fn write_element(&mut self, array: Gc<Array>, index: usize, scalar: Scalar) {
        let kind = self[array].kind;
        let width = kind.width();
        if let Some(block) = self.block_bytes_mut(array.id()) {
            kind.encode(scalar, &mut block[index * width..(index + 1) * width]);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn array_set_fills_gap_with_zero() {
        let mut heap = Heap::default();
        let array = heap.alloc_array(ArrayKind::Ints, 4).unwrap();
        heap.array_push(array, Scalar::Int(1)).unwrap();

        assert!(heap.array_set(array, 3, Scalar::Int(4)));
        assert_eq!(
            heap.array_elements(array).collect::<Vec<_>>(),
            [Scalar::Int(1), Scalar::Int(0), Scalar::Int(0), Scalar::Int(4)]
        );
        assert!(!heap.array_set(array, 4, Scalar::Int(5)));
        assert_eq!(heap[array].len(), 4);
    }

    #[test]
    fn array_elements_live_in_the_block() {
        let mut heap = Heap::default();
        let array = heap.alloc_array(ArrayKind::Longs, 2).unwrap();
        heap.array_push(array, Scalar::Long(-2)).unwrap();

        let block = heap.block_bytes(array.id()).unwrap();
        assert_eq!(&block[..8], &(-2_i64).to_ne_bytes());
    }

    #[test]
    fn array_push_grows_and_keeps_elements() {
        let mut heap = Heap::default();
        let array = heap.alloc_array(ArrayKind::Doubles, 1).unwrap();
        for i in 0..100 {
            heap.array_push(array, Scalar::Double(f64::from(i) / 2.0)).unwrap();
        }
        assert_eq!(heap[array].len(), 100);
        assert!(heap[array].capacity() >= 100);
        assert_eq!(heap.array_get(array, 99), Some(Scalar::Double(49.5)));
        assert_eq!(heap.array_pop(array), Some(Scalar::Double(49.5)));
        assert_eq!(heap.array_get(array, 99), None);
        assert!(heap.header(array.id()).unwrap().block.size() >= heap.object(array.id()).unwrap().size());
    }

    #[test]
    fn copied_arrays_are_independent() {
        let mut heap = Heap::default();
        let array = heap.alloc_array(ArrayKind::Bools, 3).unwrap();
        heap.array_push(array, Scalar::Bool(true)).unwrap();
        let copy = heap.copy_array(array).unwrap();

        assert!(heap.array_set(copy, 0, Scalar::Bool(false)));
        assert_eq!(heap.array_get(array, 0), Some(Scalar::Bool(true)));
        assert_eq!(heap.array_get(copy, 0), Some(Scalar::Bool(false)));
        assert_eq!(heap[copy].capacity(), 3);
    }

    #[test]
    fn string_contents_live_in_the_block() {
        let mut heap = Heap::default();
        let string = heap.alloc_str("cart").unwrap();
        assert_eq!(&heap.block_bytes(string.id()).unwrap()[..4], b"cart");
        assert_eq!(heap[string].capacity(), 8);
        assert_eq!(heap[string].hash, hash_bytes(b"cart"));
    }

    #[test]
    fn set_char_rewrites_and_rehashes() {
        let mut heap = Heap::default();
        let string = heap.alloc_str("cart").unwrap();

        assert!(heap.set_char(string, 0, b'd'));
        assert_eq!(heap.str(string), "dart");
        assert_eq!(heap[string].hash, hash_bytes(b"dart"));

        assert!(heap.set_char(string, 4, b's'));
        assert_eq!(heap.str(string), "darts");
        assert!(heap.set_char(string, 7, b'!'));
        assert_eq!(heap.str(string), "darts\0\0!");
        assert!(!heap.set_char(string, 8, b'?'));
        assert_eq!(heap[string].len(), 8);
    }

    #[test]
    fn coerce_widens_ints() {
        assert_eq!(ArrayKind::Longs.coerce(Scalar::Int(3)), Some(Scalar::Long(3)));
        assert_eq!(ArrayKind::Doubles.coerce(Scalar::Int(3)), Some(Scalar::Double(3.0)));
        assert_eq!(ArrayKind::Bytes.coerce(Scalar::Int(300)), None);
        assert_eq!(ArrayKind::Ints.coerce(Scalar::Long(3)), None);
        assert_eq!(ArrayKind::Strings.coerce(Scalar::Bool(true)), None);
    }
}
