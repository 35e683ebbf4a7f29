use std::fmt::{self, Display, Formatter};

use crate::gc::{Gc, Heap, ObjectId};
use crate::object::{Array, Class, Closure, Function, Instance, Native, ObjStack, ObjString, Vector};
use crate::table::Table;

const FNV_OFFSET: i64 = 2166136261;
const FNV_PRIME: i64 = 16777619;

/// Primitive value. Strings and arrays live on the heap, everything else is
/// stored inline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Scalar {
    Array(Gc<Array>),
    Bool(bool),
    Byte(u8),
    /// One ASCII byte. Indexing a string never yields anything else.
    Char(u8),
    Double(f64),
    Int(i32),
    Long(i64),
    #[default]
    Null,
    Size(usize),
    Str(Gc<ObjString>),
}

impl Scalar {
    /// Narrows an integral result to `Int` when it fits.
    pub fn num(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(int) => Scalar::Int(int),
            Err(_) => Scalar::Long(value),
        }
    }

    /// The value of an integral scalar, widened to 64 bits.
    pub fn integral(self) -> Option<i64> {
        match self {
            Scalar::Byte(b) | Scalar::Char(b) => Some(b.into()),
            Scalar::Int(i) => Some(i.into()),
            Scalar::Long(l) => Some(l),
            Scalar::Size(s) => i64::try_from(s).ok(),
            _ => None,
        }
    }

    pub fn as_object(self) -> Option<ObjectId> {
        match self {
            Scalar::Array(array) => Some(array.id()),
            Scalar::Str(string) => Some(string.id()),
            _ => None,
        }
    }

    pub fn type_name(self, heap: &Heap) -> &'static str {
        match self {
            Scalar::Array(array) => heap[array].kind.name(),
            Scalar::Bool(_) => "bool",
            Scalar::Byte(_) => "byte",
            Scalar::Char(_) => "char",
            Scalar::Double(_) => "double",
            Scalar::Int(_) => "int",
            Scalar::Long(_) => "long",
            Scalar::Null => "null",
            Scalar::Size(_) => "size",
            Scalar::Str(_) => "str",
        }
    }

    /// Hash used for table keys. Arrays cannot be hashed.
    pub fn hash(self, heap: &Heap) -> Option<u64> {
        let hash = match self {
            Scalar::Array(_) => return None,
            Scalar::Str(string) => return Some(heap[string].hash),
            Scalar::Null => 0,
            Scalar::Bool(b) => (FNV_OFFSET ^ i64::from(b)).wrapping_mul(16777669),
            Scalar::Int(i) => (FNV_OFFSET ^ i64::from(i)).wrapping_mul(16777669),
            Scalar::Double(d) => (FNV_OFFSET ^ d as i64).wrapping_mul(16777420),
            Scalar::Long(l) => (FNV_OFFSET ^ l).wrapping_mul(16776969),
            Scalar::Size(s) => (FNV_OFFSET ^ s as i64).wrapping_mul(16776969),
            Scalar::Byte(b) | Scalar::Char(b) => (FNV_OFFSET ^ i64::from(b)).wrapping_mul(16742069),
        };
        Some(hash as u64)
    }
}

/// FNV-1a over `bytes`, sign-extending each byte.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= i64::from(byte as i8);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as u64
}

pub fn hash_str(string: &str) -> u64 {
    hash_bytes(string.as_bytes())
}

/// The character a `Char` stands for. Bytes outside ASCII have no character
/// of their own and show as U+FFFD.
pub fn char_of(byte: u8) -> char {
    if byte.is_ascii() {
        byte as char
    } else {
        char::REPLACEMENT_CHARACTER
    }
}

/// Any value the interpreter can hold in a stack slot, a global, a field or a
/// container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Class(Gc<Class>),
    Closure(Gc<Closure>),
    Function(Gc<Function>),
    Instance(Gc<Instance>),
    Native(Gc<Native>),
    Scalar(Scalar),
    Stack(Gc<ObjStack>),
    Table(Gc<Table>),
    Vector(Gc<Vector>),
}

impl Value {
    pub const NULL: Self = Self::Scalar(Scalar::Null);
    pub const TRUE: Self = Self::Scalar(Scalar::Bool(true));
    pub const FALSE: Self = Self::Scalar(Scalar::Bool(false));

    /// Only `null` and `false` are falsey.
    pub fn to_bool(self) -> bool {
        !matches!(self, Value::Scalar(Scalar::Null | Scalar::Bool(false)))
    }

    pub fn is_null(self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    pub fn as_scalar(self) -> Option<Scalar> {
        match self {
            Value::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_object(self) -> Option<ObjectId> {
        match self {
            Value::Class(class) => Some(class.id()),
            Value::Closure(closure) => Some(closure.id()),
            Value::Function(function) => Some(function.id()),
            Value::Instance(instance) => Some(instance.id()),
            Value::Native(native) => Some(native.id()),
            Value::Scalar(scalar) => scalar.as_object(),
            Value::Stack(stack) => Some(stack.id()),
            Value::Table(table) => Some(table.id()),
            Value::Vector(vector) => Some(vector.id()),
        }
    }

    pub fn type_name(self, heap: &Heap) -> &'static str {
        match self {
            Value::Class(_) => "class",
            Value::Closure(_) => "function",
            Value::Function(_) => "function_impl",
            Value::Instance(_) => "instance",
            Value::Native(_) => "native",
            Value::Scalar(scalar) => scalar.type_name(heap),
            Value::Stack(_) => "stack",
            Value::Table(_) => "table",
            Value::Vector(_) => "vector",
        }
    }

    pub fn display(self, heap: &Heap) -> ValueDisplay<'_> {
        ValueDisplay { heap, value: self, depth: 0 }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

macro_rules! impl_from_scalar {
    ($variant:ident, $type_:ty) => {
        impl From<$type_> for Value {
            fn from(value: $type_) -> Self {
                Value::Scalar(Scalar::$variant(value))
            }
        }
    };
}

impl_from_scalar!(Array, Gc<Array>);
impl_from_scalar!(Bool, bool);
impl_from_scalar!(Double, f64);
impl_from_scalar!(Int, i32);
impl_from_scalar!(Long, i64);
impl_from_scalar!(Str, Gc<ObjString>);

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

macro_rules! impl_from_object {
    ($variant:ident, $type_:ty) => {
        impl From<Gc<$type_>> for Value {
            fn from(object: Gc<$type_>) -> Self {
                Value::$variant(object)
            }
        }
    };
}

impl_from_object!(Class, Class);
impl_from_object!(Closure, Closure);
impl_from_object!(Function, Function);
impl_from_object!(Instance, Instance);
impl_from_object!(Native, Native);
impl_from_object!(Stack, ObjStack);
impl_from_object!(Table, Table);
impl_from_object!(Vector, Vector);

/// Nested containers deeper than this print as an ellipsis, which also stops
/// self-referencing containers from recursing forever.
const DISPLAY_DEPTH_MAX: usize = 8;

pub struct ValueDisplay<'a> {
    heap: &'a Heap,
    value: Value,
    depth: usize,
}

impl ValueDisplay<'_> {
    fn nested(&self, value: Value) -> Self {
        ValueDisplay { heap: self.heap, value, depth: self.depth + 1 }
    }

    fn list(&self, f: &mut Formatter<'_>, values: impl Iterator<Item = Value>) -> fmt::Result {
        if self.depth >= DISPLAY_DEPTH_MAX {
            return write!(f, "[...]");
        }
        write!(f, "[")?;
        for (idx, value) in values.enumerate() {
            if idx != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.nested(value))?;
        }
        write!(f, "]")
    }
}

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let heap = self.heap;
        match self.value {
            Value::Class(class) => write!(f, "<class {}>", heap.str(heap[class].name)),
            Value::Closure(closure) => write!(f, "{}", heap[heap[closure].function]),
            Value::Function(function) => write!(f, "{}", heap[function]),
            Value::Instance(instance) => {
                write!(f, "<{} instance>", heap.str(heap[heap[instance].class].name))
            }
            Value::Native(native) => write!(f, "<native {}>", heap[native].name),
            Value::Scalar(scalar) => match scalar {
                Scalar::Array(array) => self.list(f, heap.array_elements(array).map(Value::Scalar)),
                Scalar::Bool(b) => write!(f, "{b}"),
                Scalar::Byte(b) => write!(f, "{b}"),
                Scalar::Char(c) => write!(f, "{}", char_of(c)),
                Scalar::Double(d) => write!(f, "{d}"),
                Scalar::Int(i) => write!(f, "{i}"),
                Scalar::Long(l) => write!(f, "{l}"),
                Scalar::Null => write!(f, "null"),
                Scalar::Size(s) => write!(f, "{s}"),
                Scalar::Str(string) => write!(f, "{}", heap.str(string)),
            },
            Value::Stack(stack) => self.list(f, heap[stack].iter().copied()),
            Value::Table(table) => {
                if self.depth >= DISPLAY_DEPTH_MAX {
                    return write!(f, "{{...}}");
                }
                write!(f, "{{")?;
                for (idx, (key, value)) in heap[table].iter().enumerate() {
                    if idx != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", self.nested(key.scalar.into()), self.nested(value))?;
                }
                write!(f, "}}")
            }
            Value::Vector(vector) => self.list(f, heap[vector].iter().map(|&scalar| Value::Scalar(scalar))),
        }
    }
}
