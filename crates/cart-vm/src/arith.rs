//! Polymorphic arithmetic and comparison over [`Value`]s.
//!
//! Integral kinds (`int`, `long`, `char`, `byte`, `size`) combine in 64 bits
//! and narrow back to `int` whenever the result fits. A `double` on either
//! side makes the result a `double`. Division always produces a `double`.

use std::cmp::Ordering;
use std::mem;

use cart_common::error::{Error, OverflowError, Result, TypeError, ZeroDivisionError};

use crate::gc::Heap;
use crate::value::{char_of, Scalar, Value};

/// Result of an operation that may need a fresh string.
#[derive(Clone, Debug, PartialEq)]
pub enum Computed {
    Scalar(Scalar),
    String(String),
}

#[derive(Clone, Copy, Debug)]
enum Number {
    Integral(i64),
    Double(f64),
}

impl Number {
    fn of(value: Value) -> Option<Self> {
        match value.as_scalar()? {
            Scalar::Double(d) => Some(Number::Double(d)),
            scalar => scalar.integral().map(Number::Integral),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Number::Integral(i) => i as f64,
            Number::Double(d) => d,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Integral(i) => i == 0,
            Number::Double(d) => d == 0.0,
        }
    }
}

/// `+`: numeric addition, or concatenation when either side is a string and
/// the other side has a textual form.
pub fn add(heap: &Heap, a: Value, b: Value) -> Result<Computed> {
    if let (Some(a_scalar), Some(b_scalar)) = (a.as_scalar(), b.as_scalar()) {
        if matches!(a_scalar, Scalar::Str(_)) || matches!(b_scalar, Scalar::Str(_)) {
            return match (text(heap, a_scalar), text(heap, b_scalar)) {
                (Some(lhs), Some(rhs)) => Ok(Computed::String(lhs + &rhs)),
                _ => Err(unsupported(heap, "+", a, b)),
            };
        }
    }
    binary(heap, "+", a, b, i64::checked_add, |x, y| x + y).map(Computed::Scalar)
}

pub fn sub(heap: &Heap, a: Value, b: Value) -> Result<Scalar> {
    binary(heap, "-", a, b, i64::checked_sub, |x, y| x - y)
}

pub fn mul(heap: &Heap, a: Value, b: Value) -> Result<Scalar> {
    binary(heap, "*", a, b, i64::checked_mul, |x, y| x * y)
}

pub fn div(heap: &Heap, a: Value, b: Value) -> Result<Scalar> {
    match (Number::of(a), Number::of(b)) {
        (Some(_), Some(y)) if y.is_zero() => {
            Err(ZeroDivisionError::DivideByZero { op: "division".to_string() }.into())
        }
        (Some(x), Some(y)) => Ok(Scalar::Double(x.to_f64() / y.to_f64())),
        _ => Err(unsupported(heap, "/", a, b)),
    }
}

pub fn rem(heap: &Heap, a: Value, b: Value) -> Result<Scalar> {
    match (Number::of(a), Number::of(b)) {
        (Some(Number::Integral(_)), Some(Number::Integral(0))) => {
            Err(ZeroDivisionError::DivideByZero { op: "modulo".to_string() }.into())
        }
        (Some(Number::Integral(x)), Some(Number::Integral(y))) => {
            x.checked_rem(y).map(Scalar::num).ok_or_else(|| out_of_range("%"))
        }
        _ => Err(unsupported(heap, "%", a, b)),
    }
}

/// Adds `delta` to a numeric value (`++` and `--`).
pub fn step(heap: &Heap, a: Value, delta: i32) -> Result<Scalar> {
    let op = if delta < 0 { "--" } else { "++" };
    match Number::of(a) {
        Some(Number::Integral(x)) => {
            x.checked_add(delta.into()).map(Scalar::num).ok_or_else(|| out_of_range(op))
        }
        Some(Number::Double(x)) => Ok(Scalar::Double(x + f64::from(delta))),
        None => Err(unsupported_prefix(heap, op, a)),
    }
}

/// Unary `-`. Booleans are inverted and `null` negates to `true`.
pub fn negate(heap: &Heap, a: Value) -> Result<Scalar> {
    match (a.as_scalar(), Number::of(a)) {
        (Some(Scalar::Bool(b)), _) => Ok(Scalar::Bool(!b)),
        (Some(Scalar::Null), _) => Ok(Scalar::Bool(true)),
        (_, Some(Number::Double(x))) => Ok(Scalar::Double(-x)),
        (_, Some(Number::Integral(x))) => x.checked_neg().map(Scalar::num).ok_or_else(|| out_of_range("-")),
        _ => Err(unsupported_prefix(heap, "-", a)),
    }
}

/// Loose equality: numbers compare by value across kinds, strings by
/// content, a string and an integer by the integer's numeral, heap objects
/// by identity.
pub fn equal(heap: &Heap, a: Value, b: Value) -> bool {
    let (Value::Scalar(x), Value::Scalar(y)) = (a, b) else {
        return a == b;
    };
    match (x, y) {
        (Scalar::Str(s), Scalar::Str(t)) => heap.str(s) == heap.str(t),
        (Scalar::Str(s), n @ (Scalar::Int(_) | Scalar::Long(_) | Scalar::Size(_) | Scalar::Byte(_)))
        | (n @ (Scalar::Int(_) | Scalar::Long(_) | Scalar::Size(_) | Scalar::Byte(_)), Scalar::Str(s)) => {
            n.integral().map_or(false, |n| heap.str(s) == n.to_string())
        }
        (Scalar::Null, Scalar::Null) => true,
        (Scalar::Bool(p), Scalar::Bool(q)) => p == q,
        (Scalar::Array(p), Scalar::Array(q)) => p == q,
        _ => match (Number::of(a), Number::of(b)) {
            (Some(Number::Integral(m)), Some(Number::Integral(n))) => m == n,
            (Some(m), Some(n)) => m.to_f64() == n.to_f64(),
            _ => false,
        },
    }
}

/// Strict equality: both sides must have the same kind.
pub fn strict_equal(heap: &Heap, a: Value, b: Value) -> bool {
    let same_kind = match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => mem::discriminant(&x) == mem::discriminant(&y),
        _ => mem::discriminant(&a) == mem::discriminant(&b),
    };
    same_kind && equal(heap, a, b)
}

/// Ordering of two numbers or two strings. `None` when either number is NaN.
pub fn compare(heap: &Heap, op: &str, a: Value, b: Value) -> Result<Option<Ordering>> {
    if let (Some(Scalar::Str(s)), Some(Scalar::Str(t))) = (a.as_scalar(), b.as_scalar()) {
        return Ok(Some(heap.str(s).cmp(heap.str(t))));
    }
    match (Number::of(a), Number::of(b)) {
        (Some(Number::Integral(m)), Some(Number::Integral(n))) => Ok(Some(m.cmp(&n))),
        (Some(m), Some(n)) => Ok(m.to_f64().partial_cmp(&n.to_f64())),
        _ => Err(unsupported(heap, op, a, b)),
    }
}

fn binary(
    heap: &Heap,
    op: &str,
    a: Value,
    b: Value,
    integral: fn(i64, i64) -> Option<i64>,
    double: fn(f64, f64) -> f64,
) -> Result<Scalar> {
    match (Number::of(a), Number::of(b)) {
        (Some(Number::Integral(x)), Some(Number::Integral(y))) => {
            integral(x, y).map(Scalar::num).ok_or_else(|| out_of_range(op))
        }
        (Some(x), Some(y)) => Ok(Scalar::Double(double(x.to_f64(), y.to_f64()))),
        _ => Err(unsupported(heap, op, a, b)),
    }
}

/// Textual form used when concatenating with a string.
fn text(heap: &Heap, scalar: Scalar) -> Option<String> {
    match scalar {
        Scalar::Str(string) => Some(heap.str(string).to_string()),
        Scalar::Char(c) => Some(char_of(c).to_string()),
        Scalar::Double(d) => Some(d.to_string()),
        _ => scalar.integral().map(|i| i.to_string()),
    }
}

fn out_of_range(op: &str) -> Error {
    OverflowError::NumericRange { op: op.to_string() }.into()
}

fn unsupported(heap: &Heap, op: &str, a: Value, b: Value) -> Error {
    TypeError::UnsupportedOperandInfix {
        op: op.to_string(),
        lt_type: a.type_name(heap).to_string(),
        rt_type: b.type_name(heap).to_string(),
    }
    .into()
}

fn unsupported_prefix(heap: &Heap, op: &str, a: Value) -> Error {
    TypeError::UnsupportedOperandPrefix { op: op.to_string(), rt_type: a.type_name(heap).to_string() }
        .into()
}
