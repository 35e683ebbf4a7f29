//! Built-in functions registered in every new VM.

use cart_common::error::{Result, TypeError};

use crate::gc::Heap;
use crate::object::NativeFn;
use crate::util;
use crate::value::{Scalar, Value};

/// Name, arity and implementation of every built-in.
pub const BUILTINS: &[(&str, u8, NativeFn)] =
    &[("clock", 0, clock), ("prime", 1, prime), ("square", 1, square), ("strstr", 2, strstr)];

/// Seconds since the Unix epoch.
fn clock(_: &mut Heap, _: &[Value]) -> Result<Value> {
    Ok(util::now().into())
}

/// Square root of a number, always a `double`.
fn square(heap: &mut Heap, args: &[Value]) -> Result<Value> {
    let value = number(heap, "square", args[0])?;
    Ok(value.sqrt().into())
}

/// Whether an integer is prime, by trial division.
fn prime(heap: &mut Heap, args: &[Value]) -> Result<Value> {
    let Some(n) = args[0].as_scalar().and_then(Scalar::integral) else {
        return Err(argument_error(heap, "prime", args[0]));
    };
    if n < 2 {
        return Ok(Value::FALSE);
    }
    let mut divisor = 2;
    while divisor <= n / divisor {
        if n % divisor == 0 {
            return Ok(Value::FALSE);
        }
        divisor += 1;
    }
    Ok(Value::TRUE)
}

/// Position of the first occurrence of the second string in the first, or
/// `-1`.
fn strstr(heap: &mut Heap, args: &[Value]) -> Result<Value> {
    let (Some(Scalar::Str(haystack)), Some(Scalar::Str(needle))) = (args[0].as_scalar(), args[1].as_scalar())
    else {
        let culprit = if matches!(args[0].as_scalar(), Some(Scalar::Str(_))) { args[1] } else { args[0] };
        return Err(argument_error(heap, "strstr", culprit));
    };
    let position = heap.str(haystack).find(heap.str(needle));
    Ok(match position {
        Some(position) => Value::Scalar(Scalar::num(position as i64)),
        None => Value::from(-1),
    })
}

fn number(heap: &Heap, name: &str, value: Value) -> Result<f64> {
    match value.as_scalar() {
        Some(Scalar::Double(d)) => Ok(d),
        Some(scalar) => match scalar.integral() {
            Some(i) => Ok(i as f64),
            None => Err(argument_error(heap, name, value)),
        },
        None => Err(argument_error(heap, name, value)),
    }
}

fn argument_error(heap: &Heap, name: &str, value: Value) -> cart_common::error::Error {
    TypeError::UnsupportedOperandPrefix { op: format!("{name}()"), rt_type: value.type_name(heap).to_string() }
        .into()
}
