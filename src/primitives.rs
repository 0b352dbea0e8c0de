use crate::error::{SecdError, SecdResult};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::{SymbolId, Value};

/// Number of stack values a builtin consumes, or None if the name is not a
/// builtin. `list` is not here: the compiler expands it into `NIL`/`CONS`.
///
///   2 args: + - * / cons eq < > <= >=
///   1 arg:  car cdr
pub fn builtin_arity(name: SymbolId) -> Option<usize> {
    if name == sym::PLUS
        || name == sym::MINUS
        || name == sym::TIMES
        || name == sym::SLASH
        || name == sym::CONS
        || name == sym::EQ
        || name == sym::LESS
        || name == sym::GREATER
        || name == sym::LESS_EQ
        || name == sym::GREATER_EQ
    {
        Some(2)
    } else if name == sym::CAR || name == sym::CDR {
        Some(1)
    } else {
        None
    }
}

pub fn is_builtin(name: SymbolId) -> bool {
    builtin_arity(name).is_some()
}

/// Apply a builtin to values popped off the stack.
///
/// Arguments are compiled last-to-first, so the first surface argument is on
/// top of the stack: `s1` is the first pop and `s2` the second. `(- 10 3)`
/// leaves 10 on top and computes `s1 - s2`. One-argument builtins ignore `s2`.
pub fn call_builtin(
    name: SymbolId,
    s1: Value,
    s2: Value,
    heap: &mut Heap,
    symbols: &SymbolTable,
) -> SecdResult<Value> {
    if name == sym::PLUS {
        arith(s1, s2, "+", i64::checked_add)
    } else if name == sym::MINUS {
        arith(s1, s2, "-", i64::checked_sub)
    } else if name == sym::TIMES {
        arith(s1, s2, "*", i64::checked_mul)
    } else if name == sym::SLASH {
        prim_div(s1, s2)
    } else if name == sym::CAR {
        prim_car(s1, heap)
    } else if name == sym::CDR {
        prim_cdr(s1, heap)
    } else if name == sym::CONS {
        heap.cons(s1, s2)
    } else if name == sym::EQ {
        Ok(Value::from_bool(prim_eq(s1, s2)))
    } else if name == sym::LESS {
        compare(s1, s2, "<", |a, b| a < b)
    } else if name == sym::GREATER {
        compare(s1, s2, ">", |a, b| a > b)
    } else if name == sym::LESS_EQ {
        compare(s1, s2, "<=", |a, b| a <= b)
    } else if name == sym::GREATER_EQ {
        compare(s1, s2, ">=", |a, b| a >= b)
    } else {
        Err(SecdError::runtime(format!(
            "unknown builtin: {}",
            symbols.name(name)
        )))
    }
}

// ============================================================================
// Individual builtins
// ============================================================================

fn int_operands(s1: Value, s2: Value, op: &str) -> SecdResult<(i64, i64)> {
    match (s1, s2) {
        (Value::Int(a), Value::Int(b)) => Ok((a, b)),
        (Value::Int(_), other) | (other, _) => Err(SecdError::runtime(format!(
            "{} expects integers, got {}",
            op,
            other.type_name()
        ))),
    }
}

fn arith(s1: Value, s2: Value, op: &str, f: fn(i64, i64) -> Option<i64>) -> SecdResult<Value> {
    let (a, b) = int_operands(s1, s2, op)?;
    f(a, b)
        .map(Value::Int)
        .ok_or_else(|| SecdError::runtime(format!("integer overflow in {}", op)))
}

fn prim_div(s1: Value, s2: Value) -> SecdResult<Value> {
    let (a, b) = int_operands(s1, s2, "/")?;
    if b == 0 {
        return Err(SecdError::runtime("division by zero"));
    }
    a.checked_div(b)
        .map(Value::Int)
        .ok_or_else(|| SecdError::runtime("integer overflow in /"))
}

fn compare(s1: Value, s2: Value, op: &str, f: fn(i64, i64) -> bool) -> SecdResult<Value> {
    let (a, b) = int_operands(s1, s2, op)?;
    Ok(Value::from_bool(f(a, b)))
}

fn prim_car(a: Value, heap: &Heap) -> SecdResult<Value> {
    heap.car_of(a)
        .ok_or_else(|| SecdError::runtime(format!("car of non-pair: {}", a.type_name())))
}

fn prim_cdr(a: Value, heap: &Heap) -> SecdResult<Value> {
    heap.cdr_of(a)
        .ok_or_else(|| SecdError::runtime(format!("cdr of non-pair: {}", a.type_name())))
}

/// Atoms compare by value, pairs by identity.
fn prim_eq(a: Value, b: Value) -> bool {
    a == b
}
