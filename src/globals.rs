use crate::error::SecdResult;
use crate::heap::Heap;
use crate::value::{PairId, SymbolId, Value};

/// Frame depth of the function/value table, counted from the global
/// environment (1-based).
pub const FUNCTION_DEPTH: usize = 1;
/// Frame depth of the macro table, counted from the global environment.
pub const MACRO_DEPTH: usize = 2;

/// The process-wide state shared by the compiler and the machine: the
/// runtime global environment and the two compile-time name tables that
/// mirror its frames.
///
/// Both tables are append-only. A name's 1-based position in its table is
/// its slot index in the matching runtime frame, and compiled code bakes
/// that index in, so entries are never reordered. The compiler drops the
/// names a form appended only when that form fails to compile.
pub struct Globals {
    /// Runtime environment chain: `(function-frame macro-frame)`.
    pub env: Value,
    pub functions: Vec<SymbolId>,
    pub macros: Vec<SymbolId>,
}

impl Globals {
    /// Build the initial global environment: two empty frames.
    pub fn new(heap: &mut Heap) -> SecdResult<Self> {
        let env = heap.list(&[Value::Nil, Value::Nil])?;
        Ok(Globals {
            env,
            functions: Vec::new(),
            macros: Vec::new(),
        })
    }

    /// 1-based slot of a name in the function/value table.
    pub fn function_index(&self, name: SymbolId) -> Option<usize> {
        self.functions.iter().position(|&n| n == name).map(|i| i + 1)
    }

    /// 1-based slot of a name in the macro table.
    pub fn macro_index(&self, name: SymbolId) -> Option<usize> {
        self.macros.iter().position(|&n| n == name).map(|i| i + 1)
    }

    pub fn is_macro(&self, name: SymbolId) -> bool {
        self.macro_index(name).is_some()
    }

    /// Append a name to the function/value table unless present. Returns its slot.
    pub fn define_function(&mut self, name: SymbolId) -> usize {
        match self.function_index(name) {
            Some(index) => index,
            None => {
                self.functions.push(name);
                self.functions.len()
            }
        }
    }

    /// Append a name to the macro table unless present. Returns its slot.
    pub fn define_macro(&mut self, name: SymbolId) -> usize {
        match self.macro_index(name) {
            Some(index) => index,
            None => {
                self.macros.push(name);
                self.macros.len()
            }
        }
    }
}

// ============================================================================
// Environment addressing
//
// An environment is a list of frames and a frame is a list of values.
// Addresses are 1-based (depth . index) pairs.
// ============================================================================

/// The environment cell whose car is the frame at `depth`.
fn frame_cell(heap: &Heap, env: Value, depth: usize) -> Option<PairId> {
    if depth == 0 {
        return None;
    }
    heap.nth_cell(env, depth)
}

/// Value at `(depth . index)`, if the environment is that deep and the frame
/// that long.
pub fn env_lookup(heap: &Heap, env: Value, depth: usize, index: usize) -> Option<Value> {
    if index == 0 {
        return None;
    }
    let frame = heap.car(frame_cell(heap, env, depth)?);
    heap.nth_cell(frame, index).map(|cell| heap.car(cell))
}

/// The frame tail starting at slot `index`, for rest parameters. A frame with
/// exactly `index - 1` values yields nil.
pub fn env_tail(heap: &Heap, env: Value, depth: usize, index: usize) -> Option<Value> {
    if index == 0 {
        return None;
    }
    let mut tail = heap.car(frame_cell(heap, env, depth)?);
    for _ in 1..index {
        tail = heap.cdr_of(tail)?;
    }
    Some(tail)
}

/// Store `val` at `(depth . index)`, mutating the frame in place. Frames grow
/// on demand, padding new slots with nil, so a freshly appended global can be
/// stored without rebuilding the frame. Returns false if the environment is
/// not `depth` frames deep.
pub fn env_set(heap: &mut Heap, env: Value, depth: usize, index: usize, val: Value) -> SecdResult<bool> {
    if index == 0 {
        return Ok(false);
    }
    let Some(holder) = frame_cell(heap, env, depth) else {
        return Ok(false);
    };

    let mut cell = match heap.car(holder) {
        Value::Pair(id) => id,
        Value::Nil => {
            let id = heap.alloc(Value::Nil, Value::Nil)?;
            heap.set_car(holder, Value::Pair(id));
            id
        }
        _ => return Ok(false),
    };

    for _ in 1..index {
        cell = match heap.cdr(cell) {
            Value::Pair(id) => id,
            Value::Nil => {
                let id = heap.alloc(Value::Nil, Value::Nil)?;
                heap.set_cdr(cell, Value::Pair(id));
                id
            }
            _ => return Ok(false),
        };
    }

    heap.set_car(cell, val);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_append_only() {
        let mut heap = Heap::new(64);
        let mut globals = Globals::new(&mut heap).unwrap();
        let (x, y) = (SymbolId(100), SymbolId(101));
        assert_eq!(globals.define_function(x), 1);
        assert_eq!(globals.define_function(y), 2);
        assert_eq!(globals.define_function(x), 1);
        assert_eq!(globals.function_index(y), Some(2));
        assert!(!globals.is_macro(x));
        assert_eq!(globals.define_macro(x), 1);
        assert!(globals.is_macro(x));
    }

    #[test]
    fn store_grows_global_frame() {
        let mut heap = Heap::new(64);
        let globals = Globals::new(&mut heap).unwrap();
        assert_eq!(env_lookup(&heap, globals.env, 1, 1), None);
        assert!(env_set(&mut heap, globals.env, 1, 3, Value::Int(30)).unwrap());
        assert_eq!(env_lookup(&heap, globals.env, 1, 3), Some(Value::Int(30)));
        assert_eq!(env_lookup(&heap, globals.env, 1, 2), Some(Value::Nil));
        assert!(env_set(&mut heap, globals.env, 2, 1, Value::Int(5)).unwrap());
        assert_eq!(env_lookup(&heap, globals.env, 2, 1), Some(Value::Int(5)));
        assert!(!env_set(&mut heap, globals.env, 3, 1, Value::Int(5)).unwrap());
    }

    #[test]
    fn tail_addresses_rest_of_frame() {
        let mut heap = Heap::new(64);
        let frame = heap.list(&[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        let env = heap.list(&[frame]).unwrap();
        let tail = env_tail(&heap, env, 1, 2).unwrap();
        assert_eq!(heap.list_to_vec(tail), Some(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(env_tail(&heap, env, 1, 4), Some(Value::Nil));
        assert_eq!(env_tail(&heap, env, 1, 5), None);
        assert_eq!(env_lookup(&heap, env, 2, 1), None);
    }
}
