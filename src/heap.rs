use crate::error::{SecdError, SecdResult};
use crate::value::{PairId, Value};

/// Default number of cells a session may allocate.
pub const DEFAULT_CAPACITY: usize = 16_000_000;

/// A single cons cell on the heap.
#[derive(Clone, Copy)]
pub struct ConsCell {
    pub car: Value,
    pub cdr: Value,
}

/// The cons cell arena. All pairs are allocated here and `PairId` is an
/// index into `cells`. Cells are never freed, so shared and cyclic
/// structure (letrec frames) need no ownership bookkeeping.
pub struct Heap {
    cells: Vec<ConsCell>,
    capacity: usize,
}

impl Heap {
    /// A heap of at most `capacity` cells, clamped to what a `PairId` can address.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Heap {
            cells: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Allocate a new cons cell.
    /// Returns Err(HeapOverflow) if capacity is exceeded.
    pub fn alloc(&mut self, car: Value, cdr: Value) -> SecdResult<PairId> {
        if self.cells.len() >= self.capacity {
            return Err(SecdError::HeapOverflow);
        }
        let id = PairId(self.cells.len() as u32);
        self.cells.push(ConsCell { car, cdr });
        Ok(id)
    }

    /// Allocate a pair and return it as a value.
    pub fn cons(&mut self, car: Value, cdr: Value) -> SecdResult<Value> {
        Ok(Value::Pair(self.alloc(car, cdr)?))
    }

    #[inline]
    pub fn car(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].car
    }

    #[inline]
    pub fn cdr(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].cdr
    }

    #[inline]
    pub fn set_car(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].car = val;
    }

    #[inline]
    pub fn set_cdr(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].cdr = val;
    }

    /// Car of a value if it's a pair, or None for anything else.
    pub fn car_of(&self, val: Value) -> Option<Value> {
        val.as_pair().map(|id| self.car(id))
    }

    /// Cdr of a value if it's a pair, or None for anything else.
    pub fn cdr_of(&self, val: Value) -> Option<Value> {
        val.as_pair().map(|id| self.cdr(id))
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> SecdResult<Value> {
        self.list_with_tail(values, Value::Nil)
    }

    /// Build `(v1 v2 ... . tail)`.
    pub fn list_with_tail(&mut self, values: &[Value], tail: Value) -> SecdResult<Value> {
        let mut result = tail;
        for &val in values.iter().rev() {
            result = self.cons(val, result)?;
        }
        Ok(result)
    }

    /// Returns true if this value is a proper list.
    pub fn is_proper_list(&self, val: Value) -> bool {
        let mut current = val;
        loop {
            match current {
                Value::Nil => return true,
                Value::Pair(id) => current = self.cdr(id),
                _ => return false,
            }
        }
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(result),
                Value::Pair(id) => {
                    result.push(self.car(id));
                    current = self.cdr(id);
                }
                _ => return None,
            }
        }
    }

    /// The cell holding the `n`th element (1-based) of a list, if the list is
    /// that long.
    pub fn nth_cell(&self, list: Value, n: usize) -> Option<PairId> {
        let mut current = list.as_pair()?;
        for _ in 1..n {
            current = self.cdr(current).as_pair()?;
        }
        Some(current)
    }

    /// Returns the number of allocated cells.
    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_and_back() {
        let mut heap = Heap::new(64);
        let list = heap
            .list(&[Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap();
        assert!(heap.is_proper_list(list));
        assert_eq!(
            heap.list_to_vec(list),
            Some(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        let second = heap.nth_cell(list, 2).unwrap();
        assert_eq!(heap.car(second), Value::Int(2));
        assert!(heap.nth_cell(list, 4).is_none());
    }

    #[test]
    fn dotted_list_is_not_proper() {
        let mut heap = Heap::new(8);
        let dotted = heap.cons(Value::Int(1), Value::Int(2)).unwrap();
        assert!(!heap.is_proper_list(dotted));
        assert_eq!(heap.list_to_vec(dotted), None);
    }

    #[test]
    fn mutation_is_visible_through_shared_references() {
        let mut heap = Heap::new(8);
        let cell = heap.alloc(Value::Nil, Value::Nil).unwrap();
        let holder = heap.cons(Value::Pair(cell), Value::Nil).unwrap();
        heap.set_car(cell, Value::Int(7));
        let inner = heap.car_of(holder).unwrap();
        assert_eq!(heap.car_of(inner), Some(Value::Int(7)));
    }

    #[test]
    fn capacity_is_clamped_to_addressable_cells() {
        let heap = Heap::new(usize::MAX);
        assert_eq!(heap.capacity, u32::MAX as usize);
        assert_eq!(Heap::new(10).capacity, 10);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut heap = Heap::new(2);
        heap.alloc(Value::Nil, Value::Nil).unwrap();
        heap.alloc(Value::Nil, Value::Nil).unwrap();
        assert!(matches!(
            heap.alloc(Value::Nil, Value::Nil),
            Err(SecdError::HeapOverflow)
        ));
    }
}
