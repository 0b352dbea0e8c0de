use std::collections::HashSet;

use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::{PairId, Value};

/// Nesting depth after which output is elided.
const MAX_DEPTH: usize = 200;
/// Total number of values printed before output is elided. Shared
/// substructure is printed once per reference, so this bounds the output of
/// heavily shared graphs.
const MAX_NODES: usize = 100_000;

/// Print a value to a string. Opcodes print as `[IS:NAME]`, so the same
/// printer renders compiled code for diagnostics.
///
/// A pair reached again while it is still being printed (a closure inside
/// its own environment, a letrec frame) prints as `...`.
pub fn print_val(val: Value, heap: &Heap, symbols: &SymbolTable) -> String {
    let mut printer = Printer {
        heap,
        symbols,
        out: String::new(),
        budget: MAX_NODES,
        path: HashSet::new(),
    };
    printer.print(val, 0);
    printer.out
}

struct Printer<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    out: String,
    budget: usize,
    path: HashSet<PairId>,
}

impl Printer<'_> {
    fn print(&mut self, val: Value, depth: usize) {
        if depth > MAX_DEPTH || self.budget == 0 {
            self.out.push_str("...");
            return;
        }
        self.budget -= 1;

        match val {
            Value::Nil => self.out.push_str("nil"),
            Value::True => self.out.push_str(self.symbols.name(sym::T)),
            Value::Int(n) => self.out.push_str(&n.to_string()),
            Value::Ident(id) => self.out.push_str(self.symbols.name(id)),
            Value::Op(op) => {
                self.out.push_str("[IS:");
                self.out.push_str(op.name());
                self.out.push(']');
            }
            Value::Pair(id) => {
                if !self.path.insert(id) {
                    self.out.push_str("...");
                    return;
                }
                let mut entered = vec![id];
                self.out.push('(');
                self.print(self.heap.car(id), depth + 1);

                let mut current = self.heap.cdr(id);
                loop {
                    match current {
                        Value::Nil => break,
                        Value::Pair(pid) => {
                            if self.budget == 0 || !self.path.insert(pid) {
                                self.out.push_str(" ...");
                                break;
                            }
                            entered.push(pid);
                            self.out.push(' ');
                            self.print(self.heap.car(pid), depth + 1);
                            current = self.heap.cdr(pid);
                        }
                        _ => {
                            self.out.push_str(" . ");
                            self.print(current, depth + 1);
                            break;
                        }
                    }
                }
                self.out.push(')');
                for pid in entered {
                    self.path.remove(&pid);
                }
            }
        }
    }
}
