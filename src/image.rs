use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SecdError, SecdResult};
use crate::opcode::Opcode;
use crate::session::Session;
use crate::value::{PairId, SymbolId, Value};

/// One half of a serialized cons cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Slot {
    Nil,
    True,
    Int(i64),
    /// Index into `Image::names`.
    Ident(u32),
    Op(Opcode),
    /// Index into `Image::cells`.
    Pair(u32),
}

/// A snapshot of a session's global state: the global environment with
/// everything reachable from it (closures, their code, quoted data), plus
/// the function and macro name tables.
///
/// Cells are renumbered densely and identifiers are stored by name, so an
/// image restores into any session regardless of what that session has
/// already allocated or interned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    names: Vec<String>,
    cells: Vec<(Slot, Slot)>,
    root: Slot,
    functions: Vec<String>,
    macros: Vec<String>,
}

impl Image {
    pub fn capture(session: &Session) -> SecdResult<Image> {
        let mut capture = Capture {
            session,
            cell_index: HashMap::new(),
            order: Vec::new(),
            name_index: HashMap::new(),
            names: Vec::new(),
        };

        let root = capture.slot(session.globals.env);
        let mut cells = Vec::new();
        let mut next = 0;
        // `order` grows while cells are encoded; every reachable pair is
        // visited exactly once.
        while next < capture.order.len() {
            let id = capture.order[next];
            let car = capture.slot(session.heap.car(id));
            let cdr = capture.slot(session.heap.cdr(id));
            cells.push((car, cdr));
            next += 1;
        }

        let symbols = &session.symbols;
        let image = Image {
            names: capture.names,
            cells,
            root,
            functions: session.globals.functions.iter().map(|&n| symbols.name(n).to_string()).collect(),
            macros: session.globals.macros.iter().map(|&n| symbols.name(n).to_string()).collect(),
        };
        log::debug!(
            "captured image: {} cells, {} globals, {} macros",
            image.cells.len(),
            image.functions.len(),
            image.macros.len()
        );
        Ok(image)
    }

    /// Install the snapshot into `session`, replacing its global environment
    /// and name tables. The session's own cells are left in place.
    pub fn restore(&self, session: &mut Session) -> SecdResult<()> {
        self.validate()?;

        let symbols: Vec<SymbolId> = self.names.iter().map(|n| session.symbols.intern(n)).collect();

        let mut ids = Vec::with_capacity(self.cells.len());
        for _ in &self.cells {
            ids.push(session.heap.alloc(Value::Nil, Value::Nil)?);
        }
        let value = |slot: Slot| match slot {
            Slot::Nil => Value::Nil,
            Slot::True => Value::True,
            Slot::Int(n) => Value::Int(n),
            Slot::Ident(i) => Value::Ident(symbols[i as usize]),
            Slot::Op(op) => Value::Op(op),
            Slot::Pair(i) => Value::Pair(ids[i as usize]),
        };
        for (&id, &(car, cdr)) in ids.iter().zip(&self.cells) {
            session.heap.set_car(id, value(car));
            session.heap.set_cdr(id, value(cdr));
        }

        session.globals.env = value(self.root);
        session.globals.functions = self.functions.iter().map(|n| session.symbols.intern(n)).collect();
        session.globals.macros = self.macros.iter().map(|n| session.symbols.intern(n)).collect();
        log::debug!("restored image: {} cells", self.cells.len());
        Ok(())
    }

    /// Check every index before anything is allocated.
    fn validate(&self) -> SecdResult<()> {
        let in_range = |slot: &Slot| match *slot {
            Slot::Ident(i) => (i as usize) < self.names.len(),
            Slot::Pair(i) => (i as usize) < self.cells.len(),
            _ => true,
        };
        let cells_ok = self.cells.iter().all(|(car, cdr)| in_range(car) && in_range(cdr));
        if !cells_ok || !in_range(&self.root) {
            return Err(SecdError::Image("cell or name index out of range".into()));
        }
        // The root must be a chain of at least the function and macro frames.
        let mut depth = 0;
        let mut current = self.root;
        while let Slot::Pair(i) = current {
            depth += 1;
            if depth > self.cells.len() {
                return Err(SecdError::Image("global environment is cyclic".into()));
            }
            current = self.cells[i as usize].1;
        }
        if depth < 2 || current != Slot::Nil {
            return Err(SecdError::Image("malformed global environment".into()));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> SecdResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SecdResult<Image> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SecdResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> SecdResult<Image> {
        let bytes = std::fs::read(path)?;
        Image::from_bytes(&bytes)
    }

    /// Number of cons cells in the snapshot.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

struct Capture<'a> {
    session: &'a Session,
    cell_index: HashMap<PairId, u32>,
    order: Vec<PairId>,
    name_index: HashMap<SymbolId, u32>,
    names: Vec<String>,
}

impl Capture<'_> {
    fn slot(&mut self, val: Value) -> Slot {
        match val {
            Value::Nil => Slot::Nil,
            Value::True => Slot::True,
            Value::Int(n) => Slot::Int(n),
            Value::Op(op) => Slot::Op(op),
            Value::Ident(id) => {
                let next = self.names.len() as u32;
                let index = *self.name_index.entry(id).or_insert(next);
                if index == next {
                    self.names.push(self.session.symbols.name(id).to_string());
                }
                Slot::Ident(index)
            }
            Value::Pair(id) => {
                let next = self.order.len() as u32;
                let index = *self.cell_index.entry(id).or_insert(next);
                if index == next {
                    self.order.push(id);
                }
                Slot::Pair(index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::with_capacity(100_000).unwrap()
    }

    #[test]
    fn globals_survive_a_round_trip() {
        let mut original = session();
        original
            .eval_str("(set x 10) (set double (fn (n) (* n 2))) (defm twice (e) (list '+ e e))")
            .unwrap();
        let bytes = original.capture_image().unwrap().to_bytes().unwrap();

        let mut restored = session();
        // Names interned before the restore must not shift anything.
        restored.eval_str("(set unrelated 1)").unwrap();
        restored.restore_image(&Image::from_bytes(&bytes).unwrap()).unwrap();

        assert_eq!(restored.eval_str("x").unwrap(), Value::Int(10));
        assert_eq!(restored.eval_str("(double 21)").unwrap(), Value::Int(42));
        assert_eq!(restored.eval_str("(twice 4)").unwrap(), Value::Int(8));
        assert!(restored.eval_str("unrelated").is_err());
    }

    #[test]
    fn shared_and_cyclic_structure_is_preserved() {
        let mut original = session();
        original
            .eval_str(
                "(set odd nil)
                 (set even (fn (n) (if (eq n 0) 't (odd (- n 1)))))
                 (set odd (fn (n) (if (eq n 0) nil (even (- n 1)))))",
            )
            .unwrap();
        let image = original.capture_image().unwrap();
        // Both closures capture the same global environment.
        assert!(image.cell_count() < original.heap.total_cells());

        let mut restored = session();
        restored.restore_image(&image).unwrap();
        let even = restored.eval_str("(even 10)").unwrap();
        assert_eq!(restored.print(even), "t");
        assert_eq!(restored.eval_str("(odd 10)").unwrap(), Value::Nil);
    }

    #[test]
    fn corrupt_images_are_rejected() {
        assert!(matches!(Image::from_bytes(&[1, 2, 3]), Err(SecdError::Image(_))));

        let broken = Image {
            names: Vec::new(),
            cells: vec![(Slot::Nil, Slot::Pair(7))],
            root: Slot::Pair(0),
            functions: Vec::new(),
            macros: Vec::new(),
        };
        let mut target = session();
        assert!(matches!(broken.restore(&mut target), Err(SecdError::Image(_))));
    }
}
