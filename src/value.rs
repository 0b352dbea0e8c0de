use std::fmt;

use crate::opcode::Opcode;

/// Unique identifier for an interned identifier name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Index into the cons-cell heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(pub u32);

/// A symbolic object. Copy semantics: pair contents live in the heap, so
/// sharing a cons cell (or building a cycle through one) is just copying
/// its index around.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// The empty list, which doubles as false.
    Nil,
    /// The canonical true atom.
    True,
    Int(i64),
    /// A source-level name, resolved by the compiler.
    Ident(SymbolId),
    /// An instruction mnemonic inside a compiled code list.
    Op(Opcode),
    Pair(PairId),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(self) -> bool {
        matches!(self, Value::Pair(_))
    }

    /// Anything but nil counts as true.
    pub fn is_truthy(self) -> bool {
        !self.is_nil()
    }

    pub fn as_pair(self) -> Option<PairId> {
        match self {
            Value::Pair(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Converts a Rust boolean into the true atom or nil.
    pub fn from_bool(b: bool) -> Value {
        if b {
            Value::True
        } else {
            Value::Nil
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::True => "true",
            Value::Int(_) => "integer",
            Value::Ident(_) => "identifier",
            Value::Op(_) => "opcode",
            Value::Pair(_) => "pair",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::True => write!(f, "True"),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Ident(id) => write!(f, "Ident({})", id.0),
            Value::Op(op) => write!(f, "Op({})", op.name()),
            Value::Pair(id) => write!(f, "Pair({})", id.0),
        }
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

impl fmt::Debug for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairId({})", self.0)
    }
}
