use std::collections::HashMap;

use crate::value::SymbolId;

/// Interned identifier table. Each unique name maps to a unique SymbolId, so
/// identifier equality is name equality.
pub struct SymbolTable {
    name_to_id: HashMap<String, SymbolId>,
    id_to_name: Vec<String>,
}

/// Well-known identifier IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    // Special forms
    pub const FN: SymbolId = SymbolId(0);
    pub const LAMBDA: SymbolId = SymbolId(1);
    pub const IF: SymbolId = SymbolId(2);
    pub const LET: SymbolId = SymbolId(3);
    pub const LETREC: SymbolId = SymbolId(4);
    pub const QUOTE: SymbolId = SymbolId(5);
    pub const SET: SymbolId = SymbolId(6);
    pub const DEFM: SymbolId = SymbolId(7);
    // Builtins
    pub const PLUS: SymbolId = SymbolId(8);
    pub const MINUS: SymbolId = SymbolId(9);
    pub const TIMES: SymbolId = SymbolId(10);
    pub const SLASH: SymbolId = SymbolId(11);
    pub const CAR: SymbolId = SymbolId(12);
    pub const CDR: SymbolId = SymbolId(13);
    pub const CONS: SymbolId = SymbolId(14);
    pub const EQ: SymbolId = SymbolId(15);
    pub const LESS: SymbolId = SymbolId(16);
    pub const GREATER: SymbolId = SymbolId(17);
    pub const LESS_EQ: SymbolId = SymbolId(18);
    pub const GREATER_EQ: SymbolId = SymbolId(19);
    pub const LIST: SymbolId = SymbolId(20);
    // Parameter marker
    pub const REST: SymbolId = SymbolId(21);
    // Printed name of the true atom
    pub const T: SymbolId = SymbolId(22);
    // Reader-internal unquote marker; never produced by the lexer as a name
    pub const UNQUOTE: SymbolId = SymbolId(23);
}

impl SymbolTable {
    /// Create a new symbol table with all well-known names pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = [
            "fn", "lambda", "if", "let", "letrec", "quote", "set", "defm",
            "+", "-", "*", "/", "car", "cdr", "cons", "eq", "<", ">", "<=", ">=", "list",
            "&rest", "t", ",",
        ];

        let mut name_to_id = HashMap::new();
        let mut id_to_name = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let id = SymbolId(i as u32);
            name_to_id.insert(name.to_string(), id);
            id_to_name.push(name.to_string());
        }

        SymbolTable {
            name_to_id,
            id_to_name,
        }
    }

    /// Intern a name. Returns the existing ID if already interned,
    /// or creates a new one.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up a name by its ID.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize]
    }

    /// Look up an ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    /// Total number of interned names.
    pub fn count(&self) -> usize {
        self.id_to_name.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names_match_constants() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup("fn"), Some(sym::FN));
        assert_eq!(table.lookup("defm"), Some(sym::DEFM));
        assert_eq!(table.lookup(">="), Some(sym::GREATER_EQ));
        assert_eq!(table.lookup("list"), Some(sym::LIST));
        assert_eq!(table.lookup("&rest"), Some(sym::REST));
        assert_eq!(table.name(sym::T), "t");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let before = table.count();
        let a = table.intern("frob");
        let b = table.intern("frob");
        assert_eq!(a, b);
        assert_eq!(table.count(), before + 1);
        assert_eq!(table.name(a), "frob");
    }
}
