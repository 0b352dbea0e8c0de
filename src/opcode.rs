use serde::{Deserialize, Serialize};

/// Machine instruction mnemonics.
///
/// Opcodes carry no operands of their own. Operands are the list elements
/// that immediately follow the opcode in the code list and are fetched by
/// the machine the same way instructions are.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Opcode {
    /// Push nil.
    Nil,
    /// Push the following literal.
    Ldc,
    /// Push the variable at the following (depth . index) address.
    Ld,
    /// Push the frame tail starting at the following address (rest parameter).
    Ldr,
    /// Store the stack top at the following address without popping it.
    St,
    /// Pop car, pop cdr, push the pair.
    Cons,
    /// Pop a condition and branch to one of the two following code lists.
    Sel,
    /// Return from a `Sel` branch.
    Join,
    /// Push a closure over the following code list and the current environment.
    Ldf,
    /// Pop a closure and an argument frame and call it.
    Ap,
    /// Return from a closure call.
    Rtn,
    /// Push an empty placeholder frame (letrec).
    Dum,
    /// Like `Ap`, but fill the placeholder frame in place first.
    Rap,
    /// Stop the machine.
    Halt,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::Nil,
        Opcode::Ldc,
        Opcode::Ld,
        Opcode::Ldr,
        Opcode::St,
        Opcode::Cons,
        Opcode::Sel,
        Opcode::Join,
        Opcode::Ldf,
        Opcode::Ap,
        Opcode::Rtn,
        Opcode::Dum,
        Opcode::Rap,
        Opcode::Halt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nil => "NIL",
            Opcode::Ldc => "LDC",
            Opcode::Ld => "LD",
            Opcode::Ldr => "LDR",
            Opcode::St => "ST",
            Opcode::Cons => "CONS",
            Opcode::Sel => "SEL",
            Opcode::Join => "JOIN",
            Opcode::Ldf => "LDF",
            Opcode::Ap => "AP",
            Opcode::Rtn => "RTN",
            Opcode::Dum => "DUM",
            Opcode::Rap => "RAP",
            Opcode::Halt => "HALT",
        }
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }
}
