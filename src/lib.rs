//! A small Lisp toolchain built around Henderson's SECD machine.
//!
//! Source text is read into cons structure ([`reader`]), compiled into SECD
//! code lists with lexical addressing ([`compiler`]) and run on a register
//! machine whose stack, environment, code and dump are all heap lists
//! ([`machine`]). A [`Session`] ties these together around one heap and one
//! global environment, and an [`Image`] snapshots that environment.

pub mod compiler;
pub mod error;
pub mod globals;
pub mod heap;
pub mod image;
pub mod machine;
pub mod opcode;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod session;
pub mod symbol;
pub mod value;

pub use error::{ErrorKind, MachineState, SecdError, SecdResult};
pub use image::Image;
pub use session::Session;
pub use value::Value;
