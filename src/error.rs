use crate::value::Value;

/// Register contents of the machine at the moment a runtime error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub stack: Value,
    pub env: Value,
    pub code: Value,
    pub dump: Value,
}

impl MachineState {
    /// Placeholder for errors raised before the registers are known.
    pub const EMPTY: MachineState = MachineState {
        stack: Value::Nil,
        env: Value::Nil,
        code: Value::Nil,
        dump: Value::Nil,
    };
}

/// Broad classification of a failure, matching where it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Compile,
    Runtime,
    Other,
}

/// Errors raised by the reader, compiler, machine and image store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecdError {
    /// Malformed or truncated source text.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An identifier that resolves to no binding.
    #[error("Compile error: unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// A parameter annotated with something other than `&rest`.
    #[error("Compile error: invalid formal parameter '{name}' (annotated with '{marker}')")]
    InvalidFormal { name: String, marker: String },

    /// A special form with the wrong shape.
    #[error("Compile error: malformed {form}: {reason}")]
    Malformed { form: String, reason: String },

    /// Failure inside the machine. Carries the registers for diagnostics.
    #[error("Runtime error: {message}")]
    Runtime { message: String, state: MachineState },

    /// Heap capacity exceeded.
    #[error("Error: heap capacity exceeded")]
    HeapOverflow,

    /// A snapshot that could not be encoded or decoded.
    #[error("Image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl SecdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SecdError::Parse(_) => ErrorKind::Parse,
            SecdError::UnknownIdentifier(_)
            | SecdError::InvalidFormal { .. }
            | SecdError::Malformed { .. } => ErrorKind::Compile,
            SecdError::Runtime { .. } => ErrorKind::Runtime,
            SecdError::HeapOverflow | SecdError::Image(_) | SecdError::Io(_) => ErrorKind::Other,
        }
    }

    pub fn malformed(form: &str, reason: impl Into<String>) -> Self {
        SecdError::Malformed {
            form: form.to_string(),
            reason: reason.into(),
        }
    }

    /// A runtime error whose registers are filled in later by `at`.
    pub fn runtime(message: impl Into<String>) -> Self {
        SecdError::Runtime {
            message: message.into(),
            state: MachineState::EMPTY,
        }
    }

    /// Attach machine registers to a runtime error. Other errors pass through.
    pub fn at(self, state: MachineState) -> Self {
        match self {
            SecdError::Runtime { message, .. } => SecdError::Runtime { message, state },
            other => other,
        }
    }

    /// The machine registers captured with a runtime error.
    pub fn machine_state(&self) -> Option<&MachineState> {
        match self {
            SecdError::Runtime { state, .. } => Some(state),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SecdError {
    fn from(e: std::io::Error) -> Self {
        SecdError::Io(e.to_string())
    }
}

impl From<bincode::Error> for SecdError {
    fn from(e: bincode::Error) -> Self {
        SecdError::Image(e.to_string())
    }
}

pub type SecdResult<T> = Result<T, SecdError>;
