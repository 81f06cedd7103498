/// Errors raised while emitting kernel source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// The configured source bound would be exceeded. Generation is pure, so
    /// the caller may retry with a larger bound.
    #[error("source buffer overflow: {needed} bytes needed, {capacity} available")]
    Overflow { needed: usize, capacity: usize },

    /// Function or branch nesting rules were violated.
    #[error("invalid nesting: {0}")]
    Nesting(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Growing an internal buffer failed.
    #[error("out of memory while emitting source")]
    OutOfMemory,

    #[error("function name `{name}` exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    /// A guard callback returned without declaring a function.
    #[error("generator callback declared no function")]
    MissingFunction,

    /// Two distinct patterns produced the same function name.
    #[error("function `{0}` generated twice in one program")]
    DuplicateFunction(String),
}

impl EmitError {
    /// Whether re-running the dry run and emit with a larger bound can fix it.
    pub fn is_overflow(&self) -> bool {
        matches!(self, EmitError::Overflow { .. })
    }
}

/// Convenience alias for `Result<T, EmitError>`.
pub type Result<T> = std::result::Result<T, EmitError>;
