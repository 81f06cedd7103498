use kgen_emit::EmitError;
use kgen_tile::TileError;

/// Errors raised while generating kernel source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenError {
    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Tile(#[from] TileError),

    /// Sub-dimensions or granularity the solver cannot work with.
    #[error("invalid decomposition: {0}")]
    InvalidDecomposition(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Flag combination the generator does not implement.
    #[error("invalid kernel flags: {0}")]
    InvalidFlags(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Emitting produced a different length than the dry run measured.
    #[error("generated {emitted} bytes after measuring {measured}")]
    SizeMismatch { measured: usize, emitted: usize },
}

impl GenError {
    /// Source buffer too small; generation can be retried with a larger one.
    pub fn is_overflow(&self) -> bool {
        match self {
            GenError::Emit(e) | GenError::Tile(TileError::Emit(e)) => e.is_overflow(),
            _ => false,
        }
    }
}

/// Convenience alias for `Result<T, GenError>`.
pub type Result<T> = std::result::Result<T, GenError>;
