use kgen_emit::EmitError;

use crate::dtype::DataType;

/// Errors raised by the tile model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// No OpenCL vector type exists for the width.
    #[error("no vector type for {dtype} with {vec_len} elements")]
    UnsupportedVector { dtype: DataType, vec_len: usize },

    /// The addressed range leaves the tile or crosses a tile line.
    #[error("element range ({row}, {col}) + {len} is out of a {rows}x{cols} tile")]
    OutOfBounds {
        row: usize,
        col: usize,
        len: usize,
        rows: usize,
        cols: usize,
    },

    /// Iteration width does not divide the tile's physical line.
    #[error("vector length {vec_len} does not divide tile line of {width} elements")]
    IterWidth { vec_len: usize, width: usize },

    /// Seek target outside the iterated storage.
    #[error("position ({line}, {vec}) is outside the iterated tile")]
    InvalidSeek { line: usize, vec: usize },

    /// Half-element access on a real tile.
    #[error("tile `{0}` does not hold complex elements")]
    NotComplex(String),
}

/// Convenience alias for `Result<T, TileError>`.
pub type Result<T> = std::result::Result<T, TileError>;
