//! Runtime OpenCL kernel generator and problem decomposer for BLAS level 3.
//!
//! For a requested GEMM, SYRK, SYR2K, TRMM or TRSM call this crate writes
//! OpenCL C source specialized to the problem's vectorization, tiling and
//! tails, cuts the problem into launches that respect work group
//! granularity and triangular ordering, and keeps built kernels in a cache
//! keyed by their semantic variant.
//!
//! # Crates
//!
//! - [`kgen_emit`]: bounded source emitter, statement batches and the
//!   generation guard
//! - [`kgen_tile`]: data types, tiles held in private storage and their
//!   iterators
//! - [`kgen_blas`]: flags, argument blocks, the per-function generators and
//!   the [`SolverOps`] trait
//! - [`kgen_solve`]: solution steps, division between queues,
//!   decomposition, kernel building and execution
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use blaskgen::device::mem::{DeviceInfo, RecordingQueue, SourceBuilder};
//! use blaskgen::{BlasFunction, BlasKargs, CommandQueue, DataType, Environment, GenConfig, Status};
//!
//! let env = Environment::new(GenConfig::default(), Arc::new(SourceBuilder::new())).unwrap();
//! let queues: Vec<Arc<dyn CommandQueue>> = vec![Arc::new(RecordingQueue::new(DeviceInfo::new(0, 32)))];
//!
//! let mut kargs = BlasKargs::new(BlasFunction::Syrk, DataType::Double);
//! kargs.n = 300;
//! kargs.k = 64;
//! kargs.lda = 64;
//! kargs.ldc = 300;
//!
//! let result = env.execute(&kargs, &queues, &[]);
//! assert_eq!(Status::from_result(&result), Status::Success);
//! ```

use std::fmt;

pub use kgen_blas;
pub use kgen_emit;
pub use kgen_solve;
pub use kgen_tile;

// ============================================================================
// Generation
// ============================================================================
pub use kgen_blas::{
    generate_source, ArgScalar, BlasFunction, BlasKargs, BufferId, Diag, GenConfig, GenError, ImageId,
    KernelExtra, KernelExtraFlags, KernelType, MatrixRole, Order, Side, SolverId, SolverOps, SolverPriv,
    SolverTable, Transpose, Uplo,
};
pub use kgen_emit::{EmitError, KgenContext, KgenGuard, PGranularity, SubproblemDim};
pub use kgen_tile::{DataType, Tile, TileError};

// ============================================================================
// Decomposition and execution
// ============================================================================
pub use kgen_solve::{
    device, execute_seq, make_solution_seq, BuildFailure, CommandQueue, Device, Environment, Event,
    KernelCache, MemoryKernelCache, ProgramBuilder, SolutionSeq, SolutionStep, SolveError,
};

// ============================================================================
// Error types
// ============================================================================

/// Any error raised while generating, decomposing or launching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KgenError {
    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Gen(#[from] GenError),

    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// Convenience alias for `Result<T, KgenError>`.
pub type Result<T> = std::result::Result<T, KgenError>;

/// Outcome of a BLAS call as reported to callers of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidValue,
    InvalidSize,
    OutOfMemory,
    BuildFailure,
    Unsupported,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::InvalidValue => "invalid value",
            Status::InvalidSize => "invalid size",
            Status::OutOfMemory => "out of memory",
            Status::BuildFailure => "build failure",
            Status::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

impl Status {
    /// Status of a finished call.
    pub fn from_result<T, E>(result: &std::result::Result<T, E>) -> Self
    where
        E: Clone + Into<KgenError>,
    {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.clone().into().status(),
        }
    }
}

fn emit_status(e: &EmitError) -> Status {
    match e {
        // an overflow reaching the caller was not retried
        EmitError::Overflow { .. } | EmitError::OutOfMemory => Status::OutOfMemory,
        EmitError::Nesting(_)
        | EmitError::InvalidArgument(_)
        | EmitError::NameTooLong { .. }
        | EmitError::MissingFunction
        | EmitError::DuplicateFunction(_) => Status::InvalidValue,
    }
}

fn tile_status(e: &TileError) -> Status {
    match e {
        TileError::Emit(e) => emit_status(e),
        TileError::UnsupportedVector { .. } => Status::Unsupported,
        _ => Status::InvalidValue,
    }
}

fn gen_status(e: &GenError) -> Status {
    match e {
        GenError::Emit(e) => emit_status(e),
        GenError::Tile(e) => tile_status(e),
        GenError::Unsupported(_) => Status::Unsupported,
        GenError::InvalidDecomposition(_)
        | GenError::InvalidFlags(_)
        | GenError::InvalidConfig(_)
        | GenError::SizeMismatch { .. } => Status::InvalidValue,
    }
}

impl KgenError {
    /// Public status this error is reported as.
    pub fn status(&self) -> Status {
        match self {
            KgenError::Emit(e) => emit_status(e),
            KgenError::Tile(e) => tile_status(e),
            KgenError::Gen(e) => gen_status(e),
            KgenError::Solve(e) => match e {
                SolveError::Gen(e) => gen_status(e),
                SolveError::Build(_) => Status::BuildFailure,
                SolveError::Device(_) => Status::InvalidValue,
                SolveError::OutOfMemory => Status::OutOfMemory,
                SolveError::InvalidSize(_) => Status::InvalidSize,
                SolveError::InvalidValue(_) => Status::InvalidValue,
            },
        }
    }
}
