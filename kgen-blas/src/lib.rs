//! BLAS level 3 OpenCL kernel generators.
//!
//! A generator turns a problem description (function, data type, layout
//! flags) and a decomposition into OpenCL C source. Generators are pure:
//! the same inputs always yield byte-identical source, which lets the
//! caller measure a kernel with a dry run before emitting it.
//!
//! # Core Types
//!
//! - [`BlasKargs`]: arguments of one BLAS call
//! - [`KernelExtraFlags`] / [`KernelExtra`]: the kernel-shaping part of a
//!   problem, used as the identity of a generated kernel
//! - [`SolverOps`]: one way of solving a function (generator, argument
//!   binding, decomposition checks)
//! - [`SolverTable`]: registered patterns per function
//! - [`GenConfig`]: device and tuning constants
//!
//! # Example
//!
//! ```rust
//! use kgen_blas::{generate_source, BlasFunction, GenConfig, KernelExtra, KernelExtraFlags, SolverTable};
//! use kgen_tile::DataType;
//!
//! let cfg = GenConfig::default();
//! let table = SolverTable::standard(&cfg);
//! let pattern = &table.patterns(BlasFunction::Gemm)[0];
//! let (subdims, pgran) = pattern.sops.default_decomposition(DataType::Float, cfg.wavefront_size);
//! let extra = KernelExtra::new(DataType::Float, KernelExtraFlags::empty()).with_vec_len(4);
//!
//! let src = generate_source(pattern.sops.as_ref(), &subdims, &pgran, &extra, cfg.max_source_size).unwrap();
//! assert!(src.contains("__kernel"));
//! ```

pub mod config;
pub mod error;
pub mod extra;
pub mod flags;
pub mod func;
pub mod gens;
pub mod kargs;
pub mod solver;
pub mod threads;

pub use config::{DtypeTable, GenConfig, MAX_SYRK_ITEM};
pub use error::{GenError, Result};
pub use extra::{KernelExtra, KernelType, SolverPriv};
pub use flags::KernelExtraFlags;
pub use func::{ArgScalar, BlasFunction, BlasKargs, BufferId, Diag, ImageId, MatrixRole, Order, Side, Transpose, Uplo};
pub use gens::{generate_source, MatrixAccess, TileSet};
pub use kargs::{KernelArg, KernelArgs};
pub use solver::{
    CheckCalcPGran, MemoryPattern, PatternPerformance, SolverFlags, SolverId, SolverOps, SolverTable,
};
pub use threads::{calc_global_threads, calc_pgran_dedicated, decomp_sanity_check, DecompositionAxis};
