//! Bounded OpenCL C source emission.
//!
//! # Core Types
//!
//! - [`KgenContext`]: append-only source builder tracking nesting and
//!   indentation, with a dry-run (measuring) mode
//! - [`StatementBatch`]: priority-ordered statement buffer
//! - [`KgenGuard`]: at most one generated function per pattern
//! - [`SubproblemDim`] / [`PGranularity`]: decomposition levels and work
//!   group shape, shared by every generator
//!
//! # Example
//!
//! ```rust
//! use kgen_emit::KgenContext;
//!
//! let mut ctx = KgenContext::new(1024);
//! ctx.declare_function("void __kernel\nfoo(uint n)\n").unwrap();
//! ctx.begin_func_body().unwrap();
//! ctx.begin_branch(Some("if (n == 0u)")).unwrap();
//! ctx.add_stmt("return;\n").unwrap();
//! ctx.end_branch(None).unwrap();
//! ctx.end_func_body().unwrap();
//!
//! assert!(ctx.source().contains("    if (n == 0u) {\n        return;\n    }\n"));
//! ```

pub mod batch;
pub mod context;
pub mod dims;
pub mod error;
pub mod guard;
pub mod helpers;

pub use batch::{StatementBatch, MAX_STATEMENT_PRIORITY};
pub use context::{KgenContext, MAX_NESTING, MAX_TABS, TAB_WIDTH};
pub use dims::{
    check_subdims_nesting, PGranularity, SDimComponent, SubproblemDim, MAX_SUBDIMS, SUBDIM_UNUSED,
};
pub use error::{EmitError, Result};
pub use guard::{KgenGuard, FUNC_NAME_MAXLEN};
pub use helpers::{MemFence, UptrType};
