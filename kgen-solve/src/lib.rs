//! Problem decomposition and execution for generated BLAS kernels.
//!
//! A BLAS call is turned into a [`SolutionSeq`]: the problem is divided
//! between command queues, large triangular and rank-k problems are split
//! into chains of smaller steps, and every step gets a kernel generated and
//! built for its exact shape. Kernels are kept in a [`KernelCache`] keyed
//! by everything that affects their source.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use kgen_blas::{BlasFunction, BlasKargs, GenConfig};
//! use kgen_solve::device::mem::{DeviceInfo, RecordingQueue, SourceBuilder};
//! use kgen_solve::{CommandQueue, Environment};
//! use kgen_tile::DataType;
//!
//! let env = Environment::new(GenConfig::default(), Arc::new(SourceBuilder::new())).unwrap();
//! let queue = Arc::new(RecordingQueue::new(DeviceInfo::new(0, 16)));
//! let queues: Vec<Arc<dyn CommandQueue>> = vec![queue.clone()];
//!
//! let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
//! kargs.m = 256;
//! kargs.n = 256;
//! kargs.k = 256;
//! kargs.lda = 256;
//! kargs.ldb = 256;
//! kargs.ldc = 256;
//!
//! let events = env.execute(&kargs, &queues, &[]).unwrap();
//! assert_eq!(events.len(), 1);
//! assert_eq!(queue.launch_count(), 1);
//! ```

pub mod cache;
pub mod decompose;
pub mod device;
pub mod divide;
pub mod env;
pub mod error;
pub mod exec;
pub mod kernel;
pub mod make;
pub mod problem_iter;
pub mod step;

pub use cache::{Kernel, KernelCache, KernelKey, MemoryKernelCache};
pub use decompose::{decompose_step, decompose_syr2k, decompose_syrk, decompose_trxm};
pub use device::{BuildLog, CommandQueue, ContextId, Device, DeviceError, DeviceId, Event, Launch, Program, ProgramBuilder};
pub use divide::{align, divide_problem, rect_division, stripe_division, tri_matrix_stripe_division};
pub use env::Environment;
pub use error::{BuildFailure, Result, SolveError};
pub use exec::{enqueue_kernel, execute_image_step, execute_seq};
pub use kernel::{build_kernel, kernel_entry_name};
pub use make::{
    appropriate_vec_len, detect_offsets, detect_problem_tails, fixup_gemm_offsets, fixup_trxm_offsets,
    make_solution_seq, select_vectorization,
};
pub use problem_iter::{matr_block_height, ProblemIterator};
pub use step::{prob_dims, prob_offsets, SolutionSeq, SolutionStep, MAX_KERNELS_PER_STEP};
