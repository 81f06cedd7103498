use kgen_blas::{GenError, KernelExtraFlags, KernelType};
use kgen_emit::{PGranularity, SubproblemDim};

use crate::device::DeviceError;

/// Everything known about a kernel the device compiler rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub device_name: String,
    pub vendor: String,
    pub source: String,
    pub log: String,
    pub subdims: Vec<SubproblemDim>,
    pub pgran: PGranularity,
    pub flags: KernelExtraFlags,
    pub kern_type: KernelType,
}

/// Errors raised while decomposing, building or launching a BLAS call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    #[error(transparent)]
    Gen(#[from] GenError),

    #[error("kernel build failed on {} ({}): {}", .0.device_name, .0.vendor, .0.log)]
    Build(Box<BuildFailure>),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("out of host memory")]
    OutOfMemory,

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Convenience alias for `Result<T, SolveError>`.
pub type Result<T> = std::result::Result<T, SolveError>;
