//! Per-kernel generation parameters that take part in the kernel cache key.

use kgen_tile::DataType;

use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, MatrixRole};

/// Kind of kernel launched by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelType {
    #[default]
    Compute,
    /// Copies a panel of A into a scratch image.
    PrepA,
    /// Copies a panel of B into a scratch image.
    PrepB,
}

impl KernelType {
    pub const ALL: [KernelType; 3] = [KernelType::Compute, KernelType::PrepA, KernelType::PrepB];

    pub fn index(self) -> usize {
        match self {
            KernelType::Compute => 0,
            KernelType::PrepA => 1,
            KernelType::PrepB => 2,
        }
    }
}

/// Solver specific tuning value stored with the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SolverPriv {
    #[default]
    None,
    /// Starting K offset, in elements, between neighbouring work groups.
    Staggered(u32),
}

impl SolverPriv {
    pub fn staggered(self) -> u32 {
        match self {
            SolverPriv::Staggered(v) => v,
            SolverPriv::None => 0,
        }
    }
}

/// Everything besides sub-dimensions that determines generated source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelExtra {
    pub dtype: DataType,
    pub flags: KernelExtraFlags,
    pub kern_type: KernelType,
    /// Vector length used when no per-matrix length is set.
    pub vec_len: usize,
    pub vec_len_a: usize,
    pub vec_len_b: usize,
    pub vec_len_c: usize,
    pub solver_priv: SolverPriv,
    pub build_options: Vec<String>,
}

impl KernelExtra {
    pub fn new(dtype: DataType, flags: KernelExtraFlags) -> Self {
        Self {
            dtype,
            flags,
            kern_type: KernelType::Compute,
            vec_len: 1,
            vec_len_a: 1,
            vec_len_b: 1,
            vec_len_c: 1,
            solver_priv: SolverPriv::None,
            build_options: Vec::new(),
        }
    }

    pub fn with_vec_len(mut self, vec_len: usize) -> Self {
        self.vec_len = vec_len;
        self.vec_len_a = vec_len;
        self.vec_len_b = vec_len;
        self.vec_len_c = vec_len;
        self
    }

    pub fn vec_len_for(&self, role: MatrixRole) -> usize {
        let len = match role {
            MatrixRole::A => self.vec_len_a,
            MatrixRole::B => self.vec_len_b,
            MatrixRole::C => self.vec_len_c,
        };
        if len == 0 {
            self.vec_len.max(1)
        } else {
            len
        }
    }

    /// Copy with the flags reduced to those relevant for `func`.
    pub fn masked_for(&self, func: BlasFunction) -> Self {
        let mut extra = self.clone();
        extra.flags = self.flags.masked_for(func);
        extra
    }

    /// Append a compiler option, ignoring duplicates.
    pub fn add_build_option(&mut self, opt: impl Into<String>) {
        let opt = opt.into();
        if !self.build_options.contains(&opt) {
            self.build_options.push(opt);
        }
    }

    /// Options joined as passed to the OpenCL compiler.
    pub fn build_options_string(&self) -> String {
        self.build_options.join(" ")
    }
}
