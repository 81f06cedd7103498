//! Solver patterns.
//!
//! A [`SolverOps`] implementation bundles everything the decomposer needs to
//! know about one way of evaluating a BLAS function: how to generate its
//! kernel, how to fill the kernel arguments, how to size the work space and
//! which decompositions it accepts. The [`SolverTable`] lists the patterns
//! available per function.
//!
//! # Core Types
//!
//! - [`SolverOps`]: per-pattern behaviour
//! - [`MemoryPattern`]: a registered pattern with its decomposition depth
//! - [`SolverTable`]: patterns grouped by function

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::DataType;
use tracing::debug;

use crate::config::GenConfig;
use crate::error::Result;
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs};
use crate::kargs::KernelArgs;
use crate::threads::DecompositionAxis;

/// Work space properties of a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SolverFlags(u32);

impl SolverFlags {
    pub const WSPACE_1D: Self = Self(0x1);
    pub const WSPACE_2D: Self = Self(0x2);
    /// Top level blocks must be square.
    pub const TOP_INPUT_SQUARE_BLOCKS: Self = Self(0x4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SolverFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Expected performance of a pattern for a given problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternPerformance {
    NotSupported,
    Poor,
    Average,
    Good,
    Best,
}

/// Whether [`SolverOps::check_decomposition`] validates a granularity or
/// computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckCalcPGran {
    Check,
    Calc,
}

/// One way of solving a BLAS function.
pub trait SolverOps: Send + Sync {
    fn name(&self) -> &'static str;

    fn flags(&self) -> SolverFlags;

    /// Emit the kernel for the given decomposition.
    fn generate(
        &self,
        ctx: &mut KgenContext,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        extra: &KernelExtra,
    ) -> Result<()>;

    /// Kernel arguments in declaration order.
    fn assign_kargs(&self, kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs;

    /// Whether the local memory a decomposition needs fits in `lds_size`
    /// bytes.
    fn is_fit_to_lds(&self, _subdims: &[SubproblemDim], _dtype: DataType, _lds_size: usize) -> bool {
        true
    }

    fn pattern_perf(&self, _flags: KernelExtraFlags, _kargs: &BlasKargs) -> PatternPerformance {
        PatternPerformance::Average
    }

    /// Decomposition axis mapped onto work space dimension 0.
    fn inner_decomposition_axis(&self, _kargs: &BlasKargs) -> DecompositionAxis {
        DecompositionAxis::Y
    }

    /// Global work size, when the generic computation does not fit.
    fn calc_threads(
        &self,
        _subdims: &[SubproblemDim],
        _pgran: &PGranularity,
        _kargs: &BlasKargs,
        _extra: &KernelExtra,
    ) -> Option<[usize; 2]> {
        None
    }

    /// Last adjustment of arguments and kernel parameters before building.
    fn fixup_args(&self, _kargs: &mut BlasKargs, _extra: &mut KernelExtra, _subdims: &[SubproblemDim]) {}

    /// Compiler options the kernel needs.
    fn set_build_options(&self, extra: &mut KernelExtra) {
        if extra.flags.contains(KernelExtraFlags::ENABLE_MAD) {
            extra.add_build_option("-cl-mad-enable");
        }
    }

    /// Decomposition used when no tuned one is known.
    fn default_decomposition(&self, dtype: DataType, wf_size: u32) -> ([SubproblemDim; 2], PGranularity);

    /// Validate `subdims` against `pgran`, or compute `pgran` from them.
    fn check_decomposition(
        &self,
        subdims: &[SubproblemDim],
        pgran: &mut PGranularity,
        dtype: DataType,
        check: CheckCalcPGran,
    ) -> bool;
}

/// A solver registered for a function.
#[derive(Clone)]
pub struct MemoryPattern {
    pub name: &'static str,
    /// Decomposition levels the solver uses.
    pub nr_levels: usize,
    /// Level distributed between compute units.
    pub cu_level: usize,
    /// Level distributed between work items.
    pub th_level: usize,
    pub sops: Arc<dyn SolverOps>,
}

impl fmt::Debug for MemoryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPattern")
            .field("name", &self.name)
            .field("nr_levels", &self.nr_levels)
            .field("cu_level", &self.cu_level)
            .field("th_level", &self.th_level)
            .finish()
    }
}

impl MemoryPattern {
    pub fn new(sops: Arc<dyn SolverOps>) -> Self {
        Self {
            name: sops.name(),
            nr_levels: 2,
            cu_level: 0,
            th_level: 1,
            sops,
        }
    }
}

/// Identifier of a pattern inside a [`SolverTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SolverId {
    pub func: BlasFunction,
    pub pattern: usize,
}

/// Patterns available per BLAS function.
#[derive(Debug, Clone, Default)]
pub struct SolverTable {
    entries: Vec<(BlasFunction, Vec<MemoryPattern>)>,
}

impl SolverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in generator.
    pub fn standard(cfg: &GenConfig) -> Self {
        use crate::gens::{gemm::GemmBlock, gemm_subgroup::GemmSubgroup, syrxk::SyrxkBlock, trmm::TrmmBlock, trsm::TrsmColumn};

        let mut table = Self::new();
        table.register(BlasFunction::Gemm, Arc::new(GemmBlock::new(cfg)));
        table.register(BlasFunction::Gemm, Arc::new(GemmSubgroup::new(cfg)));
        table.register(BlasFunction::Trmm, Arc::new(TrmmBlock::new(cfg)));
        table.register(BlasFunction::Trsm, Arc::new(TrsmColumn::new(cfg)));
        table.register(BlasFunction::Syrk, Arc::new(SyrxkBlock::new(cfg, false)));
        table.register(BlasFunction::Syr2k, Arc::new(SyrxkBlock::new(cfg, true)));
        table
    }

    /// Append a pattern for `func` and return its id.
    pub fn register(&mut self, func: BlasFunction, sops: Arc<dyn SolverOps>) -> SolverId {
        let pattern = MemoryPattern::new(sops);
        let idx = match self.entries.iter().position(|(f, _)| *f == func) {
            Some(i) => i,
            None => {
                self.entries.push((func, Vec::new()));
                self.entries.len() - 1
            }
        };
        let patterns = &mut self.entries[idx].1;
        patterns.push(pattern);
        SolverId {
            func,
            pattern: patterns.len() - 1,
        }
    }

    pub fn patterns(&self, func: BlasFunction) -> &[MemoryPattern] {
        self.entries
            .iter()
            .find(|(f, _)| *f == func)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, id: SolverId) -> Option<&MemoryPattern> {
        self.patterns(id.func).get(id.pattern)
    }

    /// Best performing supported pattern; the earliest wins ties.
    pub fn select(&self, kargs: &BlasKargs, flags: KernelExtraFlags) -> Option<SolverId> {
        let mut best: Option<(PatternPerformance, usize)> = None;
        for (i, pattern) in self.patterns(kargs.func).iter().enumerate() {
            let perf = pattern.sops.pattern_perf(flags, kargs);
            if perf == PatternPerformance::NotSupported {
                continue;
            }
            if best.map_or(true, |(p, _)| perf > p) {
                best = Some((perf, i));
            }
        }
        let (perf, pattern) = best?;
        debug!(func = %kargs.func, pattern, ?perf, "selected solver pattern");
        Some(SolverId {
            func: kargs.func,
            pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::Order;

    #[test]
    fn test_standard_table_covers_functions() {
        let table = SolverTable::standard(&GenConfig::default());
        for func in BlasFunction::ALL {
            assert!(!table.patterns(func).is_empty(), "{func}");
        }
        assert_eq!(table.patterns(BlasFunction::Gemm).len(), 2);
    }

    #[test]
    fn test_select_prefers_better_pattern() {
        let table = SolverTable::standard(&GenConfig::default());
        let kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
        let id = table.select(&kargs, kargs.base_flags()).unwrap();
        // row-major, no transposes: the subgroup pattern reports GOOD
        assert_eq!(table.get(id).unwrap().name, "gemm-subgroup");

        let mut kargs = kargs;
        kargs.order = Order::ColumnMajor;
        let id = table.select(&kargs, kargs.base_flags()).unwrap();
        assert_eq!(table.get(id).unwrap().name, "gemm-block");
    }

    #[test]
    fn test_perf_ordering() {
        assert!(PatternPerformance::Best > PatternPerformance::Good);
        assert!(PatternPerformance::Poor > PatternPerformance::NotSupported);
        let f = SolverFlags::WSPACE_2D | SolverFlags::TOP_INPUT_SQUARE_BLOCKS;
        assert!(f.contains(SolverFlags::WSPACE_2D));
        assert!(!f.contains(SolverFlags::WSPACE_1D));
    }
}
