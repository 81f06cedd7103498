//! Solution steps: single kernel launches carved out of a BLAS call.
//!
//! The problem extent of a step is viewed as a [`SubproblemDim`]: `y` along
//! the rows of the result, `x` along its columns and `bwidth` along K. For a
//! right side TRMM or TRSM the roles of M and N swap, so that `y` always
//! runs along the triangular matrix.

use std::fmt;
use std::sync::Arc;

use kgen_blas::{BlasFunction, BlasKargs, KernelExtraFlags, KernelType, MemoryPattern, Side, SolverId};
use kgen_emit::{PGranularity, SDimComponent, SubproblemDim, MAX_SUBDIMS};

use crate::cache::Kernel;
use crate::device::{CommandQueue, Event};

/// Kernels one step may launch: compute plus the two image preparations.
pub const MAX_KERNELS_PER_STEP: usize = 3;

fn swaps_mn(args: &BlasKargs) -> bool {
    args.func.is_triangular() && args.side == Side::Right
}

/// Extent of the problem described by `args`.
pub fn prob_dims(args: &BlasKargs) -> SubproblemDim {
    let (y, x) = if swaps_mn(args) { (args.n, args.m) } else { (args.m, args.n) };
    SubproblemDim::new(y, x, args.k, y, x)
}

/// Position of the problem described by `args` inside the whole call.
pub fn prob_offsets(args: &BlasKargs) -> SubproblemDim {
    let (y, x) = if swaps_mn(args) {
        (args.offset_n, args.offset_m)
    } else {
        (args.offset_m, args.offset_n)
    };
    SubproblemDim::new(y, x, args.offset_k, 0, 0)
}

pub fn set_prob_dims(args: &mut BlasKargs, dims: &SubproblemDim) {
    if swaps_mn(args) {
        args.n = dims.y;
        args.m = dims.x;
    } else {
        args.m = dims.y;
        args.n = dims.x;
    }
    args.k = dims.bwidth;
}

pub fn set_prob_offsets(args: &mut BlasKargs, offs: &SubproblemDim) {
    if swaps_mn(args) {
        args.offset_n = offs.y;
        args.offset_m = offs.x;
    } else {
        args.offset_m = offs.y;
        args.offset_n = offs.x;
    }
    args.offset_k = offs.bwidth;
}

/// One kernel launch of a [`SolutionSeq`].
#[derive(Clone)]
pub struct SolutionStep {
    pub func: BlasFunction,
    pub kernels: [Option<Arc<Kernel>>; MAX_KERNELS_PER_STEP],
    pub args: BlasKargs,
    pub queue: Arc<dyn CommandQueue>,
    /// Decomposition levels, coarsest first; `nr_levels` of them are used.
    pub subdims: [SubproblemDim; MAX_SUBDIMS],
    pub nr_levels: usize,
    pub pgran: PGranularity,
    pub extra_flags: KernelExtraFlags,
    pub pattern: Option<(SolverId, MemoryPattern)>,
    /// Events the first launch of the step waits for.
    pub wait_list: Vec<Event>,
    /// The step also waits for the step before it in the sequence.
    pub after_previous: bool,
    /// Completion event of the last launch, once executed.
    pub event: Option<Event>,
    /// Steps left without work by a division are skipped.
    pub active: bool,
}

impl fmt::Debug for SolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolutionStep")
            .field("func", &self.func)
            .field("device", &self.queue.device().name())
            .field("dims", &prob_dims(&self.args))
            .field("offsets", &prob_offsets(&self.args))
            .field("subdims", &self.levels())
            .field("pgran", &self.pgran)
            .field("flags", &self.extra_flags)
            .field("pattern", &self.pattern.as_ref().map(|(_, p)| p.name))
            .field("after_previous", &self.after_previous)
            .field("active", &self.active)
            .finish()
    }
}

impl SolutionStep {
    pub fn new(args: BlasKargs, queue: Arc<dyn CommandQueue>) -> Self {
        let wf_size = queue.device().wavefront_size();
        Self {
            func: args.func,
            kernels: [None, None, None],
            extra_flags: args.base_flags(),
            args,
            queue,
            subdims: [SubproblemDim::default(); MAX_SUBDIMS],
            nr_levels: 0,
            pgran: PGranularity {
                wf_size,
                ..PGranularity::default()
            },
            pattern: None,
            wait_list: Vec::new(),
            after_previous: false,
            event: None,
            active: true,
        }
    }

    /// Used decomposition levels.
    pub fn levels(&self) -> &[SubproblemDim] {
        &self.subdims[..self.nr_levels.min(MAX_SUBDIMS)]
    }

    pub fn set_levels(&mut self, levels: &[SubproblemDim]) {
        let n = levels.len().min(MAX_SUBDIMS);
        self.subdims = [SubproblemDim::default(); MAX_SUBDIMS];
        self.subdims[..n].copy_from_slice(&levels[..n]);
        self.nr_levels = n;
    }

    pub fn kernel(&self, kern_type: KernelType) -> Option<&Arc<Kernel>> {
        self.kernels[kern_type.index()].as_ref()
    }

    /// Recompute the flags implied by the arguments, dropping derived ones.
    pub fn reset_flags(&mut self) {
        self.extra_flags = self.args.base_flags();
    }

    /// Cut `chunk` off this step along `comp`.
    ///
    /// The cut part is returned and this step keeps the remainder. A
    /// backward split takes the chunk from the far end. The chunk is
    /// clamped to the remaining extent.
    pub fn split(&mut self, comp: SDimComponent, chunk: usize, backward: bool) -> SolutionStep {
        let mut rem_dim = prob_dims(&self.args);
        let mut rem_off = prob_offsets(&self.args);
        let mut cut_dim = rem_dim;
        let mut cut_off = rem_off;

        let whole = rem_dim.get(comp);
        let chunk = chunk.min(whole);
        if backward {
            cut_off.set(comp, rem_off.get(comp) + whole - chunk);
        } else {
            rem_off.set(comp, rem_off.get(comp) + chunk);
        }
        cut_dim.set(comp, chunk);
        rem_dim.set(comp, whole - chunk);

        let mut cut = self.clone();
        set_prob_dims(&mut self.args, &rem_dim);
        set_prob_offsets(&mut self.args, &rem_off);
        set_prob_dims(&mut cut.args, &cut_dim);
        set_prob_offsets(&mut cut.args, &cut_off);
        cut
    }
}

/// Ordered steps of one BLAS call.
#[derive(Debug, Clone, Default)]
pub struct SolutionSeq {
    steps: Vec<SolutionStep>,
}

impl SolutionSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: SolutionStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[SolutionStep] {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut [SolutionStep] {
        &mut self.steps
    }

    /// Steps that will launch kernels.
    pub fn active_steps(&self) -> impl Iterator<Item = &SolutionStep> {
        self.steps.iter().filter(|s| s.active)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Completion event of the last executed step.
    pub fn last_event(&self) -> Option<Event> {
        self.steps.iter().rev().find_map(|s| s.event)
    }
}

impl From<Vec<SolutionStep>> for SolutionSeq {
    fn from(steps: Vec<SolutionStep>) -> Self {
        Self { steps }
    }
}

impl IntoIterator for SolutionSeq {
    type Item = SolutionStep;
    type IntoIter = std::vec::IntoIter<SolutionStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}
