//! Building a [`SolutionSeq`] for one BLAS call.
//!
//! The call is divided between the queues, each part is decomposed into
//! steps, and every step gets a solver pattern, a decomposition, its
//! problem specific flags and a built kernel.

use std::sync::Arc;

use kgen_blas::{
    BlasFunction, BlasKargs, CheckCalcPGran, GenError, KernelExtra, KernelExtraFlags, KernelType,
    MatrixRole, MemoryPattern, Side, SolverTable,
};
use kgen_emit::{SubproblemDim, SUBDIM_UNUSED};
use tracing::{debug, info};

use crate::decompose::decompose_step;
use crate::device::{CommandQueue, Event};
use crate::divide::divide_problem;
use crate::env::Environment;
use crate::error::{Result, SolveError};
use crate::kernel::build_kernel;
use crate::step::{prob_dims, prob_offsets, SolutionSeq, SolutionStep};

type F = KernelExtraFlags;

/// Bytes moved by one copy vector.
const COPY_VEC_BYTES: usize = 16;

/// Widest vector length dividing both `ld` and `twidth`.
pub fn appropriate_vec_len(ld: usize, tsize: usize, twidth: usize, level3: bool) -> usize {
    let twidth = twidth.max(1);
    let mut vlen = (COPY_VEC_BYTES / tsize).max(1);
    if level3 {
        vlen *= 2;
    }
    while vlen > twidth {
        vlen /= 2;
    }
    while ld % vlen != 0 || twidth % vlen != 0 {
        vlen /= 2;
    }
    vlen
}

/// Layout in which the kernel walks the tile of `role`.
fn tile_col_major(func: BlasFunction, flags: KernelExtraFlags, role: MatrixRole) -> bool {
    if !func.is_triangular() {
        return flags.is_col_major_access(func, role);
    }
    let right = flags.contains(F::SIDE_RIGHT);
    let role = if role == MatrixRole::C { MatrixRole::B } else { role };
    flags.is_col_major_access(func, role) ^ right
}

/// Pick per-matrix vector lengths for a step and mark the matrices whose
/// leading dimension or offset cannot be copied with whole vectors.
pub fn select_vectorization(step: &SolutionStep, extra: &mut KernelExtra) {
    let func = step.func;
    let args = &step.args;
    let tsize = args.dtype.size();
    let levels = step.levels();
    let Some(dim) = levels.get(1).or(levels.first()).copied() else {
        return;
    };

    let copy_vlen = (COPY_VEC_BYTES / tsize).max(1);
    let no_copy = [F::NO_COPY_VEC_A, F::NO_COPY_VEC_B, F::NO_COPY_VEC_C];
    let mut flags = extra.flags;
    let mut lens = [usize::MAX; 3];

    for mut sizes in [[args.lda, args.ldb, args.ldc], [args.off_a, args.off_bx, args.off_cy]] {
        if func == BlasFunction::Syrk {
            sizes[1] = sizes[0];
        }
        if func.is_triangular() {
            sizes[2] = sizes[1];
        }
        for (size, flag) in sizes.iter().zip(no_copy) {
            if size % copy_vlen != 0 {
                flags.insert(flag);
            }
        }

        let widths = [
            if tile_col_major(func, flags, MatrixRole::A) { dim.y } else { dim.bwidth },
            if tile_col_major(func, flags, MatrixRole::B) { dim.bwidth } else { dim.x },
            if tile_col_major(func, flags, MatrixRole::C) { dim.y } else { dim.x },
        ];
        for ((len, size), width) in lens.iter_mut().zip(sizes).zip(widths) {
            *len = (*len).min(appropriate_vec_len(size, tsize, width, true));
        }
    }

    extra.vec_len_a = lens[0];
    extra.vec_len_b = lens[1];
    extra.vec_len_c = lens[2];
    extra.vec_len = lens.iter().copied().min().unwrap_or(1);
    extra.flags = flags;
}

fn fold(offset: usize, col_major: bool, ld: usize, row: usize, col: usize) -> usize {
    offset + if col_major { row + col * ld } else { row * ld + col }
}

/// Move the sub-problem position of a GEMM step into its buffer offsets.
pub fn fixup_gemm_offsets(args: &mut BlasKargs, flags: KernelExtraFlags) {
    let f = BlasFunction::Gemm;
    args.off_a = fold(
        args.off_a,
        flags.is_col_major_access(f, MatrixRole::A),
        args.lda,
        args.offset_m,
        args.offset_k,
    );
    args.off_bx = fold(
        args.off_bx,
        flags.is_col_major_access(f, MatrixRole::B),
        args.ldb,
        args.offset_k,
        args.offset_n,
    );
    args.off_cy = fold(
        args.off_cy,
        flags.is_col_major_access(f, MatrixRole::C),
        args.ldc,
        args.offset_m,
        args.offset_n,
    );
    args.offset_m = 0;
    args.offset_n = 0;
    args.offset_k = 0;
}

/// Move the sub-problem position of a TRMM or TRSM step into its buffer
/// offsets. A moves along its diagonal, B to the first element of the part.
pub fn fixup_trxm_offsets(args: &mut BlasKargs, flags: KernelExtraFlags) {
    let t0 = prob_offsets(args).y;
    args.off_a += t0 * args.lda + t0;
    args.off_bx = fold(
        args.off_bx,
        flags.is_col_major_access(args.func, MatrixRole::B),
        args.ldb,
        args.offset_m,
        args.offset_n,
    );
    args.offset_m = 0;
    args.offset_n = 0;
    args.offset_k = 0;
}

fn has_tail(total: usize, block: usize) -> bool {
    block != SUBDIM_UNUSED && block != 0 && total % block != 0
}

/// Set the tail flags of a step from its problem extent and decomposition.
pub fn detect_problem_tails(step: &mut SolutionStep) {
    let levels = step.levels();
    let Some(top) = levels.first().copied() else {
        return;
    };
    let item = levels.get(1).copied().unwrap_or(top);
    let glob = prob_dims(&step.args);
    let tails = |d: &SubproblemDim| {
        (
            has_tail(glob.y, d.y),
            has_tail(glob.x, d.x),
            has_tail(glob.bwidth, d.bwidth),
        )
    };
    let (mut m, mut n, k) = tails(&top);
    let (mut ml, mut nl, kl) = tails(&item);
    if step.func.is_triangular() && step.args.side == Side::Right {
        std::mem::swap(&mut m, &mut n);
        std::mem::swap(&mut ml, &mut nl);
    }

    let flags = &mut step.extra_flags;
    flags.remove(F::TAILS_M | F::TAILS_N | F::TAILS_K | F::TAILS_M_LOWER | F::TAILS_N_LOWER | F::TAILS_K_LOWER);
    flags.set(F::TAILS_M, m);
    flags.set(F::TAILS_N, n);
    flags.set(F::TAILS_K, k);
    flags.set(F::TAILS_M_LOWER, ml);
    flags.set(F::TAILS_N_LOWER, nl);
    flags.set(F::TAILS_K_LOWER, kl);
}

/// Set the flags telling the kernel which offset arguments it takes.
pub fn detect_offsets(step: &mut SolutionStep) {
    let args = &step.args;
    let all = args.scimage[0].is_some();
    let flags = &mut step.extra_flags;
    flags.set(F::STARTM_NOT_ZERO, all || args.offset_m != 0);
    flags.set(F::STARTN_NOT_ZERO, all || args.offset_n != 0);
    flags.set(F::A_OFF_NOT_ZERO, all || args.off_a != 0);
    flags.set(F::BX_OFF_NOT_ZERO, all || args.off_bx != 0);
    flags.set(F::CY_OFF_NOT_ZERO, all || args.off_cy != 0);
}

/// Whether the item level of a two level decomposition outgrows the
/// problem.
pub fn dims_exceed_problem_size(step: &SolutionStep) -> bool {
    if step.nr_levels != 2 {
        return false;
    }
    let item = step.subdims[1];
    let glob = prob_dims(&step.args);
    item.x > glob.x || item.y > glob.y || item.bwidth > glob.bwidth
}

/// Shrink the item level towards the problem extent while keeping the work
/// group layout.
pub fn minimal_step_granulation(dims: &mut [SubproblemDim; 2], glob: &SubproblemDim) {
    let fx = (dims[0].x / dims[1].x.max(1)).max(1);
    let fy = (dims[0].y / dims[1].y.max(1)).max(1);

    let shrink = |item: usize, total: usize| -> usize {
        let mut v = item;
        while v > 1 && v / 2 >= total {
            v /= 2;
        }
        v
    };
    let x = shrink(dims[1].x, glob.x);
    let y = shrink(dims[1].y, glob.y);
    let bwidth = shrink(dims[1].bwidth, glob.bwidth);

    dims[1] = SubproblemDim::new(y, x, bwidth, y, x);
    dims[0] = SubproblemDim::new(y * fy, x * fx, bwidth, y * fy, x * fx);
}

fn setup_granulation(step: &mut SolutionStep, pattern: &MemoryPattern) -> Result<()> {
    let dtype = step.args.dtype;
    let sops = pattern.sops.as_ref();
    let (mut dims, mut pgran) = sops.default_decomposition(dtype, step.pgran.wf_size);
    pgran.wf_size = step.pgran.wf_size;
    let nr_levels = pattern.nr_levels.clamp(1, 2);
    step.set_levels(&dims[..nr_levels]);
    step.pgran = pgran;

    if dims_exceed_problem_size(step) {
        let default = dims;
        minimal_step_granulation(&mut dims, &prob_dims(&step.args));
        let mut candidate = pgran;
        if sops.check_decomposition(&dims, &mut candidate, dtype, CheckCalcPGran::Calc)
            && sops.check_decomposition(&dims, &mut candidate, dtype, CheckCalcPGran::Check)
        {
            debug!(solver = pattern.name, subdims = ?dims, "shrunk decomposition to the problem");
            step.set_levels(&dims[..nr_levels]);
            step.pgran = candidate;
        } else {
            debug!(solver = pattern.name, subdims = ?default, "kept default decomposition");
        }
    }

    let mut check = step.pgran;
    if !sops.check_decomposition(step.levels(), &mut check, dtype, CheckCalcPGran::Check) {
        return Err(GenError::InvalidDecomposition(format!(
            "{} rejects {:?} with {}",
            pattern.name,
            step.levels(),
            step.pgran
        ))
        .into());
    }
    Ok(())
}

/// Resolve the solver and every kernel parameter of one step.
fn prepare_step(table: &SolverTable, step: &mut SolutionStep) -> Result<KernelExtra> {
    if step.queue.device().is_amd() {
        step.extra_flags |= F::VENDOR_AMD | F::ENABLE_MAD;
    }
    let sid = table
        .select(&step.args, step.extra_flags)
        .ok_or_else(|| GenError::Unsupported(format!("no solver pattern fits {}", step.func)))?;
    let pattern = table
        .get(sid)
        .cloned()
        .ok_or_else(|| GenError::Unsupported(format!("unknown solver {sid:?}")))?;

    setup_granulation(step, &pattern)?;
    detect_problem_tails(step);

    let mut extra = KernelExtra::new(step.args.dtype, step.extra_flags);
    let levels = step.levels().to_vec();
    pattern.sops.fixup_args(&mut step.args, &mut extra, &levels);
    step.extra_flags = extra.flags;
    detect_offsets(step);
    extra.flags = step.extra_flags;
    extra.kern_type = KernelType::Compute;

    select_vectorization(step, &mut extra);
    step.extra_flags = extra.flags;
    pattern.sops.set_build_options(&mut extra);

    debug!(
        func = %step.func,
        solver = pattern.name,
        subdims = ?step.levels(),
        pgran = %step.pgran,
        flags = %step.extra_flags,
        vec_len = extra.vec_len,
        "prepared step"
    );
    step.pattern = Some((sid, pattern));
    Ok(extra)
}

#[cfg(feature = "parallel")]
fn build_kernels(env: &Environment, steps: &[SolutionStep], extras: &[KernelExtra]) -> Vec<Result<Arc<crate::cache::Kernel>>> {
    use rayon::prelude::*;

    steps
        .par_iter()
        .zip(extras.par_iter())
        .map(|(step, extra)| build_kernel(env, step, extra))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn build_kernels(env: &Environment, steps: &[SolutionStep], extras: &[KernelExtra]) -> Vec<Result<Arc<crate::cache::Kernel>>> {
    steps
        .iter()
        .zip(extras)
        .map(|(step, extra)| build_kernel(env, step, extra))
        .collect()
}

/// Turn one BLAS call into a sequence of steps with built kernels.
///
/// `wait_list` is attached to the first step of every queue.
pub fn make_solution_seq(
    env: &Environment,
    kargs: &BlasKargs,
    queues: &[Arc<dyn CommandQueue>],
    wait_list: &[Event],
) -> Result<SolutionSeq> {
    if queues.is_empty() {
        return Err(SolveError::InvalidValue("no command queues given".into()));
    }

    let mut args = kargs.clone();
    if args.func.is_symmetric_rank() {
        args.m = args.n;
    }
    if args.func.is_triangular() {
        args.k = prob_dims(&args).y;
    }

    let mut steps = Vec::with_capacity(queues.len());
    let mut total_cus = 0u32;
    for queue in queues {
        let device = queue.device();
        if args.dtype.is_double_based() && !device.has_native_double() {
            debug!(device = device.name(), "skipping device without double precision");
            continue;
        }
        total_cus += device.compute_units();
        let mut step = SolutionStep::new(args.clone(), Arc::clone(queue));
        step.wait_list = wait_list.to_vec();
        steps.push(step);
    }
    if steps.is_empty() {
        return Err(GenError::Unsupported(format!("no device supports {}", args.dtype)).into());
    }
    if total_cus == 0 {
        return Err(SolveError::InvalidValue("devices report no compute units".into()));
    }

    let cfg = env.config();
    divide_problem(args.func, &mut steps, total_cus, cfg.division_alignment);

    let mut seq_steps: Vec<SolutionStep> = steps
        .into_iter()
        .filter(|s| s.active)
        .flat_map(|s| decompose_step(s, cfg))
        .collect();

    let table = env.table();
    let extras = seq_steps
        .iter_mut()
        .map(|step| prepare_step(table, step))
        .collect::<Result<Vec<_>>>()?;

    let kernels = build_kernels(env, &seq_steps, &extras);
    for (step, kernel) in seq_steps.iter_mut().zip(kernels) {
        step.kernels[KernelType::Compute.index()] = Some(kernel?);
    }

    info!(func = %args.func, dtype = %args.dtype, steps = seq_steps.len(), "solution sequence ready");
    Ok(SolutionSeq::from(seq_steps))
}
