//! Splitting one step into a chain of smaller steps.
//!
//! Large triangular problems are cut in two halves joined by a GEMM update,
//! and rank-k updates of awkward size get their diagonal handled in small
//! separate blocks. Every step after the first of a chain waits for the
//! one before it.

use kgen_blas::{ArgScalar, BlasFunction, GenConfig, KernelExtraFlags, Side, Transpose, Uplo};
use num_complex::Complex64;
use tracing::debug;

use crate::divide::align;
use crate::make::{fixup_gemm_offsets, fixup_trxm_offsets};
use crate::step::{prob_dims, prob_offsets, set_prob_dims, set_prob_offsets, SolutionStep};

type F = KernelExtraFlags;

/// Make every step after the first wait for its predecessor.
fn chain(steps: &mut [SolutionStep]) {
    for step in steps.iter_mut().skip(1) {
        step.after_previous = true;
        step.wait_list.clear();
    }
}

/// `-1 / alpha`, leaving a zero alpha alone.
fn neg_recip(alpha: ArgScalar) -> ArgScalar {
    match alpha {
        ArgScalar::Real(v) if v != 0.0 => ArgScalar::Real(-1.0 / v),
        ArgScalar::Complex(c) if c.norm_sqr() != 0.0 => ArgScalar::Complex(-(Complex64::new(1.0, 0.0) / c)),
        other => other,
    }
}

/// Restrict a triangular step to the rows `[start, start + len)` of its
/// triangle.
fn trxm_part(step: &SolutionStep, start: usize, len: usize) -> SolutionStep {
    let mut part = step.clone();
    let mut dims = prob_dims(&part.args);
    let mut offs = prob_offsets(&part.args);
    dims.y = len;
    dims.bwidth = len;
    offs.y = start;
    set_prob_dims(&mut part.args, &dims);
    set_prob_offsets(&mut part.args, &offs);
    part.reset_flags();
    part
}

/// Cut a TRMM or TRSM step into two triangular halves and the GEMM
/// update between them.
///
/// ```text
/// +---+---+       +---+
/// | 1 | G |       | 1 |
/// +---+---+       +---+---+
///     | 2 |       | G | 2 |
///     +---+       +---+---+
/// ```
pub fn decompose_trxm(step: SolutionStep, cfg: &GenConfig) -> Vec<SolutionStep> {
    let args = &step.args;
    let dtype = args.dtype;
    if step.func == BlasFunction::Trmm
        && !dtype.is_double_based()
        && step.extra_flags.is_col_major_access(step.func, kgen_blas::MatrixRole::B)
    {
        return vec![step];
    }

    let t = prob_dims(args).y;
    if t < cfg.decomposition_threshold(dtype) {
        return vec![step];
    }
    let h = align(t / 2, cfg.division_alignment);
    if h == 0 || h >= t {
        return vec![step];
    }
    let t0 = prob_offsets(args).y;
    let upper = (args.uplo == Uplo::Upper) != args.trans_a.is_trans();
    let left = args.side == Side::Left;

    let mut first = trxm_part(&step, t0, h);
    let mut second = trxm_part(&step, t0 + h, t - h);

    let mut gemm = step.clone();
    gemm.func = BlasFunction::Gemm;
    let g = &mut gemm.args;
    g.func = BlasFunction::Gemm;
    g.c = args.b;
    g.ldc = args.ldb;
    g.off_cy = args.off_bx;
    g.beta = ArgScalar::one(dtype);
    if step.func == BlasFunction::Trsm {
        g.alpha = neg_recip(args.alpha);
    }
    if left {
        g.trans_b = Transpose::NoTrans;
        if upper {
            (g.offset_m, g.m) = (t0, h);
            (g.offset_k, g.k) = (t0 + h, t - h);
        } else {
            (g.offset_m, g.m) = (t0 + h, t - h);
            (g.offset_k, g.k) = (t0, h);
        }
    } else {
        g.trans_a = Transpose::NoTrans;
        (g.a, g.lda, g.off_a) = (args.b, args.ldb, args.off_bx);
        g.trans_b = args.trans_a;
        (g.b, g.ldb, g.off_bx) = (args.a, args.lda, args.off_a);
        if upper {
            (g.offset_n, g.n) = (t0 + h, t - h);
            (g.offset_k, g.k) = (t0, h);
        } else {
            (g.offset_n, g.n) = (t0, h);
            (g.offset_k, g.k) = (t0 + h, t - h);
        }
    }
    gemm.reset_flags();

    // the half whose result feeds the update goes last
    let swap = match (left, step.func) {
        (true, BlasFunction::Trmm) | (false, BlasFunction::Trsm) => !upper,
        (true, BlasFunction::Trsm) | (false, BlasFunction::Trmm) => upper,
        _ => false,
    };
    if swap {
        std::mem::swap(&mut first, &mut second);
    }

    debug!(
        func = %step.func,
        triangle = t,
        half = h,
        first = ?prob_offsets(&first.args),
        "decomposed triangular step"
    );
    let mut out = vec![first, gemm, second];
    chain(&mut out);
    out
}

/// Restrict a rank-k step to a rectangle of its result.
fn syrk_part(step: &SolutionStep, rows: (usize, usize), cols: (usize, usize), flags: KernelExtraFlags) -> SolutionStep {
    let mut part = step.clone();
    (part.args.offset_m, part.args.m) = rows;
    (part.args.offset_n, part.args.n) = cols;
    part.extra_flags |= flags;
    part
}

/// Split a SYRK step whose side is not a multiple of the decomposition
/// alignment into diagonal blocks and the panels between them.
///
/// Diagonal blocks are evaluated on their own; panels lie strictly inside
/// the stored triangle.
pub fn decompose_syrk(step: SolutionStep, cfg: &GenConfig) -> Vec<SolutionStep> {
    let args = &step.args;
    let n = args.n;
    if n % cfg.syrk_decompose_alignment == 0 || n < cfg.decomposition_threshold(args.dtype) / 2 {
        return vec![step];
    }
    if args.m != n || args.offset_m != args.offset_n {
        debug!(m = args.m, n, "rank-k step is not a diagonal square, kept whole");
        return vec![step];
    }

    let block = cfg.syrk_diagonal_block;
    let start = args.offset_m;
    let upper = step.extra_flags.is_upper();
    let nblocks = n.div_ceil(block);
    let mut out = Vec::with_capacity(2 * nblocks);
    for j in 0..nblocks {
        let lo = j * block;
        let len = block.min(n - lo);
        let diag = (start + lo, len);
        out.push(syrk_part(
            &step,
            diag,
            diag,
            F::SYRK_SEPARATE_DIAGONAL | F::SYRK_EVALUATE_DIAGONAL,
        ));

        let rest = n - lo - len;
        if rest > 0 {
            let beyond = (start + lo + len, rest);
            let (rows, cols) = if upper { (diag, beyond) } else { (beyond, diag) };
            out.push(syrk_part(&step, rows, cols, F::SYRK_SEPARATE_DIAGONAL));
        }
    }

    debug!(func = %step.func, n, block, steps = out.len(), "decomposed rank-k step");
    chain(&mut out);
    out
}

/// Split a SYR2K step into two rank-k passes, `A·Bᵀ` then `B·Aᵀ`, each
/// decomposed like SYRK.
pub fn decompose_syr2k(step: SolutionStep, cfg: &GenConfig) -> Vec<SolutionStep> {
    if step.args.n < cfg.decomposition_threshold(step.args.dtype) / 2 {
        return vec![step];
    }

    let mut first = step.clone();
    first.reset_flags();
    first.extra_flags.remove(F::SYRK_2K_RANK);

    let mut second = step;
    let a = &mut second.args;
    std::mem::swap(&mut a.a, &mut a.b);
    std::mem::swap(&mut a.lda, &mut a.ldb);
    std::mem::swap(&mut a.off_a, &mut a.off_bx);
    a.beta = ArgScalar::one(a.dtype);
    second.reset_flags();
    second.extra_flags.remove(F::SYRK_2K_RANK);

    let mut out = decompose_syrk(first, cfg);
    out.extend(decompose_syrk(second, cfg));
    chain(&mut out);
    out
}

/// Decompose `step` as its function requires and fold sub-problem
/// positions into buffer offsets where the kernels expect them there.
pub fn decompose_step(step: SolutionStep, cfg: &GenConfig) -> Vec<SolutionStep> {
    let mut steps = match step.func {
        BlasFunction::Gemm => vec![step],
        BlasFunction::Trmm | BlasFunction::Trsm => decompose_trxm(step, cfg),
        BlasFunction::Syrk => decompose_syrk(step, cfg),
        BlasFunction::Syr2k => decompose_syr2k(step, cfg),
    };
    for s in &mut steps {
        match s.func {
            BlasFunction::Gemm => fixup_gemm_offsets(&mut s.args, s.extra_flags),
            BlasFunction::Trmm | BlasFunction::Trsm => fixup_trxm_offsets(&mut s.args, s.extra_flags),
            BlasFunction::Syrk | BlasFunction::Syr2k => {}
        }
    }
    steps
}
