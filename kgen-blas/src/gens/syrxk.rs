//! SYRK and SYR2K block kernels.
//!
//! The kernel updates one triangle of the `M x N` rectangle of C starting at
//! `(startM, startN)`. Coordinates are absolute so the diagonal tests work
//! for any rectangle the decomposer carves out. The transposed operand is
//! read through the same pointer with swapped addressing.
//!
//! Diagonal handling:
//!
//! - tiles wholly on the unused side of the diagonal return early;
//! - with `SYRK_SEPARATE_DIAGONAL` alone, tiles crossing the diagonal return
//!   too and the rest store without a diagonal guard;
//! - otherwise every remaining tile stores under a `row >= col` (lower) or
//!   `row <= col` (upper) guard.

use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::DataType;

use super::gemm::{gen_hit_check, item_dims, mul_opts};
use super::tilemul::{gen_fetch_and_mul, Bound, FetchSpec, MulOpts};
use super::upres::{gen_result_update, UpdateKind, UpdateSpec};
use super::{
    declare_kernel, declare_precision, init_default_tiles, init_tail_tiles, kernel_name, offset_expr, offset_kargs,
    offset_params, shift_pointers, MatrixAccess, TileSet,
};
use crate::config::{DtypeTable, GenConfig, MAX_SYRK_ITEM};
use crate::error::Result;
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole, Uplo};
use crate::kargs::{KernelArg, KernelArgs};
use crate::solver::{CheckCalcPGran, SolverFlags, SolverOps};
use crate::threads::{calc_pgran_dedicated, decomp_sanity_check};

type F = KernelExtraFlags;

const MAX_ITEM_REGS: usize = 24;

fn syrxk_params(dtype: DataType, flags: KernelExtraFlags, with_b: bool) -> Vec<String> {
    let t = dtype.builtin_type();
    let mut params = vec![
        "uint M".to_string(),
        "uint N".to_string(),
        "uint K".to_string(),
        format!("const {t} alpha"),
        format!("const {t} beta"),
        format!("const __global {t} *restrict A"),
    ];
    if with_b {
        params.push(format!("const __global {t} *restrict B"));
    }
    params.push(format!("__global {t} *C"));
    params.push("uint lda".to_string());
    if with_b {
        params.push("uint ldb".to_string());
    }
    params.push("uint ldc".to_string());
    params.push("uint startM".to_string());
    params.push("uint startN".to_string());
    offset_params(flags, &mut params);
    params
}

/// One `C += X * Yᵀ` accumulation over the whole K range.
struct RankUpdate<'a> {
    x: &'a MatrixAccess,
    y_t: MatrixAccess,
}

#[allow(clippy::too_many_arguments)]
fn gen_k_loops(
    ctx: &mut KgenContext,
    tiles: &TileSet,
    updates: &[RankUpdate<'_>],
    rows: &Bound,
    cols: &Bound,
    bw: usize,
    tails_k: bool,
    opts: MulOpts,
) -> Result<()> {
    let kbase = if tails_k { "Kbase" } else { "K" };
    ctx.begin_branch(Some(&format!("for (uint k = 0u; k < {kbase}; k += {bw}u)")))?;
    for upd in updates {
        gen_fetch_and_mul(
            ctx,
            &FetchSpec::new(&tiles.a, upd.x, "coord.y", "k").rows(rows.clone()),
            &FetchSpec::new(&tiles.b, &upd.y_t, "k", "coord.x").cols(cols.clone()),
            &tiles.c,
            opts,
        )?;
    }
    ctx.end_branch(None)?;
    ctx.add_blank_line()?;

    if tails_k {
        let (at, bt) = init_tail_tiles(tiles);
        ctx.begin_branch(Some("for (uint k = Kbase; k < K; k++)"))?;
        at.declare_storage(ctx)?;
        bt.declare_storage(ctx)?;
        for upd in updates {
            gen_fetch_and_mul(
                ctx,
                &FetchSpec::new(&at, upd.x, "coord.y", "k").rows(rows.clone()),
                &FetchSpec::new(&bt, &upd.y_t, "k", "coord.x").cols(cols.clone()),
                &tiles.c,
                opts,
            )?;
        }
        ctx.end_branch(None)?;
        ctx.add_blank_line()?;
    }
    Ok(())
}

fn gen_syrxk(
    ctx: &mut KgenContext,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
    func: BlasFunction,
) -> Result<()> {
    let dims = item_dims(subdims)?;
    let flags = extra.flags;
    let dtype = extra.dtype;
    let with_b = func == BlasFunction::Syr2k;
    let (y1, x1, bw) = (dims.y, dims.x, dims.bwidth);
    let uplo = if flags.is_upper() { Uplo::Upper } else { Uplo::Lower };

    let cm = flags.is_col_major_access(func, MatrixRole::A);
    let acc_a = MatrixAccess::new("A", "lda", cm);
    let acc_b = MatrixAccess::new("B", "ldb", cm);
    let acc_c = MatrixAccess::new("C", "ldc", flags.is_col_major_access(func, MatrixRole::C));
    let tiles = init_default_tiles(func, dims, extra);
    let tails_k = flags.contains(F::TAILS_K_LOWER);

    let base = if with_b { "syr2kBlock" } else { "syrkBlock" };
    declare_precision(ctx, dtype)?;
    declare_kernel(ctx, pgran, &kernel_name(dtype, base), &syrxk_params(dtype, flags, with_b))?;
    ctx.begin_func_body()?;

    if tails_k {
        kgen_emit::kprintf!(ctx, "const uint Ktail = K % {bw}u;\nconst uint Kbase = K - Ktail;\n")?;
    }
    tiles.a.declare_storage(ctx)?;
    tiles.b.declare_storage(ctx)?;
    tiles.c.declare_storage(ctx)?;
    ctx.add_stmt("uint2 coord;\n")?;
    ctx.add_blank_line()?;

    kgen_emit::kprintf!(
        ctx,
        "coord.y = startM + {y1}u * (uint)get_global_id(0);\n\
         coord.x = startN + {x1}u * (uint)get_global_id(1);\n"
    )?;
    gen_hit_check(
        ctx,
        flags.contains(F::TAILS_M).then_some("startM + M"),
        flags.contains(F::TAILS_N).then_some("startN + N"),
    )?;

    let (unused, crossing) = match uplo {
        Uplo::Lower => (
            format!("coord.y + {y1}u <= coord.x"),
            format!("coord.y < {}", offset_expr("coord.x", x1.saturating_sub(1))),
        ),
        Uplo::Upper => (
            format!("coord.x + {x1}u <= coord.y"),
            format!("coord.x < {}", offset_expr("coord.y", y1.saturating_sub(1))),
        ),
    };
    ctx.begin_branch(Some(&format!("if ({unused})")))?;
    ctx.add_stmt("return;\n")?;
    ctx.end_branch(None)?;

    let separate_only =
        flags.contains(F::SYRK_SEPARATE_DIAGONAL) && !flags.contains(F::SYRK_EVALUATE_DIAGONAL);
    if separate_only {
        ctx.begin_branch(Some(&format!("if ({crossing})")))?;
        ctx.add_stmt("return;\n")?;
        ctx.end_branch(None)?;
    }
    ctx.add_blank_line()?;

    let mut ptrs = vec![("A", MatrixRole::A)];
    if with_b {
        ptrs.push(("B", MatrixRole::B));
    }
    ptrs.push(("C", MatrixRole::C));
    shift_pointers(ctx, flags, &ptrs)?;
    tiles.c.gen_zero(ctx)?;

    let rows = if flags.contains(F::TAILS_M_LOWER) {
        Bound::Clamp("startM + M".into())
    } else {
        Bound::None
    };
    let cols = if flags.contains(F::TAILS_N_LOWER) {
        Bound::Clamp("startN + N".into())
    } else {
        Bound::None
    };

    let mut updates = Vec::with_capacity(2);
    if with_b {
        updates.push(RankUpdate {
            x: &acc_a,
            y_t: acc_b.transposed(),
        });
        if flags.contains(F::SYRK_2K_RANK) {
            updates.push(RankUpdate {
                x: &acc_b,
                y_t: acc_a.transposed(),
            });
        }
    } else {
        updates.push(RankUpdate {
            x: &acc_a,
            y_t: acc_a.transposed(),
        });
    }
    let opts = MulOpts {
        conj_a: false,
        conj_b: false,
        ..mul_opts(flags)
    };
    gen_k_loops(ctx, &tiles, &updates, &rows, &cols, bw, tails_k, opts)?;

    let kind = if flags.contains(F::BETA_ZERO) {
        UpdateKind::Alpha
    } else {
        UpdateKind::AlphaBeta
    };
    let spec = UpdateSpec::new(&tiles.c, &acc_c, "coord.y", "coord.x", kind)
        .bounded(
            flags.contains(F::TAILS_M_LOWER).then(|| "startM + M".to_string()),
            flags.contains(F::TAILS_N_LOWER).then(|| "startN + N".to_string()),
        )
        .triangle((!separate_only).then_some(uplo))
        .with_core(opts.core);
    gen_result_update(ctx, &spec)?;

    ctx.end_func_body()?;
    ctx.add_blank_line()?;
    Ok(())
}

/// Block solver for SYRK (`rank2 == false`) and SYR2K.
#[derive(Debug, Clone)]
pub struct SyrxkBlock {
    rank2: bool,
    whole_a_limit: DtypeTable<usize>,
    wavefront: u32,
}

impl SyrxkBlock {
    pub fn new(cfg: &GenConfig, rank2: bool) -> Self {
        Self {
            rank2,
            whole_a_limit: cfg.whole_a_limit,
            wavefront: cfg.wavefront_size,
        }
    }

    fn func(&self) -> BlasFunction {
        if self.rank2 {
            BlasFunction::Syr2k
        } else {
            BlasFunction::Syrk
        }
    }
}

impl SolverOps for SyrxkBlock {
    fn name(&self) -> &'static str {
        if self.rank2 {
            "syr2k-block"
        } else {
            "syrk-block"
        }
    }

    fn flags(&self) -> SolverFlags {
        SolverFlags::WSPACE_2D | SolverFlags::TOP_INPUT_SQUARE_BLOCKS
    }

    fn generate(
        &self,
        ctx: &mut KgenContext,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        extra: &KernelExtra,
    ) -> Result<()> {
        gen_syrxk(ctx, subdims, pgran, extra, self.func())
    }

    fn assign_kargs(&self, kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
        let mut args = KernelArgs::new();
        args.push(KernelArg::Size(kargs.m));
        args.push(KernelArg::Size(kargs.n));
        args.push(KernelArg::Size(kargs.k));
        args.push(KernelArg::scalar(kargs.alpha, kargs.dtype));
        args.push(KernelArg::scalar(kargs.beta, kargs.dtype));
        args.push(KernelArg::Buffer(kargs.a));
        if self.rank2 {
            args.push(KernelArg::Buffer(kargs.b));
        }
        args.push(KernelArg::Buffer(kargs.c));
        args.push(KernelArg::Size(kargs.lda));
        if self.rank2 {
            args.push(KernelArg::Size(kargs.ldb));
        }
        args.push(KernelArg::Size(kargs.ldc));
        args.push(KernelArg::Size(kargs.offset_m));
        args.push(KernelArg::Size(kargs.offset_n));
        offset_kargs(extra.flags, kargs, &mut args);
        args
    }

    fn default_decomposition(&self, dtype: DataType, wf_size: u32) -> ([SubproblemDim; 2], PGranularity) {
        let (item, bw) = match dtype {
            DataType::Float => (4, 8),
            DataType::Double | DataType::ComplexFloat => (4, 4),
            DataType::ComplexDouble => (2, 4),
        };
        let subdims = [
            SubproblemDim::new(item * 8, item * 8, bw, item * 8, item * 8),
            SubproblemDim::new(item, item, bw, item, item),
        ];
        let mut pgran = PGranularity {
            wf_size,
            ..PGranularity::default()
        };
        calc_pgran_dedicated(&mut pgran, &subdims, Some(1));
        (subdims, pgran)
    }

    fn check_decomposition(
        &self,
        subdims: &[SubproblemDim],
        pgran: &mut PGranularity,
        dtype: DataType,
        check: CheckCalcPGran,
    ) -> bool {
        let [top, item, ..] = subdims else {
            return false;
        };
        if top.x != top.y || top.bwidth != item.bwidth {
            return false;
        }
        // diagonal blocks are powers of two, items must tile them
        if !item.x.is_power_of_two() || !item.y.is_power_of_two() || item.x.max(item.y) > MAX_SYRK_ITEM {
            return false;
        }
        let (min_size, max_size) = if dtype == DataType::ComplexDouble { (1, 4) } else { (2, 8) };
        let whole_a = item.y + item.x <= self.whole_a_limit.get(dtype);
        if !decomp_sanity_check(subdims, min_size, max_size, MAX_ITEM_REGS, dtype, whole_a) {
            return false;
        }
        match check {
            CheckCalcPGran::Check => {
                let wf = if pgran.wf_size == 0 { self.wavefront } else { pgran.wf_size };
                let items = pgran.items();
                items > 0 && items % wf == 0
            }
            CheckCalcPGran::Calc => {
                calc_pgran_dedicated(pgran, subdims, Some(1));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rank2: bool, flags: KernelExtraFlags) -> String {
        let solver = SyrxkBlock::new(&GenConfig::default(), rank2);
        let (subdims, pgran) = solver.default_decomposition(DataType::Float, 64);
        let extra = KernelExtra::new(DataType::Float, flags).with_vec_len(4);
        let mut ctx = KgenContext::new(1 << 20);
        solver.generate(&mut ctx, &subdims, &pgran, &extra).unwrap();
        ctx.into_source()
    }

    #[test]
    fn test_lower_guarded_store() {
        let src = source(false, F::TAILS_M | F::TAILS_N | F::TAILS_M_LOWER | F::TAILS_N_LOWER);
        assert!(src.contains("ssyrkBlock(\n"));
        assert!(src.contains("    uint startN)\n"));
        assert!(src.contains("coord.y = startM + 4u * (uint)get_global_id(0);"));
        assert!(src.contains("if ((coord.y >= startM + M) || (coord.x >= startN + N)) {"));
        assert!(src.contains("if (coord.y + 4u <= coord.x) {"));
        // transposed operand reads A rows as columns
        assert!(src.contains("(A + (k + (min(coord.x, startN + N - 1u)) * lda))"));
        assert!(src.contains(">= coord.x"));
        assert!(!src.contains("B["));
    }

    #[test]
    fn test_separate_diagonal_skips_crossing_tiles() {
        let src = source(false, F::UPPER_TRIANG | F::SYRK_SEPARATE_DIAGONAL | F::BETA_ZERO);
        assert!(src.contains("if (coord.x + 4u <= coord.y) {"));
        assert!(src.contains("if (coord.x < coord.y + 3u) {"));
        assert!(!src.contains("<= coord.x)"));

        let src = source(
            false,
            F::UPPER_TRIANG | F::SYRK_SEPARATE_DIAGONAL | F::SYRK_EVALUATE_DIAGONAL | F::BETA_ZERO,
        );
        assert!(!src.contains("if (coord.x < coord.y + 3u) {"));
        assert!(src.contains("if (coord.y <= coord.x) {"));
    }

    #[test]
    fn test_rank2_two_products() {
        let one_pass = source(true, F::BETA_ZERO);
        let both = source(true, F::BETA_ZERO | F::SYRK_2K_RANK);
        assert!(one_pass.contains("const __global float *restrict B,"));
        assert!(one_pass.contains("uint ldb,"));
        assert!(one_pass.contains("(B + (k + coord.x * ldb))"));
        assert!(!one_pass.contains("(A + (k + coord.x * lda))"));
        assert!(both.contains("(A + (k + coord.x * lda))"));
        assert!(both.contains("(B + (coord.y * ldb + k))"));
    }

    #[test]
    fn test_kargs_match_params() {
        for rank2 in [false, true] {
            let solver = SyrxkBlock::new(&GenConfig::default(), rank2);
            let func = if rank2 { BlasFunction::Syr2k } else { BlasFunction::Syrk };
            let mut kargs = BlasKargs::new(func, DataType::Double);
            kargs.offset_m = 16;
            let flags = F::A_OFF_NOT_ZERO | F::CY_OFF_NOT_ZERO;
            let extra = KernelExtra::new(DataType::Double, flags);
            let args = solver.assign_kargs(&kargs, &extra);
            assert_eq!(args.len(), syrxk_params(DataType::Double, flags, rank2).len());
            let start = if rank2 { 11 } else { 9 };
            assert_eq!(args[start], KernelArg::Size(16));
        }
    }

    #[test]
    fn test_decomposition_requires_square_top() {
        let solver = SyrxkBlock::new(&GenConfig::default(), false);
        let (subdims, mut pgran) = solver.default_decomposition(DataType::Float, 64);
        assert!(solver.check_decomposition(&subdims, &mut pgran, DataType::Float, CheckCalcPGran::Check));
        let skewed = [SubproblemDim::new(32, 16, 8, 32, 16), subdims[1]];
        assert!(!solver.check_decomposition(&skewed, &mut pgran, DataType::Float, CheckCalcPGran::Check));
        let six = [SubproblemDim::new(48, 48, 2, 48, 48), SubproblemDim::new(6, 6, 2, 6, 6)];
        assert!(!solver.check_decomposition(&six, &mut pgran, DataType::Float, CheckCalcPGran::Check));
    }
}
