//! Block GEMM: every work item evaluates its own `item_y x item_x` block of
//! C, walking the whole K dimension with tiles read straight from global
//! memory.

use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::{DataType, MulCore};

use super::tilemul::{gen_fetch_and_mul, Bound, FetchSpec, MulOpts};
use super::upres::{gen_result_update, UpdateKind, UpdateSpec};
use super::{
    declare_kernel, declare_precision, init_default_tiles, init_tail_tiles, kernel_name, offset_kargs,
    offset_params, shift_pointers, MatrixAccess,
};
use crate::config::{DtypeTable, GenConfig};
use crate::error::{GenError, Result};
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::{KernelArg, KernelArgs};
use crate::solver::{CheckCalcPGran, PatternPerformance, SolverFlags, SolverOps};
use crate::threads::{calc_pgran_dedicated, decomp_sanity_check, DecompositionAxis};

type F = KernelExtraFlags;

/// Register budget, in 16-byte registers, of one work item.
const MAX_ITEM_REGS: usize = 24;

/// Axis laid on work space dimension 0.
///
/// X goes inner when A is read along its rows and B along its columns, so
/// neighbouring items read neighbouring B columns.
pub(crate) fn gemm_inner_axis(flags: KernelExtraFlags) -> DecompositionAxis {
    let cm_a = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::A);
    let cm_b = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::B);
    if !cm_a && cm_b {
        DecompositionAxis::X
    } else {
        DecompositionAxis::Y
    }
}

/// Kernel parameters shared by the GEMM patterns.
pub(crate) fn gemm_params(dtype: DataType, flags: KernelExtraFlags) -> Vec<String> {
    let t = dtype.builtin_type();
    let mut params = vec![
        "uint M".to_string(),
        "uint N".to_string(),
        "uint K".to_string(),
        format!("const {t} alpha"),
        format!("const {t} beta"),
        format!("const __global {t} *restrict A"),
        format!("const __global {t} *restrict B"),
        format!("__global {t} *C"),
        "uint lda".to_string(),
        "uint ldb".to_string(),
        "uint ldc".to_string(),
    ];
    offset_params(flags, &mut params);
    params
}

/// Kernel arguments matching [`gemm_params`].
pub(crate) fn gemm_kargs(kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
    let mut args = KernelArgs::new();
    args.push(KernelArg::Size(kargs.m));
    args.push(KernelArg::Size(kargs.n));
    args.push(KernelArg::Size(kargs.k));
    args.push(KernelArg::scalar(kargs.alpha, kargs.dtype));
    args.push(KernelArg::scalar(kargs.beta, kargs.dtype));
    args.push(KernelArg::Buffer(kargs.a));
    args.push(KernelArg::Buffer(kargs.b));
    args.push(KernelArg::Buffer(kargs.c));
    args.push(KernelArg::Size(kargs.lda));
    args.push(KernelArg::Size(kargs.ldb));
    args.push(KernelArg::Size(kargs.ldc));
    offset_kargs(extra.flags, kargs, &mut args);
    args
}

pub(crate) fn mul_opts(flags: KernelExtraFlags) -> MulOpts {
    MulOpts {
        conj_a: flags.contains(F::CONJ_A),
        conj_b: flags.contains(F::CONJ_B),
        core: if flags.contains(F::ENABLE_MAD) {
            MulCore::Mad
        } else {
            MulCore::MulAdd
        },
    }
}

/// Per-item level of a decomposition.
pub(crate) fn item_dims(subdims: &[SubproblemDim]) -> Result<&SubproblemDim> {
    subdims
        .get(1)
        .ok_or_else(|| GenError::InvalidDecomposition(format!("expected 2 levels, got {}", subdims.len())))
}

/// Emit `if (cond) return;` for items lying past the matrix.
pub(crate) fn gen_hit_check(ctx: &mut KgenContext, rows: Option<&str>, cols: Option<&str>) -> Result<()> {
    let mut conds = Vec::new();
    if let Some(lim) = rows {
        conds.push(format!("(coord.y >= {lim})"));
    }
    if let Some(lim) = cols {
        conds.push(format!("(coord.x >= {lim})"));
    }
    if conds.is_empty() {
        return Ok(());
    }
    ctx.begin_branch(Some(&format!("if ({})", conds.join(" || "))))?;
    ctx.add_stmt("return;\n")?;
    ctx.end_branch(None)?;
    Ok(())
}

fn gen_gemm_block(
    ctx: &mut KgenContext,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
) -> Result<()> {
    let dims = item_dims(subdims)?;
    let flags = extra.flags;
    let dtype = extra.dtype;
    let bw = dims.bwidth;
    let func = BlasFunction::Gemm;

    let cm_a = flags.is_col_major_access(func, MatrixRole::A);
    let cm_b = flags.is_col_major_access(func, MatrixRole::B);
    let acc_a = MatrixAccess::new("A", "lda", cm_a);
    let acc_b = MatrixAccess::new("B", "ldb", cm_b);
    let acc_c = MatrixAccess::new("C", "ldc", flags.is_col_major_access(func, MatrixRole::C));
    let tiles = init_default_tiles(func, dims, extra);
    let tails_k = flags.contains(F::TAILS_K_LOWER);
    let kbase = if tails_k { "Kbase" } else { "K" };
    let gid_y = usize::from(gemm_inner_axis(flags) == DecompositionAxis::X);

    declare_precision(ctx, dtype)?;
    declare_kernel(ctx, pgran, &kernel_name(dtype, "gemmBlock"), &gemm_params(dtype, flags))?;
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
        "coord.y = {}u * (uint)get_global_id({gid_y});\ncoord.x = {}u * (uint)get_global_id({});\n",
        dims.y,
        dims.x,
        1 - gid_y
    )?;
    gen_hit_check(
        ctx,
        flags.contains(F::TAILS_M).then_some("M"),
        flags.contains(F::TAILS_N).then_some("N"),
    )?;
    shift_pointers(ctx, flags, &[("A", MatrixRole::A), ("B", MatrixRole::B), ("C", MatrixRole::C)])?;
    tiles.c.gen_zero(ctx)?;

    // staggered start along K spreads neighbouring items over memory channels
    let stag = if !cm_a && !cm_b {
        (32 / dtype.size()) / bw * bw
    } else {
        0
    };
    if stag > 0 {
        kgen_emit::kprintf!(
            ctx,
            "const uint kstart = ({kbase} > 0u) ? ((get_local_id(0) % 2u) * {stag}u) % {kbase} : 0u;\n"
        )?;
    }

    let rows = if flags.contains(F::TAILS_M_LOWER) {
        Bound::Clamp("M".into())
    } else {
        Bound::None
    };
    let cols = if flags.contains(F::TAILS_N_LOWER) {
        Bound::Clamp("N".into())
    } else {
        Bound::None
    };
    let opts = mul_opts(flags);

    ctx.begin_branch(Some(&format!("for (uint k1 = 0u; k1 < {kbase}; k1 += {bw}u)")))?;
    if stag > 0 {
        kgen_emit::kprintf!(ctx, "const uint k = (k1 + kstart) % {kbase};\n")?;
    } else {
        ctx.add_stmt("const uint k = k1;\n")?;
    }
    gen_fetch_and_mul(
        ctx,
        &FetchSpec::new(&tiles.a, &acc_a, "coord.y", "k").rows(rows.clone()),
        &FetchSpec::new(&tiles.b, &acc_b, "k", "coord.x").cols(cols.clone()),
        &tiles.c,
        opts,
    )?;
    ctx.end_branch(None)?;
    ctx.add_blank_line()?;

    if tails_k {
        let (at, bt) = init_tail_tiles(&tiles);
        ctx.begin_branch(Some("for (uint k = Kbase; k < K; k++)"))?;
        at.declare_storage(ctx)?;
        bt.declare_storage(ctx)?;
        gen_fetch_and_mul(
            ctx,
            &FetchSpec::new(&at, &acc_a, "coord.y", "k").rows(rows),
            &FetchSpec::new(&bt, &acc_b, "k", "coord.x").cols(cols),
            &tiles.c,
            opts,
        )?;
        ctx.end_branch(None)?;
        ctx.add_blank_line()?;
    }

    let kind = if flags.contains(F::BETA_ZERO) {
        UpdateKind::Alpha
    } else {
        UpdateKind::AlphaBeta
    };
    let spec = UpdateSpec::new(&tiles.c, &acc_c, "coord.y", "coord.x", kind)
        .bounded(
            flags.contains(F::TAILS_M_LOWER).then(|| "M".to_string()),
            flags.contains(F::TAILS_N_LOWER).then(|| "N".to_string()),
        )
        .with_core(opts.core);
    gen_result_update(ctx, &spec)?;

    ctx.end_func_body()?;
    ctx.add_blank_line()?;
    Ok(())
}

/// Block GEMM solver.
#[derive(Debug, Clone)]
pub struct GemmBlock {
    whole_a_limit: DtypeTable<usize>,
    wavefront: u32,
}

impl GemmBlock {
    pub fn new(cfg: &GenConfig) -> Self {
        Self {
            whole_a_limit: cfg.whole_a_limit,
            wavefront: cfg.wavefront_size,
        }
    }
}

impl SolverOps for GemmBlock {
    fn name(&self) -> &'static str {
        "gemm-block"
    }

    fn flags(&self) -> SolverFlags {
        SolverFlags::WSPACE_2D
    }

    fn generate(
        &self,
        ctx: &mut KgenContext,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        extra: &KernelExtra,
    ) -> Result<()> {
        gen_gemm_block(ctx, subdims, pgran, extra)
    }

    fn assign_kargs(&self, kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
        gemm_kargs(kargs, extra)
    }

    fn pattern_perf(&self, flags: KernelExtraFlags, _kargs: &BlasKargs) -> PatternPerformance {
        let cm_a = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::A);
        let cm_b = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::B);
        if !cm_a && !cm_b {
            PatternPerformance::Average
        } else {
            PatternPerformance::Good
        }
    }

    fn inner_decomposition_axis(&self, kargs: &BlasKargs) -> DecompositionAxis {
        gemm_inner_axis(kargs.base_flags())
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
        if subdims.len() < 2 {
            return false;
        }
        match check {
            CheckCalcPGran::Check => {
                let (min_size, max_size) = if dtype == DataType::ComplexDouble { (1, 4) } else { (2, 8) };
                let whole_a = subdims[1].y + subdims[1].x <= self.whole_a_limit.get(dtype);
                let wf = if pgran.wf_size == 0 { self.wavefront } else { pgran.wf_size };
                let items = pgran.items();
                decomp_sanity_check(subdims, min_size, max_size, MAX_ITEM_REGS, dtype, whole_a)
                    && subdims[0].bwidth == subdims[1].bwidth
                    && items > 0
                    && items % wf == 0
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
    use crate::func::Order;

    fn source(extra: &KernelExtra, subdims: &[SubproblemDim], pgran: &PGranularity) -> String {
        let solver = GemmBlock::new(&GenConfig::default());
        let mut ctx = KgenContext::new(1 << 20);
        solver.generate(&mut ctx, subdims, pgran, extra).unwrap();
        ctx.into_source()
    }

    #[test]
    fn test_default_decomposition_is_valid() {
        let solver = GemmBlock::new(&GenConfig::default());
        for dtype in DataType::ALL {
            let (subdims, mut pgran) = solver.default_decomposition(dtype, 64);
            assert_eq!(pgran.wg_size, [8, 8]);
            assert!(
                solver.check_decomposition(&subdims, &mut pgran, dtype, CheckCalcPGran::Check),
                "{dtype}"
            );
        }
    }

    #[test]
    fn test_check_rejects_oversized_items() {
        let solver = GemmBlock::new(&GenConfig::default());
        let subdims = [
            SubproblemDim::new(64, 64, 8, 64, 64),
            SubproblemDim::new(8, 8, 8, 8, 8),
        ];
        let mut pgran = PGranularity::two_dim(8, 8);
        assert!(!solver.check_decomposition(&subdims, &mut pgran, DataType::Float, CheckCalcPGran::Check));
    }

    #[test]
    fn test_kernel_shape() {
        let solver = GemmBlock::new(&GenConfig::default());
        let (subdims, pgran) = solver.default_decomposition(DataType::Float, 64);
        let extra = KernelExtra::new(DataType::Float, F::BETA_ZERO).with_vec_len(4);
        let src = source(&extra, &subdims, &pgran);

        assert!(src.starts_with("__attribute__((reqd_work_group_size(8, 8, 1)))\nvoid __kernel\nsgemmBlock(\n"));
        assert!(src.contains("coord.y = 4u * (uint)get_global_id(0);"));
        assert!(src.contains("for (uint k1 = 0u; k1 < K; k1 += 8u) {"));
        assert!(src.contains("const uint k = (k1 + kstart) % K;"));
        assert!(src.contains("vstore4(c[0] * alpha, 0,"));
        // no tails: neither hit check nor guarded stores
        assert!(!src.contains("return;"));
        assert!(!src.contains("else"));
    }

    #[test]
    fn test_k_tail_loop() {
        let solver = GemmBlock::new(&GenConfig::default());
        let (subdims, pgran) = solver.default_decomposition(DataType::Double, 64);
        let flags = F::COLUMN_MAJOR | F::TAILS_K | F::TAILS_K_LOWER | F::A_OFF_NOT_ZERO;
        let extra = KernelExtra::new(DataType::Double, flags).with_vec_len(2);
        let src = source(&extra, &subdims, &pgran);

        assert!(src.starts_with("#ifdef cl_khr_fp64"));
        assert!(src.contains("const uint Ktail = K % 4u;\n"));
        assert!(src.contains("for (uint k = Kbase; k < K; k++) {"));
        assert!(src.contains("A += offA;"));
        assert!(src.contains("const uint offA)"));
        // column-major operands are not staggered
        assert!(!src.contains("kstart"));
    }

    #[test]
    fn test_inner_axis_swaps_ids() {
        let flags = F::TRANS_B;
        assert_eq!(gemm_inner_axis(flags), DecompositionAxis::X);
        let solver = GemmBlock::new(&GenConfig::default());
        let (subdims, pgran) = solver.default_decomposition(DataType::Float, 64);
        let src = source(&KernelExtra::new(DataType::Float, flags), &subdims, &pgran);
        assert!(src.contains("coord.y = 4u * (uint)get_global_id(1);"));

        let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
        kargs.order = Order::ColumnMajor;
        assert_eq!(solver.inner_decomposition_axis(&kargs), DecompositionAxis::Y);
    }

    #[test]
    fn test_kargs_follow_declaration() {
        let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
        kargs.m = 10;
        kargs.off_cy = 7;
        let extra = KernelExtra::new(DataType::Float, F::CY_OFF_NOT_ZERO);
        let args = gemm_kargs(&kargs, &extra);
        assert_eq!(args.len(), 12);
        assert_eq!(args[0], KernelArg::Size(10));
        assert_eq!(args[11], KernelArg::Size(7));
        assert_eq!(gemm_params(DataType::Float, extra.flags).len(), args.len());
    }
}
