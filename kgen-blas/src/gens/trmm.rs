//! TRMM block kernel: `B = alpha * op(A) * B` or `B = alpha * B * op(A)`.
//!
//! The product is evaluated in place. Row tiles of a lower triangular
//! `op(A)` are visited bottom-up and those of an upper one top-down, so a
//! tile never reads rows of B another tile of the same item already
//! overwrote. Only the block range inside the triangle is multiplied; the
//! diagonal block is fetched masked to the triangle.

use kgen_emit::{KgenContext, PGranularity, StatementBatch, SubproblemDim};
use kgen_tile::DataType;

use super::gemm::{gen_hit_check, item_dims, mul_opts};
use super::tilemul::{gen_fetch, gen_fetch_and_mul, gen_tile_mul, Bound, FetchSpec, TriMask};
use super::trxm::{trxm_check_decomposition, trxm_default_decomposition, trxm_kargs, trxm_params, trxm_threads, TrxmLayout};
use super::upres::{gen_result_update, UpdateKind, UpdateSpec};
use super::{declare_kernel, declare_precision, kernel_name, shift_pointers};
use crate::config::GenConfig;
use crate::error::{GenError, Result};
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::KernelArgs;
use crate::solver::{CheckCalcPGran, PatternPerformance, SolverFlags, SolverOps};

type F = KernelExtraFlags;

fn gen_trmm(
    ctx: &mut KgenContext,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
) -> Result<()> {
    let dims = item_dims(subdims)?;
    if dims.bwidth != dims.y {
        return Err(GenError::InvalidDecomposition(format!(
            "TRMM needs square diagonal blocks, got {}x{}",
            dims.y, dims.bwidth
        )));
    }
    let flags = extra.flags;
    let dtype = extra.dtype;
    let layout = TrxmLayout::new(BlasFunction::Trmm, flags);
    let tiles = layout.tiles(dims, extra);
    let (y1, x1, bw) = (dims.y, dims.x, dims.bwidth);
    let (rows, cols) = (layout.rows, layout.cols);
    let opts = mul_opts(flags);

    declare_precision(ctx, dtype)?;
    declare_kernel(ctx, pgran, &kernel_name(dtype, "trmmBlock"), &trxm_params(dtype, flags))?;
    ctx.begin_func_body()?;

    tiles.a.declare_storage(ctx)?;
    tiles.b.declare_storage(ctx)?;
    tiles.c.declare_storage(ctx)?;
    ctx.add_stmt("uint2 coord;\n")?;
    ctx.add_blank_line()?;
    kgen_emit::kprintf!(ctx, "coord.x = {x1}u * (uint)get_global_id(0);\n")?;
    gen_hit_check(ctx, None, layout.col_overhang.then_some(cols))?;
    shift_pointers(ctx, flags, &[("A", MatrixRole::A), ("B", MatrixRole::B)])?;
    ctx.add_blank_line()?;

    let row_clamp = || {
        if layout.row_tail {
            Bound::Clamp(rows.to_string())
        } else {
            Bound::None
        }
    };
    let k_fill = || {
        if layout.row_tail {
            Bound::ZeroFill(rows.to_string())
        } else {
            Bound::None
        }
    };
    let col_clamp = if layout.col_tail {
        Bound::Clamp(cols.to_string())
    } else {
        Bound::None
    };

    layout.begin_row_loop(ctx, y1, !layout.upper)?;
    tiles.c.gen_zero(ctx)?;

    if !layout.upper {
        ctx.begin_branch(Some(&format!("for (uint k = 0u; k < coord.y; k += {bw}u)")))?;
        gen_fetch_and_mul(
            ctx,
            &FetchSpec::new(&tiles.a, &layout.acc_a, "coord.y", "k").rows(row_clamp()),
            &FetchSpec::new(&tiles.b, &layout.acc_b, "k", "coord.x").cols(col_clamp.clone()),
            &tiles.c,
            opts,
        )?;
        ctx.end_branch(None)?;
    }

    // diagonal block
    let mut batch = StatementBatch::new();
    let mask = TriMask {
        lower: !layout.upper,
        unit_diag: false,
    };
    gen_fetch(
        &mut batch,
        0,
        &FetchSpec::new(&tiles.a, &layout.acc_a, "coord.y", "coord.y")
            .rows(row_clamp())
            .cols(k_fill())
            .masked(Some(mask)),
    )?;
    gen_fetch(
        &mut batch,
        1,
        &FetchSpec::new(&tiles.b, &layout.acc_b, "coord.y", "coord.x")
            .rows(row_clamp())
            .cols(col_clamp.clone()),
    )?;
    batch.flush(ctx)?;
    if flags.contains(F::UNIT_DIAG) {
        tiles.a.gen_set_unit(ctx)?;
    }
    gen_tile_mul(&mut batch, 0, &tiles.a, &tiles.b, &tiles.c, opts)?;
    batch.flush(ctx)?;

    if layout.upper {
        ctx.begin_branch(Some(&format!("for (uint k = coord.y + {bw}u; k < {rows}; k += {bw}u)")))?;
        gen_fetch_and_mul(
            ctx,
            &FetchSpec::new(&tiles.a, &layout.acc_a, "coord.y", "k")
                .rows(row_clamp())
                .cols(k_fill()),
            &FetchSpec::new(&tiles.b, &layout.acc_b, "k", "coord.x")
                .rows(row_clamp())
                .cols(col_clamp.clone()),
            &tiles.c,
            opts,
        )?;
        ctx.end_branch(None)?;
    }
    ctx.add_blank_line()?;

    let spec = UpdateSpec::new(&tiles.c, &layout.acc_b, "coord.y", "coord.x", UpdateKind::Alpha)
        .bounded(
            layout.row_tail.then(|| rows.to_string()),
            layout.col_tail.then(|| cols.to_string()),
        )
        .with_core(opts.core);
    gen_result_update(ctx, &spec)?;
    ctx.end_branch(None)?;

    ctx.end_func_body()?;
    ctx.add_blank_line()?;
    Ok(())
}

/// Column owner TRMM solver.
#[derive(Debug, Clone)]
pub struct TrmmBlock {
    wavefront: u32,
}

impl TrmmBlock {
    pub fn new(cfg: &GenConfig) -> Self {
        Self {
            wavefront: cfg.wavefront_size,
        }
    }
}

impl SolverOps for TrmmBlock {
    fn name(&self) -> &'static str {
        "trmm-block"
    }

    fn flags(&self) -> SolverFlags {
        SolverFlags::WSPACE_1D
    }

    fn generate(
        &self,
        ctx: &mut KgenContext,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        extra: &KernelExtra,
    ) -> Result<()> {
        gen_trmm(ctx, subdims, pgran, extra)
    }

    fn assign_kargs(&self, kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
        trxm_kargs(kargs, extra)
    }

    fn pattern_perf(&self, _flags: KernelExtraFlags, _kargs: &BlasKargs) -> PatternPerformance {
        PatternPerformance::Good
    }

    fn calc_threads(
        &self,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        kargs: &BlasKargs,
        _extra: &KernelExtra,
    ) -> Option<[usize; 2]> {
        trxm_threads(subdims, pgran, kargs)
    }

    fn default_decomposition(&self, dtype: DataType, wf_size: u32) -> ([SubproblemDim; 2], PGranularity) {
        trxm_default_decomposition(dtype, wf_size)
    }

    fn check_decomposition(
        &self,
        subdims: &[SubproblemDim],
        pgran: &mut PGranularity,
        dtype: DataType,
        check: CheckCalcPGran,
    ) -> bool {
        trxm_check_decomposition(subdims, pgran, dtype, check, 0, self.wavefront)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(flags: KernelExtraFlags, dtype: DataType) -> String {
        let solver = TrmmBlock::new(&GenConfig::default());
        let (subdims, pgran) = solver.default_decomposition(dtype, 64);
        let extra = KernelExtra::new(dtype, flags).with_vec_len(4);
        let mut ctx = KgenContext::new(1 << 20);
        solver.generate(&mut ctx, &subdims, &pgran, &extra).unwrap();
        ctx.into_source()
    }

    #[test]
    fn test_lower_walks_bottom_up() {
        let src = source(F::TAILS_M_LOWER | F::TAILS_N, DataType::Float);
        assert!(src.contains("strmmBlock(\n"));
        assert!(src.contains("for (uint ty = (M + 3u) / 4u; ty > 0u; ty--) {"));
        assert!(src.contains("for (uint k = 0u; k < coord.y; k += 4u) {"));
        assert!(src.contains("if ((coord.x >= N)) {"));
        // strictly upper part of the diagonal block is zero
        assert!(src.contains("a[0].s1 = 0;"));
        assert!(src.contains("a[0].s0 = (coord.y < M) ? A[(min(coord.y, M - 1u)) * lda + coord.y] : 0;"));
        assert!(src.contains("if ((coord.y + 4u <= M)) {"));
        assert!(src.contains("vstore4(c[0] * alpha, 0, (__global float *)(B + (coord.y * ldb + coord.x)));"));
    }

    #[test]
    fn test_upper_unit_walks_top_down() {
        let src = source(F::UPPER_TRIANG | F::UNIT_DIAG, DataType::Double);
        assert!(src.contains("for (coord.y = 0u; coord.y < M; coord.y += 4u) {"));
        assert!(src.contains("for (uint k = coord.y + 4u; k < M; k += 4u) {"));
        assert!(src.contains("a[1].s0 = 0;"));
        assert!(src.contains("a[0].s0 = 1;"));
        assert!(src.contains("a[3].s3 = 1;"));
        assert!(!src.contains("ty--"));
    }

    #[test]
    fn test_right_side_uses_n_rows() {
        let src = source(F::SIDE_RIGHT, DataType::Float);
        // lower op(A) on the right acts as upper from the left
        assert!(src.contains("for (coord.y = 0u; coord.y < N; coord.y += 4u) {"));
    }

    #[test]
    fn test_rejects_rectangular_diagonal() {
        let solver = TrmmBlock::new(&GenConfig::default());
        let subdims = [SubproblemDim::new(4, 256, 8, 4, 256), SubproblemDim::new(4, 4, 8, 4, 4)];
        let mut ctx = KgenContext::new(1 << 16);
        let extra = KernelExtra::new(DataType::Float, F::empty());
        let err = solver
            .generate(&mut ctx, &subdims, &PGranularity::one_dim(64), &extra)
            .unwrap_err();
        assert!(matches!(err, GenError::InvalidDecomposition(_)));
    }
}
