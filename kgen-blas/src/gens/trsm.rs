//! TRSM column kernel: solves `op(A) X = alpha B` or `X op(A) = alpha B`,
//! overwriting B with X.
//!
//! Every work item owns `item_x` columns of the left side view and solves
//! them row tile by row tile, forward for a lower triangular `op(A)` and
//! backward for an upper one. Already solved tiles are read back from B and
//! subtracted; the diagonal block is then solved in registers by
//! substitution.

use kgen_emit::{KgenContext, PGranularity, StatementBatch, SubproblemDim};
use kgen_tile::{complex_mul_update, DataType, MulCore, Tile, TileCopyOp};

use super::gemm::{gen_hit_check, item_dims, mul_opts};
use super::tilemul::{gen_fetch, gen_tile_mul, Bound, FetchSpec, MulOpts, TriMask};
use super::trxm::{trxm_check_decomposition, trxm_default_decomposition, trxm_kargs, trxm_params, trxm_threads, TrxmLayout};
use super::upres::{gen_result_update, UpdateKind, UpdateSpec};
use super::{declare_kernel, declare_precision, kernel_name, offset_expr, shift_pointers};
use crate::config::GenConfig;
use crate::error::{GenError, Result};
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::KernelArgs;
use crate::solver::{CheckCalcPGran, PatternPerformance, SolverFlags, SolverOps};

type F = KernelExtraFlags;

/// `x = x * alpha` over every element of `c`.
fn gen_scale_alpha(ctx: &mut KgenContext, c: &Tile) -> Result<()> {
    if c.dtype.is_complex() {
        let dbl = c.dtype.is_double_based();
        for (row, col, _) in c.segments(1) {
            let e = c.element_expr(row, col, 1)?;
            ctx.add_stmt(&complex_mul_update(&e, &e, "alpha", None, dbl, false, false, MulCore::MulAdd))?;
        }
    } else {
        for (row, col, len) in c.segments(c.line_segment_len()) {
            let e = c.element_expr(row, col, len)?;
            kgen_emit::kprintf!(ctx, "{e} *= alpha;\n")?;
        }
    }
    ctx.add_blank_line()?;
    Ok(())
}

/// `x -= a * y` on single elements.
fn sub_product(dtype: DataType, x: &str, a: &str, y: &str, conj_a: bool) -> String {
    if dtype.is_complex() {
        let mut s = complex_mul_update("tmp", a, y, None, dtype.is_double_based(), conj_a, false, MulCore::MulAdd);
        s.push_str(&format!("{x} -= tmp;\n"));
        s
    } else {
        format!("{x} -= {a} * {y};\n")
    }
}

/// `x /= d` on single elements.
fn div_element(dtype: DataType, x: &str, d: &str, conj_d: bool) -> String {
    if dtype.is_complex() {
        let t = dtype.builtin_type();
        let (d_im, sum, diff) = if conj_d { ("-", "-", "+") } else { ("", "+", "-") };
        format!(
            "{x} = ({t})({x}.s0 * {d}.s0 {sum} {x}.s1 * {d}.s1, {x}.s1 * {d}.s0 {diff} {x}.s0 * {d}.s1) / \
             ({d}.s0 * {d}.s0 + {d_im}{d}.s1 * {d_im}{d}.s1);\n"
        )
    } else {
        format!("{x} /= {d};\n")
    }
}

/// Solve the diagonal block in registers.
fn gen_substitution(ctx: &mut KgenContext, a: &Tile, c: &Tile, upper: bool, unit: bool, conj_a: bool) -> Result<()> {
    let n = a.rows;
    let order: Vec<usize> = if upper { (0..n).rev().collect() } else { (0..n).collect() };
    for &i in &order {
        let solved: Vec<usize> = if upper { (i + 1..n).collect() } else { (0..i).collect() };
        for col in 0..c.cols {
            let x = c.element_expr(i, col, 1)?;
            for &j in &solved {
                let aij = a.element_expr(i, j, 1)?;
                let y = c.element_expr(j, col, 1)?;
                ctx.add_stmt(&sub_product(c.dtype, &x, &aij, &y, conj_a))?;
            }
            if !unit {
                let aii = a.element_expr(i, i, 1)?;
                ctx.add_stmt(&div_element(c.dtype, &x, &aii, conj_a))?;
            }
        }
    }
    Ok(())
}

fn gen_trsm(
    ctx: &mut KgenContext,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
) -> Result<()> {
    let dims = item_dims(subdims)?;
    if dims.bwidth != dims.y {
        return Err(GenError::InvalidDecomposition(format!(
            "TRSM needs square diagonal blocks, got {}x{}",
            dims.y, dims.bwidth
        )));
    }
    let flags = extra.flags;
    let dtype = extra.dtype;
    let layout = TrxmLayout::new(BlasFunction::Trsm, flags);
    let mut tiles = layout.tiles(dims, extra);
    if dtype.is_complex() {
        // substitution addresses single elements
        tiles.a = tiles.a.with_vec_len(1);
        tiles.b = tiles.b.with_vec_len(1);
        tiles.c = tiles.c.with_vec_len(1);
    }
    let t = Tile {
        name: "t".to_string(),
        ..tiles.c.clone()
    };
    let (y1, x1, bw) = (dims.y, dims.x, dims.bwidth);
    let (rows, cols) = (layout.rows, layout.cols);
    let opts = MulOpts {
        core: MulCore::MulAdd,
        ..mul_opts(flags)
    };

    declare_precision(ctx, dtype)?;
    declare_kernel(ctx, pgran, &kernel_name(dtype, "trsmColumn"), &trxm_params(dtype, flags))?;
    ctx.begin_func_body()?;

    tiles.a.declare_storage(ctx)?;
    tiles.b.declare_storage(ctx)?;
    tiles.c.declare_storage(ctx)?;
    t.declare_storage(ctx)?;
    if dtype.is_complex() {
        kgen_emit::kprintf!(ctx, "{} tmp;\n", dtype.builtin_type())?;
    }
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
    let col_clamp = || {
        if layout.col_tail {
            Bound::Clamp(cols.to_string())
        } else {
            Bound::None
        }
    };

    layout.begin_row_loop(ctx, y1, layout.upper)?;

    let mut batch = StatementBatch::new();
    gen_fetch(
        &mut batch,
        0,
        &FetchSpec::new(&tiles.c, &layout.acc_b, "coord.y", "coord.x")
            .rows(row_clamp())
            .cols(col_clamp()),
    )?;
    batch.flush(ctx)?;
    gen_scale_alpha(ctx, &tiles.c)?;

    // subtract the contribution of already solved rows
    let solved = if layout.upper {
        format!("for (uint k = coord.y + {bw}u; k < {rows}; k += {bw}u)")
    } else {
        format!("for (uint k = 0u; k < coord.y; k += {bw}u)")
    };
    ctx.begin_branch(Some(&solved))?;
    t.gen_zero(ctx)?;
    let a_cols = if layout.upper { k_fill() } else { Bound::None };
    let b_rows = if layout.upper { row_clamp() } else { Bound::None };
    gen_fetch(
        &mut batch,
        0,
        &FetchSpec::new(&tiles.a, &layout.acc_a, "coord.y", "k")
            .rows(row_clamp())
            .cols(a_cols),
    )?;
    gen_fetch(
        &mut batch,
        1,
        &FetchSpec::new(&tiles.b, &layout.acc_b, "k", "coord.x")
            .rows(b_rows)
            .cols(col_clamp()),
    )?;
    gen_tile_mul(&mut batch, 2, &tiles.a, &tiles.b, &t, opts)?;
    batch.flush(ctx)?;
    Tile::gen_copy(ctx, &tiles.c, &t, TileCopyOp::Sub)?;
    ctx.end_branch(None)?;
    ctx.add_blank_line()?;

    // diagonal block
    gen_fetch(
        &mut batch,
        0,
        &FetchSpec::new(&tiles.a, &layout.acc_a, "coord.y", "coord.y")
            .rows(row_clamp())
            .cols(k_fill())
            .masked(Some(TriMask {
                lower: !layout.upper,
                unit_diag: false,
            })),
    )?;
    batch.flush(ctx)?;
    if layout.row_tail {
        let one = dtype.str_one();
        for i in 1..y1 {
            let aii = tiles.a.element_expr(i, i, 1)?;
            kgen_emit::kprintf!(
                ctx,
                "if ({} >= {rows}) {aii} = {one};\n",
                offset_expr("coord.y", i)
            )?;
        }
    }
    gen_substitution(
        ctx,
        &tiles.a,
        &tiles.c,
        layout.upper,
        flags.contains(F::UNIT_DIAG),
        opts.conj_a,
    )?;
    ctx.add_blank_line()?;

    let spec = UpdateSpec::new(&tiles.c, &layout.acc_b, "coord.y", "coord.x", UpdateKind::Copy).bounded(
        layout.row_tail.then(|| rows.to_string()),
        layout.col_tail.then(|| cols.to_string()),
    );
    gen_result_update(ctx, &spec)?;
    ctx.end_branch(None)?;

    ctx.end_func_body()?;
    ctx.add_blank_line()?;
    Ok(())
}

/// Column owner TRSM solver.
#[derive(Debug, Clone)]
pub struct TrsmColumn {
    wavefront: u32,
}

impl TrsmColumn {
    pub fn new(cfg: &GenConfig) -> Self {
        Self {
            wavefront: cfg.wavefront_size,
        }
    }
}

impl SolverOps for TrsmColumn {
    fn name(&self) -> &'static str {
        "trsm-column"
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
        gen_trsm(ctx, subdims, pgran, extra)
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
        trxm_check_decomposition(subdims, pgran, dtype, check, 1, self.wavefront)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(flags: KernelExtraFlags, dtype: DataType) -> String {
        let solver = TrsmColumn::new(&GenConfig::default());
        let (subdims, pgran) = solver.default_decomposition(dtype, 64);
        let extra = KernelExtra::new(dtype, flags).with_vec_len(4);
        let mut ctx = KgenContext::new(1 << 20);
        solver.generate(&mut ctx, &subdims, &pgran, &extra).unwrap();
        ctx.into_source()
    }

    #[test]
    fn test_lower_solves_forward() {
        let src = source(F::TAILS_M_LOWER, DataType::Float);
        assert!(src.contains("strsmColumn(\n"));
        assert!(src.contains("for (coord.y = 0u; coord.y < M; coord.y += 4u) {"));
        assert!(src.contains("c[0] *= alpha;"));
        assert!(src.contains("for (uint k = 0u; k < coord.y; k += 4u) {"));
        assert!(src.contains("c[0] -= t[0];"));
        assert!(src.contains("if (coord.y + 3u >= M) a[3].s3 = 1;"));
        assert!(src.contains("c[1].s0 -= a[1].s0 * c[0].s0;"));
        assert!(src.contains("c[1].s0 /= a[1].s1;"));
        assert!(src.contains("B[(coord.y + 3u) * ldb + coord.x] = c[3].s0;"));
    }

    #[test]
    fn test_upper_unit_solves_backward() {
        let src = source(F::UPPER_TRIANG | F::UNIT_DIAG, DataType::Double);
        assert!(src.contains("for (uint ty = (M + 3u) / 4u; ty > 0u; ty--) {"));
        assert!(src.contains("for (uint k = coord.y + 4u; k < M; k += 4u) {"));
        assert!(src.contains("c[2].s1 -= a[2].s3 * c[3].s1;"));
        assert!(!src.contains("/="));
    }

    #[test]
    fn test_complex_division() {
        let src = source(F::empty(), DataType::ComplexFloat);
        assert!(src.contains("float2 tmp;"));
        assert!(src.contains(
            "c[0] = (float2)(c[0].s0 * a[0].s0 + c[0].s1 * a[0].s1, c[0].s1 * a[0].s0 - c[0].s0 * a[0].s1) / \
             (a[0].s0 * a[0].s0 + a[0].s1 * a[0].s1);"
        ));
        assert!(src.contains("c[4] -= tmp;"));
    }

    #[test]
    fn test_kargs_layout() {
        let solver = TrsmColumn::new(&GenConfig::default());
        let mut kargs = BlasKargs::new(BlasFunction::Trsm, DataType::Float);
        kargs.m = 33;
        kargs.off_bx = 5;
        let extra = KernelExtra::new(DataType::Float, F::BX_OFF_NOT_ZERO);
        let args = solver.assign_kargs(&kargs, &extra);
        assert_eq!(args.len(), trxm_params(DataType::Float, extra.flags).len());
        assert_eq!(args[0], crate::kargs::KernelArg::Size(33));
        assert_eq!(args[7], crate::kargs::KernelArg::Size(5));
    }
}
