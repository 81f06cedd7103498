//! Kernel body generators.
//!
//! Every generator is a pure function of `(subdims, pgran, extra)`. The
//! shared pieces live in [`tilemul`] (tile fetch and multiply-accumulate) and
//! [`upres`] (result update); the operation families build their kernels
//! from them.
//!
//! # Core Types
//!
//! - [`MatrixAccess`]: addressing of one matrix in global memory
//! - [`TileSet`]: the A, B and C tiles of one work item

pub mod gemm;
pub mod gemm_subgroup;
pub mod syrxk;
pub mod tilemul;
pub mod trmm;
pub mod trsm;
pub mod trxm;
pub mod upres;

use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::{DataType, Tile, MAX_TILE_VECLEN};
use tracing::debug;

use crate::error::{GenError, Result};
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::{KernelArg, KernelArgs};
use crate::solver::SolverOps;

/// Addressing of a matrix in global memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAccess {
    /// Pointer variable name.
    pub ptr: String,
    /// Leading dimension variable name.
    pub ld: String,
    /// Consecutive rows are adjacent in memory.
    pub col_major: bool,
}

impl MatrixAccess {
    pub fn new(ptr: impl Into<String>, ld: impl Into<String>, col_major: bool) -> Self {
        Self {
            ptr: ptr.into(),
            ld: ld.into(),
            col_major,
        }
    }

    /// Access to the transposed matrix through the same pointer.
    pub fn transposed(&self) -> Self {
        Self {
            col_major: !self.col_major,
            ..self.clone()
        }
    }

    /// Linear element index of `(row, col)`.
    pub fn index(&self, row: &str, col: &str) -> String {
        if self.col_major {
            format!("{row} + {} * {}", paren(col), self.ld)
        } else {
            format!("{} * {} + {col}", paren(row), self.ld)
        }
    }

    /// Element at `(row, col)` as an lvalue.
    pub fn element(&self, row: &str, col: &str) -> String {
        format!("{}[{}]", self.ptr, self.index(row, col))
    }

    /// Whether a line of `tile` lies contiguously in memory.
    pub fn is_contiguous(&self, tile: &Tile) -> bool {
        tile.trans == self.col_major
    }
}

/// Wrap a compound expression in parentheses.
pub(crate) fn paren(expr: &str) -> String {
    if expr.contains(' ') {
        format!("({expr})")
    } else {
        expr.to_string()
    }
}

/// `base + off` with the constant folded away when zero.
pub(crate) fn offset_expr(base: &str, off: usize) -> String {
    if off == 0 {
        base.to_string()
    } else {
        format!("{base} + {off}u")
    }
}

/// Largest power of two not above `n`, at least 1.
pub(crate) fn pow2_floor(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// Private tiles of a work item computing a `C += A * B` block product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSet {
    /// `y x bwidth`
    pub a: Tile,
    /// `bwidth x x`
    pub b: Tile,
    /// `y x x`
    pub c: Tile,
}

pub(crate) fn tile_for(name: &str, rows: usize, cols: usize, trans: bool, dtype: DataType, vec_len: usize) -> Tile {
    let tile = Tile::new(name, rows, cols, dtype).transposed(trans);
    let len = pow2_floor(vec_len.min(tile.width()).clamp(1, MAX_TILE_VECLEN));
    tile.with_vec_len(len)
}

/// Tiles A (`y x bwidth`), B (`bwidth x x`) and C (`y x x`) built from the
/// per-item decomposition level.
///
/// A and B lines follow their matrices' memory order so fetches can use
/// vector loads; C follows the order of the matrix it is stored to.
pub fn init_default_tiles(func: BlasFunction, dim: &SubproblemDim, extra: &KernelExtra) -> TileSet {
    let flags = extra.flags;
    let dtype = extra.dtype;
    let trans_a = flags.is_col_major_access(func, MatrixRole::A);
    let trans_b = flags.is_col_major_access(func, MatrixRole::B);
    let trans_c = flags.is_col_major_access(func, MatrixRole::C);

    TileSet {
        a: tile_for("a", dim.y, dim.bwidth, trans_a, dtype, extra.vec_len_for(MatrixRole::A)),
        b: tile_for("b", dim.bwidth, dim.x, trans_b, dtype, extra.vec_len_for(MatrixRole::B)),
        c: tile_for("c", dim.y, dim.x, trans_c, dtype, extra.vec_len_for(MatrixRole::C)),
    }
}

/// Tiles for a tail pass evaluating one element of K at a time.
pub fn init_tail_tiles(tiles: &TileSet) -> (Tile, Tile) {
    let a = &tiles.a;
    let b = &tiles.b;
    (
        tile_for("at", a.rows, 1, a.trans, a.dtype, a.vec_len),
        tile_for("bt", 1, b.cols, b.trans, b.dtype, b.vec_len),
    )
}

/// `{p}{base}` kernel name, e.g. `sgemmBlock`.
pub fn kernel_name(dtype: DataType, base: &str) -> String {
    format!("{}{base}", dtype.blas_prefix())
}

/// Emit the double precision pragma when the type needs it.
pub fn declare_precision(ctx: &mut KgenContext, dtype: DataType) -> Result<()> {
    if dtype.is_double_based() {
        kgen_emit::helpers::enable_double(ctx)?;
    }
    Ok(())
}

/// Emit a `__kernel` declaration with a required work group size.
pub fn declare_kernel(ctx: &mut KgenContext, pgran: &PGranularity, name: &str, params: &[String]) -> Result<()> {
    kgen_emit::kprintf!(
        ctx,
        "__attribute__((reqd_work_group_size({}, {}, 1)))\n",
        pgran.wg_size[0],
        pgran.wg_size[1]
    )?;
    let mut decl = format!("void __kernel\n{name}(\n");
    for (i, param) in params.iter().enumerate() {
        decl.push_str("    ");
        decl.push_str(param);
        decl.push_str(if i + 1 == params.len() { ")\n" } else { ",\n" });
    }
    if params.is_empty() {
        decl.push_str("    void)\n");
    }
    ctx.declare_function(&decl)?;
    Ok(())
}

/// Offset parameters appended to a kernel signature, in `A`, `B`, `C` order.
pub(crate) fn offset_params(flags: KernelExtraFlags, params: &mut Vec<String>) {
    for (flag, name) in [
        (KernelExtraFlags::A_OFF_NOT_ZERO, "offA"),
        (KernelExtraFlags::BX_OFF_NOT_ZERO, "offB"),
        (KernelExtraFlags::CY_OFF_NOT_ZERO, "offC"),
    ] {
        if flags.contains(flag) {
            params.push(format!("const uint {name}"));
        }
    }
}

/// Offset arguments matching [`offset_params`].
pub(crate) fn offset_kargs(flags: KernelExtraFlags, kargs: &BlasKargs, args: &mut KernelArgs) {
    for (flag, value) in [
        (KernelExtraFlags::A_OFF_NOT_ZERO, kargs.off_a),
        (KernelExtraFlags::BX_OFF_NOT_ZERO, kargs.off_bx),
        (KernelExtraFlags::CY_OFF_NOT_ZERO, kargs.off_cy),
    ] {
        if flags.contains(flag) {
            args.push(KernelArg::Size(value));
        }
    }
}

/// Shift the matrix pointers by their non-zero offsets.
pub(crate) fn shift_pointers(ctx: &mut KgenContext, flags: KernelExtraFlags, ptrs: &[(&str, MatrixRole)]) -> Result<()> {
    for (ptr, role) in ptrs {
        let (flag, off) = match role {
            MatrixRole::A => (KernelExtraFlags::A_OFF_NOT_ZERO, "offA"),
            MatrixRole::B => (KernelExtraFlags::BX_OFF_NOT_ZERO, "offB"),
            MatrixRole::C => (KernelExtraFlags::CY_OFF_NOT_ZERO, "offC"),
        };
        if flags.contains(flag) {
            kgen_emit::kprintf!(ctx, "{ptr} += {off};\n")?;
        }
    }
    Ok(())
}

/// Generate the source of one kernel.
///
/// The generator runs dry first to measure the exact size, then for real
/// into a buffer of that size. A generator whose two runs disagree is not
/// pure and yields [`GenError::SizeMismatch`].
pub fn generate_source(
    ops: &dyn SolverOps,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
    max_size: usize,
) -> Result<String> {
    let mut dry = KgenContext::dry_run();
    ops.generate(&mut dry, subdims, pgran, extra)?;
    let measured = dry.source_size();
    if measured > max_size {
        return Err(kgen_emit::EmitError::Overflow {
            needed: measured,
            capacity: max_size,
        }
        .into());
    }

    let mut ctx = KgenContext::new(measured);
    ops.generate(&mut ctx, subdims, pgran, extra)?;
    let emitted = ctx.source_size();
    if emitted != measured {
        return Err(GenError::SizeMismatch { measured, emitted });
    }
    debug!(solver = ops.name(), size = emitted, flags = %extra.flags, "generated kernel source");
    Ok(ctx.into_source())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_access_index() {
        let a = MatrixAccess::new("A", "lda", false);
        assert_eq!(a.index("coord.y + 1u", "k"), "(coord.y + 1u) * lda + k");
        assert_eq!(a.transposed().index("m", "k + 2u"), "m + (k + 2u) * lda");
        assert_eq!(a.element("r", "c"), "A[r * lda + c]");
    }

    #[test]
    fn test_pow2_floor() {
        assert_eq!(pow2_floor(0), 1);
        assert_eq!(pow2_floor(6), 4);
        assert_eq!(pow2_floor(8), 8);
    }

    #[test]
    fn test_default_tiles_follow_layout() {
        let flags = KernelExtraFlags::COLUMN_MAJOR | KernelExtraFlags::TRANS_A;
        let extra = KernelExtra::new(DataType::Float, flags).with_vec_len(4);
        let dim = SubproblemDim::new(4, 8, 8, 4, 8);
        let tiles = init_default_tiles(BlasFunction::Gemm, &dim, &extra);
        // column-major transposed A is read along its rows
        assert!(!tiles.a.trans);
        assert!(tiles.b.trans);
        assert!(tiles.c.trans);
        assert_eq!((tiles.a.rows, tiles.a.cols), (4, 8));
        assert_eq!((tiles.b.rows, tiles.b.cols), (8, 8));
        assert_eq!(tiles.c.vec_len, 4);

        let (at, bt) = init_tail_tiles(&tiles);
        assert_eq!((at.rows, at.cols, at.vec_len), (4, 1, 1));
        assert_eq!((bt.rows, bt.cols, bt.vec_len), (1, 8, 1));
    }

    #[test]
    fn test_declare_kernel() {
        let mut ctx = KgenContext::new(1024);
        let params = vec!["uint M".to_string(), "uint N".to_string()];
        declare_kernel(&mut ctx, &PGranularity::two_dim(8, 8), "sgemmBlock", &params).unwrap();
        assert_eq!(
            ctx.source(),
            "__attribute__((reqd_work_group_size(8, 8, 1)))\nvoid __kernel\nsgemmBlock(\n    uint M,\n    uint N)\n"
        );
        assert_eq!(ctx.last_func_name(), Some("sgemmBlock"));
    }
}
