//! Pieces shared by the TRMM and TRSM kernels.
//!
//! Both kernels are column owners: a work item owns `item_x` columns of B
//! and walks every row tile of them. A right side problem `B op(A)` is
//! turned into the left side problem `op(A)ᵀ Bᵀ` by swapping the addressing
//! of both matrices, so the generators only ever see the left side.

use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::DataType;

use super::{offset_kargs, offset_params, tile_for, MatrixAccess, TileSet};
use crate::error::Result;
use crate::extra::KernelExtra;
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::{KernelArg, KernelArgs};
use crate::solver::CheckCalcPGran;

type F = KernelExtraFlags;

/// Items per work group along the owned columns.
pub(crate) const TRXM_GROUP_ITEMS: usize = 64;

/// Left side view of a triangular problem.
#[derive(Debug, Clone)]
pub(crate) struct TrxmLayout {
    pub acc_a: MatrixAccess,
    pub acc_b: MatrixAccess,
    /// `op(A)` seen from the left side is upper triangular.
    pub upper: bool,
    /// Kernel parameter bounding the rows of the left side view.
    pub rows: &'static str,
    /// Kernel parameter bounding the owned columns.
    pub cols: &'static str,
    pub row_tail: bool,
    pub col_tail: bool,
    /// Items may lie past the last column.
    pub col_overhang: bool,
}

impl TrxmLayout {
    pub fn new(func: BlasFunction, flags: KernelExtraFlags) -> Self {
        let right = flags.contains(F::SIDE_RIGHT);
        let cm_a = flags.is_col_major_access(func, MatrixRole::A);
        let cm_b = flags.is_col_major_access(func, MatrixRole::B);
        let upper = flags.is_upper() ^ flags.contains(F::TRANS_A) ^ right;
        let (m_tail, n_tail) = (flags.contains(F::TAILS_M_LOWER), flags.contains(F::TAILS_N_LOWER));
        let (m_top, n_top) = (flags.contains(F::TAILS_M), flags.contains(F::TAILS_N));

        Self {
            acc_a: MatrixAccess::new("A", "lda", cm_a ^ right),
            acc_b: MatrixAccess::new("B", "ldb", cm_b ^ right),
            upper,
            rows: if right { "N" } else { "M" },
            cols: if right { "M" } else { "N" },
            row_tail: if right { n_tail } else { m_tail },
            col_tail: if right { m_tail } else { n_tail },
            col_overhang: if right { m_top } else { n_top },
        }
    }

    /// Tiles of the left side view; C has the layout of B.
    pub fn tiles(&self, dims: &SubproblemDim, extra: &KernelExtra) -> TileSet {
        let dtype = extra.dtype;
        TileSet {
            a: tile_for("a", dims.y, dims.bwidth, self.acc_a.col_major, dtype, extra.vec_len_for(MatrixRole::A)),
            b: tile_for("b", dims.bwidth, dims.x, self.acc_b.col_major, dtype, extra.vec_len_for(MatrixRole::B)),
            c: tile_for("c", dims.y, dims.x, self.acc_b.col_major, dtype, extra.vec_len_for(MatrixRole::B)),
        }
    }

    /// Open the loop over row tiles, bottom-up when `backward`.
    pub fn begin_row_loop(&self, ctx: &mut KgenContext, y: usize, backward: bool) -> Result<()> {
        let rows = self.rows;
        if backward {
            ctx.begin_branch(Some(&format!(
                "for (uint ty = ({rows} + {}u) / {y}u; ty > 0u; ty--)",
                y - 1
            )))?;
            kgen_emit::kprintf!(ctx, "coord.y = (ty - 1u) * {y}u;\n")?;
        } else {
            ctx.begin_branch(Some(&format!("for (coord.y = 0u; coord.y < {rows}; coord.y += {y}u)")))?;
        }
        Ok(())
    }
}

pub(crate) fn trxm_params(dtype: DataType, flags: KernelExtraFlags) -> Vec<String> {
    let t = dtype.builtin_type();
    let mut params = vec![
        "uint M".to_string(),
        "uint N".to_string(),
        format!("const {t} alpha"),
        format!("const __global {t} *restrict A"),
        format!("__global {t} *B"),
        "uint lda".to_string(),
        "uint ldb".to_string(),
    ];
    offset_params(flags, &mut params);
    params
}

pub(crate) fn trxm_kargs(kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
    let mut args = KernelArgs::new();
    args.push(KernelArg::Size(kargs.m));
    args.push(KernelArg::Size(kargs.n));
    args.push(KernelArg::scalar(kargs.alpha, kargs.dtype));
    args.push(KernelArg::Buffer(kargs.a));
    args.push(KernelArg::Buffer(kargs.b));
    args.push(KernelArg::Size(kargs.lda));
    args.push(KernelArg::Size(kargs.ldb));
    offset_kargs(extra.flags, kargs, &mut args);
    args
}

/// One dimensional global size covering the owned columns.
pub(crate) fn trxm_threads(subdims: &[SubproblemDim], pgran: &PGranularity, kargs: &BlasKargs) -> Option<[usize; 2]> {
    let item = subdims.get(1)?;
    let cols = if kargs.base_flags().contains(F::SIDE_RIGHT) {
        kargs.m
    } else {
        kargs.n
    };
    let wg = (pgran.wg_size[0] as usize).max(1);
    let items = cols.div_ceil(item.x.max(1));
    Some([items.div_ceil(wg) * wg, 1])
}

pub(crate) fn trxm_default_decomposition(dtype: DataType, wf_size: u32) -> ([SubproblemDim; 2], PGranularity) {
    let item = if dtype == DataType::ComplexDouble { 2 } else { 4 };
    let top_x = item * TRXM_GROUP_ITEMS;
    let subdims = [
        SubproblemDim::new(item, top_x, item, item, top_x),
        SubproblemDim::new(item, item, item, item, item),
    ];
    let pgran = PGranularity {
        wf_size,
        ..PGranularity::one_dim(TRXM_GROUP_ITEMS as u32)
    };
    (subdims, pgran)
}

/// Shared decomposition check; `extra_tiles` counts private tiles shaped
/// like C besides C itself.
pub(crate) fn trxm_check_decomposition(
    subdims: &[SubproblemDim],
    pgran: &mut PGranularity,
    dtype: DataType,
    check: CheckCalcPGran,
    extra_tiles: usize,
    wavefront: u32,
) -> bool {
    let [top, item, ..] = subdims else {
        return false;
    };
    let max_size = if dtype == DataType::ComplexDouble { 4 } else { 8 };
    let in_range = |v: usize| (1..=max_size).contains(&v);
    if !(in_range(item.x) && in_range(item.y) && in_range(item.bwidth)) {
        return false;
    }
    if item.bwidth != item.y || item.item_x != item.x || item.item_y != item.y {
        return false;
    }
    if top.x % item.x != 0 || top.y != item.y {
        return false;
    }
    let regs = (item.y * item.bwidth + item.bwidth * item.x + (1 + extra_tiles) * item.x * item.y) * dtype.size() / 16;
    if regs > 40 {
        return false;
    }

    let items = (top.x / item.x) as u32;
    match check {
        CheckCalcPGran::Check => {
            let wf = if pgran.wf_size == 0 { wavefront } else { pgran.wf_size };
            pgran.wg_dim == 1 && pgran.wg_size[0] == items && items % wf == 0
        }
        CheckCalcPGran::Calc => {
            pgran.wg_dim = 1;
            pgran.wg_size = [items, 1];
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_right_side_swaps_roles() {
        let left = TrxmLayout::new(BlasFunction::Trmm, F::TAILS_M_LOWER);
        assert_eq!((left.rows, left.cols), ("M", "N"));
        assert!(!left.upper && left.row_tail && !left.col_tail);
        assert!(!left.acc_b.col_major);

        let right = TrxmLayout::new(BlasFunction::Trmm, F::SIDE_RIGHT | F::TAILS_M_LOWER | F::UPPER_TRIANG);
        assert_eq!((right.rows, right.cols), ("N", "M"));
        assert!(!right.upper);
        assert!(!right.row_tail && right.col_tail);
        assert!(right.acc_a.col_major && right.acc_b.col_major);
    }

    #[test]
    fn test_transposed_lower_is_upper() {
        let layout = TrxmLayout::new(BlasFunction::Trsm, F::TRANS_A | F::COLUMN_MAJOR);
        assert!(layout.upper);
        assert!(!layout.acc_a.col_major);
    }

    #[test]
    fn test_backward_row_loop() {
        let layout = TrxmLayout::new(BlasFunction::Trmm, F::empty());
        let mut ctx = KgenContext::new(1024).with_format(false);
        layout.begin_row_loop(&mut ctx, 4, true).unwrap();
        ctx.end_branch(None).unwrap();
        assert_eq!(
            ctx.source(),
            "for (uint ty = (M + 3u) / 4u; ty > 0u; ty--) {\ncoord.y = (ty - 1u) * 4u;\n}\n"
        );
    }

    #[test]
    fn test_threads_cover_columns() {
        let (subdims, pgran) = trxm_default_decomposition(DataType::Float, 64);
        let mut kargs = BlasKargs::new(BlasFunction::Trmm, DataType::Float);
        kargs.m = 10;
        kargs.n = 300;
        // 75 items rounded up to two groups
        assert_eq!(trxm_threads(&subdims, &pgran, &kargs), Some([128, 1]));
    }

    #[test]
    fn test_default_decomposition_checks() {
        for dtype in DataType::ALL {
            let (subdims, mut pgran) = trxm_default_decomposition(dtype, 64);
            assert!(trxm_check_decomposition(&subdims, &mut pgran, dtype, CheckCalcPGran::Check, 1, 64));
        }
    }
}
