//! Tile fetch and multiply-accumulate sub-generator.
//!
//! A fetch copies a block of a global matrix into a private tile. A multiply
//! accumulates `C += A * B` over three private tiles. Both produce their
//! statements through a [`StatementBatch`] so that a combined fetch and
//! multiply step lands in phase order: A fetch, B fetch, then the products.

use kgen_emit::{batch_printf, KgenContext, StatementBatch};
use kgen_tile::{complex_mul_update, real_mul_update, MulCore, Tile};

use super::{offset_expr, paren, pow2_floor, MatrixAccess};
use crate::error::Result;

/// Treatment of coordinates that may fall outside the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Bound {
    #[default]
    None,
    /// Read the last valid element instead; the value is discarded later.
    Clamp(String),
    /// Read zero instead; the value takes part in a sum.
    ZeroFill(String),
}

impl Bound {
    fn is_none(&self) -> bool {
        matches!(self, Bound::None)
    }
}

/// Static triangle mask of a diagonal block, relative to the tile origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriMask {
    /// Keep elements with `col <= row`.
    pub lower: bool,
    /// Replace the diagonal with ones.
    pub unit_diag: bool,
}

/// Block of a global matrix copied into a tile.
#[derive(Debug, Clone)]
pub struct FetchSpec<'a> {
    pub tile: &'a Tile,
    pub access: &'a MatrixAccess,
    /// Matrix row of the tile's first row.
    pub row0: String,
    /// Matrix column of the tile's first column.
    pub col0: String,
    pub row_bound: Bound,
    pub col_bound: Bound,
    pub mask: Option<TriMask>,
}

impl<'a> FetchSpec<'a> {
    pub fn new(tile: &'a Tile, access: &'a MatrixAccess, row0: impl Into<String>, col0: impl Into<String>) -> Self {
        Self {
            tile,
            access,
            row0: row0.into(),
            col0: col0.into(),
            row_bound: Bound::None,
            col_bound: Bound::None,
            mask: None,
        }
    }

    pub fn rows(mut self, bound: Bound) -> Self {
        self.row_bound = bound;
        self
    }

    pub fn cols(mut self, bound: Bound) -> Self {
        self.col_bound = bound;
        self
    }

    pub fn masked(mut self, mask: Option<TriMask>) -> Self {
        self.mask = mask;
        self
    }

    /// Elements fetched by one statement.
    fn segment_len(&self) -> usize {
        let line_bounded = if self.tile.trans {
            !self.row_bound.is_none()
        } else {
            !self.col_bound.is_none()
        };
        if self.mask.is_some() || line_bounded || !self.access.is_contiguous(self.tile) {
            1
        } else {
            pow2_floor(self.tile.line_segment_len())
        }
    }
}

fn bounded(coord: String, bound: &Bound) -> (String, Option<String>) {
    match bound {
        Bound::None => (coord, None),
        Bound::Clamp(lim) => (format!("min({coord}, {lim} - 1u)"), None),
        Bound::ZeroFill(lim) => {
            let cond = format!("{} < {lim}", paren(&coord));
            (coord, Some(cond))
        }
    }
}

/// Queue statements fetching a block into its tile.
pub fn gen_fetch(batch: &mut StatementBatch, priority: usize, spec: &FetchSpec<'_>) -> Result<()> {
    let tile = spec.tile;
    let dtype = tile.dtype;
    let access = spec.access;

    for (row, col, len) in tile.segments(spec.segment_len()) {
        let dst = tile.element_expr(row, col, len)?;

        if let Some(mask) = spec.mask {
            let outside = if mask.lower { col > row } else { col < row };
            if outside {
                batch_printf!(batch, priority, "{dst} = {};\n", dtype.str_zero())?;
                continue;
            }
            if mask.unit_diag && row == col {
                batch_printf!(batch, priority, "{dst} = {};\n", dtype.str_one())?;
                continue;
            }
        }

        let (grow, row_cond) = bounded(offset_expr(&spec.row0, row), &spec.row_bound);
        let (gcol, col_cond) = bounded(offset_expr(&spec.col0, col), &spec.col_bound);
        let idx = access.index(&grow, &gcol);

        let width = len * dtype.components();
        let load = if len > 1 && matches!(width, 2 | 4 | 8 | 16) {
            format!(
                "vload{width}(0, (const __global {} *)({} + {}))",
                dtype.base_type(),
                access.ptr,
                paren(&idx)
            )
        } else {
            format!("{}[{idx}]", access.ptr)
        };

        let conds: Vec<String> = row_cond.into_iter().chain(col_cond).collect();
        if conds.is_empty() {
            batch_printf!(batch, priority, "{dst} = {load};\n")?;
        } else {
            batch_printf!(
                batch,
                priority,
                "{dst} = ({}) ? {load} : {};\n",
                conds.join(" && "),
                dtype.str_zero()
            )?;
        }
    }
    Ok(())
}

/// Options of the multiply-accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MulOpts {
    pub conj_a: bool,
    pub conj_b: bool,
    pub core: MulCore,
}

fn broadcast(tile: &Tile, scalar: String, len: usize, core: MulCore) -> Result<String> {
    if len > 1 && core == MulCore::Mad {
        let vtype = tile.dtype.vector_type_name(len)?;
        Ok(format!("({vtype})({scalar})"))
    } else {
        Ok(scalar)
    }
}

/// Queue `c += a * b` over whole tiles.
///
/// Real products are vectorized along the C lines when the matching operand
/// tile shares their orientation, or reduced with `dot` when A lines run
/// along rows and B lines along columns.
pub fn gen_tile_mul(
    batch: &mut StatementBatch,
    priority: usize,
    a: &Tile,
    b: &Tile,
    c: &Tile,
    opts: MulOpts,
) -> Result<()> {
    let dtype = c.dtype;
    let (m_len, n_len, k_len) = (a.rows, b.cols, a.cols);

    if dtype.is_complex() {
        for m in 0..m_len {
            for n in 0..n_len {
                let ce = c.element_expr(m, n, 1)?;
                for k in 0..k_len {
                    let ae = a.element_expr(m, k, 1)?;
                    let be = b.element_expr(k, n, 1)?;
                    let stmt = complex_mul_update(
                        &ce,
                        &ae,
                        &be,
                        Some(&ce),
                        dtype.is_double_based(),
                        opts.conj_a,
                        opts.conj_b,
                        opts.core,
                    );
                    batch.add(priority, stmt)?;
                }
            }
        }
        return Ok(());
    }

    if !c.trans && !b.trans && c.line_segment_len() > 1 {
        let len = pow2_floor(c.line_segment_len().min(b.line_segment_len()));
        for m in 0..m_len {
            for k in 0..k_len {
                let ae = broadcast(c, a.element_expr(m, k, 1)?, len, opts.core)?;
                let mut n = 0;
                while n < n_len {
                    let seg = len.min(n_len - n);
                    let seg = pow2_floor(seg);
                    let cs = c.element_expr(m, n, seg)?;
                    let bs = b.element_expr(k, n, seg)?;
                    let ae = if seg == len { ae.clone() } else { broadcast(c, a.element_expr(m, k, 1)?, seg, opts.core)? };
                    batch.add(priority, real_mul_update(&cs, &ae, &bs, true, opts.core))?;
                    n += seg;
                }
            }
        }
        return Ok(());
    }

    if c.trans && a.trans && c.line_segment_len() > 1 {
        let len = pow2_floor(c.line_segment_len().min(a.line_segment_len()));
        for n in 0..n_len {
            for k in 0..k_len {
                let mut m = 0;
                while m < m_len {
                    let seg = pow2_floor(len.min(m_len - m));
                    let cs = c.element_expr(m, n, seg)?;
                    let as_ = a.element_expr(m, k, seg)?;
                    let be = broadcast(c, b.element_expr(k, n, 1)?, seg, opts.core)?;
                    batch.add(priority, real_mul_update(&cs, &as_, &be, true, opts.core))?;
                    m += seg;
                }
            }
        }
        return Ok(());
    }

    let dot_len = pow2_floor(a.line_segment_len().min(b.line_segment_len()).min(4));
    if !a.trans && b.trans && dot_len > 1 {
        for m in 0..m_len {
            for n in 0..n_len {
                let ce = c.element_expr(m, n, 1)?;
                let mut k = 0;
                while k < k_len {
                    let seg = pow2_floor(dot_len.min(k_len - k));
                    let as_ = a.element_expr(m, k, seg)?;
                    let bs = b.element_expr(k, n, seg)?;
                    let core = if seg > 1 { MulCore::Dot } else { opts.core };
                    batch.add(priority, real_mul_update(&ce, &as_, &bs, true, core))?;
                    k += seg;
                }
            }
        }
        return Ok(());
    }

    for m in 0..m_len {
        for n in 0..n_len {
            let ce = c.element_expr(m, n, 1)?;
            for k in 0..k_len {
                let ae = a.element_expr(m, k, 1)?;
                let be = b.element_expr(k, n, 1)?;
                batch.add(priority, real_mul_update(&ce, &ae, &be, true, opts.core))?;
            }
        }
    }
    Ok(())
}

/// Fetch both operand tiles and accumulate their product into `c`.
pub fn gen_fetch_and_mul(
    ctx: &mut KgenContext,
    fa: &FetchSpec<'_>,
    fb: &FetchSpec<'_>,
    c: &Tile,
    opts: MulOpts,
) -> Result<()> {
    let mut batch = StatementBatch::new();
    gen_fetch(&mut batch, 0, fa)?;
    gen_fetch(&mut batch, 1, fb)?;
    gen_tile_mul(&mut batch, 2, fa.tile, fb.tile, c, opts)?;
    batch.flush(ctx)?;
    Ok(())
}
