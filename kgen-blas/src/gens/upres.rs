//! Result update sub-generator.
//!
//! Writes the accumulated C tile back to global memory as
//! `C = alpha * c + beta * C`, `C = alpha * c`, or a plain copy. Tiles that
//! may stick out of the matrix get a full-tile fast path plus a guarded
//! element-wise branch; tiles crossing a triangle diagonal only store the
//! elements on the used side.

use kgen_emit::KgenContext;
use kgen_tile::{complex_mul_update, MulCore, Tile};

use super::{offset_expr, paren, pow2_floor, MatrixAccess};
use crate::error::Result;
use crate::func::Uplo;

/// Formula applied when storing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// `C = alpha * c + beta * C`
    AlphaBeta,
    /// `C = alpha * c`
    Alpha,
    /// `C = c`
    Copy,
}

/// Store description for one C tile.
#[derive(Debug, Clone)]
pub struct UpdateSpec<'a> {
    pub tile: &'a Tile,
    pub dst: &'a MatrixAccess,
    pub row0: String,
    pub col0: String,
    /// Row limit when the tile may stick out of the matrix.
    pub rows_lim: Option<String>,
    /// Column limit when the tile may stick out of the matrix.
    pub cols_lim: Option<String>,
    /// Store only the given triangle, diagonal included.
    pub diag: Option<Uplo>,
    pub kind: UpdateKind,
    pub core: MulCore,
}

impl<'a> UpdateSpec<'a> {
    pub fn new(tile: &'a Tile, dst: &'a MatrixAccess, row0: impl Into<String>, col0: impl Into<String>, kind: UpdateKind) -> Self {
        Self {
            tile,
            dst,
            row0: row0.into(),
            col0: col0.into(),
            rows_lim: None,
            cols_lim: None,
            diag: None,
            kind,
            core: MulCore::MulAdd,
        }
    }

    pub fn bounded(mut self, rows_lim: Option<String>, cols_lim: Option<String>) -> Self {
        self.rows_lim = rows_lim;
        self.cols_lim = cols_lim;
        self
    }

    pub fn triangle(mut self, diag: Option<Uplo>) -> Self {
        self.diag = diag;
        self
    }

    pub fn with_core(mut self, core: MulCore) -> Self {
        self.core = core;
        self
    }
}

fn scalar_update(spec: &UpdateSpec<'_>, elem: &str, dst: &str) -> String {
    let dtype = spec.tile.dtype;
    if dtype.is_complex() {
        let dbl = dtype.is_double_based();
        match spec.kind {
            UpdateKind::Copy => format!("{dst} = {elem};\n"),
            UpdateKind::Alpha => {
                let mut s = complex_mul_update("res", elem, "alpha", None, dbl, false, false, spec.core);
                s.push_str(&format!("{dst} = res;\n"));
                s
            }
            UpdateKind::AlphaBeta => {
                let mut s = complex_mul_update("res", elem, "alpha", None, dbl, false, false, spec.core);
                s.push_str(&format!("tmp = {dst};\n"));
                s.push_str(&complex_mul_update("res", "tmp", "beta", Some("res"), dbl, false, false, spec.core));
                s.push_str(&format!("{dst} = res;\n"));
                s
            }
        }
    } else {
        match spec.kind {
            UpdateKind::Copy => format!("{dst} = {elem};\n"),
            UpdateKind::Alpha => format!("{dst} = {elem} * alpha;\n"),
            UpdateKind::AlphaBeta if spec.core == MulCore::Mad => {
                format!("{dst} = mad({dst}, beta, {elem} * alpha);\n")
            }
            UpdateKind::AlphaBeta => format!("{dst} = {dst} * beta + {elem} * alpha;\n"),
        }
    }
}

fn vector_update(spec: &UpdateSpec<'_>, seg: &str, idx: &str, len: usize) -> String {
    let base = spec.tile.dtype.base_type();
    let ptr = format!("(__global {base} *)({} + {})", spec.dst.ptr, paren(idx));
    let value = match spec.kind {
        UpdateKind::Copy => seg.to_string(),
        UpdateKind::Alpha => format!("{seg} * alpha"),
        UpdateKind::AlphaBeta => format!("{seg} * alpha + vload{len}(0, {ptr}) * beta"),
    };
    format!("vstore{len}({value}, 0, {ptr});\n")
}

/// Emit the stores of one tile, guarded element-wise when `guarded`.
fn gen_stores(ctx: &mut KgenContext, spec: &UpdateSpec<'_>, guarded: bool) -> Result<()> {
    let tile = spec.tile;
    let vectorize = !guarded
        && spec.diag.is_none()
        && !tile.dtype.is_complex()
        && spec.dst.is_contiguous(tile);
    let seg_len = if vectorize {
        pow2_floor(tile.line_segment_len())
    } else {
        1
    };

    for (row, col, len) in tile.segments(seg_len) {
        let elem = tile.element_expr(row, col, len)?;
        let grow = offset_expr(&spec.row0, row);
        let gcol = offset_expr(&spec.col0, col);

        if len > 1 {
            let idx = spec.dst.index(&grow, &gcol);
            ctx.add_stmt(&vector_update(spec, &elem, &idx, len))?;
            continue;
        }

        let mut conds = Vec::new();
        if guarded {
            if let Some(lim) = &spec.rows_lim {
                conds.push(format!("{} < {lim}", paren(&grow)));
            }
            if let Some(lim) = &spec.cols_lim {
                conds.push(format!("{} < {lim}", paren(&gcol)));
            }
        }
        match spec.diag {
            Some(Uplo::Lower) => conds.push(format!("{} >= {}", paren(&grow), paren(&gcol))),
            Some(Uplo::Upper) => conds.push(format!("{} <= {}", paren(&grow), paren(&gcol))),
            None => {}
        }

        let stmt = scalar_update(spec, &elem, &spec.dst.element(&grow, &gcol));
        if conds.is_empty() {
            ctx.add_stmt(&stmt)?;
        } else {
            ctx.begin_branch(Some(&format!("if ({})", conds.join(" && "))))?;
            ctx.add_stmt(&stmt)?;
            ctx.end_branch(None)?;
        }
    }
    Ok(())
}

/// Emit the result update of `spec.tile`.
pub fn gen_result_update(ctx: &mut KgenContext, spec: &UpdateSpec<'_>) -> Result<()> {
    let tile = spec.tile;
    if tile.dtype.is_complex() && spec.kind != UpdateKind::Copy {
        let t = tile.dtype.builtin_type();
        if spec.kind == UpdateKind::AlphaBeta {
            kgen_emit::kprintf!(ctx, "{t} res, tmp;\n")?;
        } else {
            kgen_emit::kprintf!(ctx, "{t} res;\n")?;
        }
    }

    if spec.rows_lim.is_none() && spec.cols_lim.is_none() {
        return gen_stores(ctx, spec, false);
    }

    let mut full = Vec::new();
    if let Some(lim) = &spec.rows_lim {
        full.push(format!("({} + {}u <= {lim})", spec.row0, tile.rows));
    }
    if let Some(lim) = &spec.cols_lim {
        full.push(format!("({} + {}u <= {lim})", spec.col0, tile.cols));
    }
    ctx.begin_branch(Some(&format!("if ({})", full.join(" && "))))?;
    gen_stores(ctx, spec, false)?;
    ctx.end_branch(None)?;
    ctx.begin_branch(Some("else"))?;
    gen_stores(ctx, spec, true)?;
    ctx.end_branch(None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgen_tile::DataType;

    #[test]
    fn test_vector_store_with_beta() {
        let tile = Tile::new("c", 1, 4, DataType::Float).with_vec_len(4);
        let dst = MatrixAccess::new("C", "ldc", false);
        let spec = UpdateSpec::new(&tile, &dst, "coord.y", "coord.x", UpdateKind::AlphaBeta);
        let mut ctx = KgenContext::new(1 << 12);
        gen_result_update(&mut ctx, &spec).unwrap();
        assert_eq!(
            ctx.source(),
            "vstore4(c[0] * alpha + vload4(0, (__global float *)(C + (coord.y * ldc + coord.x))) * beta, \
             0, (__global float *)(C + (coord.y * ldc + coord.x)));\n"
        );
    }

    #[test]
    fn test_beta_zero_scalar_store() {
        let tile = Tile::new("c", 1, 1, DataType::Double).with_vec_len(1);
        let dst = MatrixAccess::new("C", "ldc", true);
        let spec = UpdateSpec::new(&tile, &dst, "y", "x", UpdateKind::Alpha);
        let mut ctx = KgenContext::new(1 << 12);
        gen_result_update(&mut ctx, &spec).unwrap();
        assert_eq!(ctx.source(), "C[y + x * ldc] = c[0] * alpha;\n");
    }

    #[test]
    fn test_tail_branch() {
        let tile = Tile::new("c", 1, 2, DataType::Float).with_vec_len(2);
        let dst = MatrixAccess::new("C", "ldc", false);
        let spec = UpdateSpec::new(&tile, &dst, "y", "x", UpdateKind::Alpha)
            .bounded(None, Some("N".to_string()));
        let mut ctx = KgenContext::new(1 << 12);
        ctx.declare_function("void\nf()\n").unwrap();
        ctx.begin_func_body().unwrap();
        gen_result_update(&mut ctx, &spec).unwrap();
        ctx.end_func_body().unwrap();
        assert_eq!(
            ctx.source(),
            "void\nf()\n{\n\
             \x20   if ((x + 2u <= N)) {\n\
             \x20       vstore2(c[0] * alpha, 0, (__global float *)(C + (y * ldc + x)));\n\
             \x20   }\n\
             \x20   else {\n\
             \x20       if (x < N) {\n\
             \x20           C[y * ldc + x] = c[0].s0 * alpha;\n\
             \x20       }\n\
             \x20       if ((x + 1u) < N) {\n\
             \x20           C[y * ldc + x + 1u] = c[0].s1 * alpha;\n\
             \x20       }\n\
             \x20   }\n\
             }\n"
        );
    }

    #[test]
    fn test_diagonal_guard() {
        let tile = Tile::new("c", 2, 1, DataType::Float).with_vec_len(1);
        let dst = MatrixAccess::new("C", "ldc", false);
        let spec = UpdateSpec::new(&tile, &dst, "y", "x", UpdateKind::Copy).triangle(Some(Uplo::Upper));
        let mut ctx = KgenContext::new(1 << 12).with_format(false);
        gen_result_update(&mut ctx, &spec).unwrap();
        assert_eq!(
            ctx.source(),
            "if (y <= x) {\nC[y * ldc + x] = c[0];\n}\nif ((y + 1u) <= x) {\nC[(y + 1u) * ldc + x] = c[1];\n}\n"
        );
    }

    #[test]
    fn test_complex_alpha_beta() {
        let tile = Tile::new("c", 1, 1, DataType::ComplexFloat).with_vec_len(1);
        let dst = MatrixAccess::new("C", "ldc", false);
        let spec = UpdateSpec::new(&tile, &dst, "y", "x", UpdateKind::AlphaBeta);
        let mut ctx = KgenContext::new(1 << 12);
        gen_result_update(&mut ctx, &spec).unwrap();
        let src = ctx.into_source();
        assert!(src.starts_with("float2 res, tmp;\n"));
        assert!(src.contains("tmp = C[y * ldc + x];\n"));
        assert!(src.contains("res += "));
        assert!(src.ends_with("C[y * ldc + x] = res;\n"));
    }
}
