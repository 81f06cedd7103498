//! Tiles: blocks of a matrix held in kernel private memory.
//!
//! A [`Tile`] only describes storage. It names the private array or variable
//! set, its logical shape and its physical layout, and renders expressions
//! addressing its elements. Physically a tile is a sequence of lines of
//! `pitch` elements each; lines are rows for a plain tile and columns for a
//! transposed one. Lines are packed into OpenCL vectors of `vec_len`
//! elements.

use kgen_emit::KgenContext;

use crate::dtype::DataType;
use crate::error::{Result, TileError};
use crate::expr::{take_complex_apart, vec_chunk};

/// Widest vector a tile is stored in.
pub const MAX_TILE_VECLEN: usize = 8;

/// How the private storage of a tile is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrivateStorage {
    /// `float4 a[n];`
    #[default]
    Array,
    /// `float4 a0, a1, ...;`
    VariableSet,
}

/// Half of a complex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementHalf {
    Low,
    High,
}

/// Assignment operator used by [`Tile::gen_copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileCopyOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl TileCopyOp {
    pub fn as_str(self) -> &'static str {
        match self {
            TileCopyOp::Set => "=",
            TileCopyOp::Add => "+=",
            TileCopyOp::Sub => "-=",
            TileCopyOp::Mul => "*=",
            TileCopyOp::Div => "/=",
            TileCopyOp::Mod => "%=",
        }
    }
}

/// Private memory block description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub vec_len: usize,
    pub dtype: DataType,
    pub storage: PrivateStorage,
    /// Lines are columns instead of rows.
    pub trans: bool,
    /// Several short lines may share one vector.
    pub packed: bool,
}

impl Tile {
    /// Plain row-major tile using array storage and the default vector
    /// length.
    pub fn new(name: impl Into<String>, rows: usize, cols: usize, dtype: DataType) -> Self {
        let mut tile = Self {
            name: name.into(),
            rows,
            cols,
            vec_len: 1,
            dtype,
            storage: PrivateStorage::Array,
            trans: false,
            packed: false,
        };
        tile.vec_len = tile.default_vec_len();
        tile
    }

    /// Set the transposition flag and reselect the default vector length.
    pub fn transposed(mut self, trans: bool) -> Self {
        self.trans = trans;
        self.vec_len = self.default_vec_len();
        self
    }

    /// Set packing and reselect the default vector length.
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = packed;
        self.vec_len = self.default_vec_len();
        self
    }

    pub fn with_storage(mut self, storage: PrivateStorage) -> Self {
        self.storage = storage;
        self
    }

    /// Force a vector length, capped at [`MAX_TILE_VECLEN`].
    pub fn with_vec_len(mut self, vec_len: usize) -> Self {
        self.vec_len = vec_len.clamp(1, MAX_TILE_VECLEN);
        self
    }

    /// Elements along a physical line.
    pub fn width(&self) -> usize {
        if self.trans {
            self.rows
        } else {
            self.cols
        }
    }

    /// Number of physical lines.
    pub fn height(&self) -> usize {
        if self.trans {
            self.cols
        } else {
            self.rows
        }
    }

    /// Distance in elements between the starts of two adjacent lines.
    pub fn pitch(&self) -> usize {
        let width = self.width();
        if self.packed {
            width.next_power_of_two()
        } else {
            width.div_ceil(self.vec_len) * self.vec_len
        }
    }

    /// Number of vectors in the private storage.
    pub fn vectors_num(&self) -> usize {
        (self.height() * self.pitch()).div_ceil(self.vec_len)
    }

    /// Longest run of elements that never leaves a line or a vector.
    pub fn line_segment_len(&self) -> usize {
        self.pitch().min(self.vec_len).min(self.width())
    }

    /// Vector length picked when none is requested explicitly.
    pub fn default_vec_len(&self) -> usize {
        let width = self.width().max(1).next_power_of_two();
        let len = if self.packed {
            self.height().max(1) * width
        } else {
            width
        };
        len.min(MAX_TILE_VECLEN)
    }

    fn out_of_bounds(&self, row: usize, col: usize, len: usize) -> TileError {
        TileError::OutOfBounds {
            row,
            col,
            len,
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Expression addressing `len` elements stored contiguously from
    /// `(row, col)`. A `len` of 0 selects a whole vector.
    pub fn element_expr(&self, row: usize, col: usize, len: usize) -> Result<String> {
        let len = if len == 0 { self.vec_len } else { len };
        let pitch = self.pitch();
        let elem_len = self.dtype.components();

        let off = if !self.trans {
            if row >= self.rows || col + len > self.cols {
                return Err(self.out_of_bounds(row, col, len));
            }
            (row * pitch + col) * elem_len
        } else {
            if row + len > self.rows || col >= self.cols {
                return Err(self.out_of_bounds(row, col, len));
            }
            (col * pitch + row) * elem_len
        };

        let vec_components = self.vec_len * elem_len;
        let chunk_len = len * elem_len;
        if off % vec_components + chunk_len > vec_components {
            return Err(self.out_of_bounds(row, col, len));
        }
        let chunk = vec_chunk(vec_components, chunk_len, off % vec_components);
        let idx = off / vec_components;

        Ok(match self.storage {
            PrivateStorage::Array => format!("{}[{idx}]{chunk}", self.name),
            PrivateStorage::VariableSet => format!("{}{idx}{chunk}", self.name),
        })
    }

    /// Real or imaginary part of the complex element at `(row, col)`.
    pub fn element_half(&self, row: usize, col: usize, half: ElementHalf) -> Result<String> {
        if !self.dtype.is_complex() {
            return Err(TileError::NotComplex(self.name.clone()));
        }
        let (re, im) = take_complex_apart(&self.element_expr(row, col, 1)?);
        Ok(match half {
            ElementHalf::Low => re,
            ElementHalf::High => im,
        })
    }

    /// Logical `(row, col, len)` segments covering the tile line by line.
    pub fn segments(&self, seg_len: usize) -> Vec<(usize, usize, usize)> {
        let seg_len = seg_len.max(1);
        let width = self.width();
        let mut out = Vec::with_capacity(self.height() * width.div_ceil(seg_len));
        for line in 0..self.height() {
            let mut pos = 0;
            while pos < width {
                let len = seg_len.min(width - pos);
                if self.trans {
                    out.push((pos, line, len));
                } else {
                    out.push((line, pos, len));
                }
                pos += len;
            }
        }
        out
    }

    pub fn declare_storage(&self, ctx: &mut KgenContext) -> Result<()> {
        let type_name = self.dtype.vector_type_name(self.vec_len)?;
        let size = self.vectors_num();
        let decl = match self.storage {
            PrivateStorage::Array => format!("{type_name} {}[{size}];\n", self.name),
            PrivateStorage::VariableSet => {
                let vars: Vec<String> = (0..size).map(|i| format!("{}{i}", self.name)).collect();
                format!("{type_name} {};\n", vars.join(", "))
            }
        };
        ctx.add_stmt(&decl)?;
        Ok(())
    }

    /// Emit statements zeroing the whole tile.
    pub fn gen_zero(&self, ctx: &mut KgenContext) -> Result<()> {
        for (row, col, len) in self.segments(self.line_segment_len()) {
            let elem = self.element_expr(row, col, len)?;
            kgen_emit::kprintf!(ctx, "{elem} = 0;\n")?;
        }
        ctx.add_blank_line()?;
        Ok(())
    }

    /// Emit statements setting the diagonal elements to one.
    pub fn gen_set_unit(&self, ctx: &mut KgenContext) -> Result<()> {
        let one = self.dtype.str_one();
        for i in 0..self.rows.min(self.cols) {
            let elem = self.element_expr(i, i, 1)?;
            kgen_emit::kprintf!(ctx, "{elem} = {one};\n")?;
        }
        Ok(())
    }

    /// Emit `dst op src` over every element of two equally shaped tiles.
    pub fn gen_copy(ctx: &mut KgenContext, dst: &Tile, src: &Tile, op: TileCopyOp) -> Result<()> {
        if dst.rows != src.rows || dst.cols != src.cols {
            return Err(dst.out_of_bounds(src.rows, src.cols, 0));
        }
        let seg_len = if dst.trans != src.trans || dst.dtype != src.dtype {
            1
        } else {
            dst.line_segment_len().min(src.line_segment_len())
        };
        for (row, col, len) in dst.segments(seg_len) {
            let d = dst.element_expr(row, col, len)?;
            let s = src.element_expr(row, col, len)?;
            kgen_emit::kprintf!(ctx, "{d} {} {s};\n", op.as_str())?;
        }
        ctx.add_blank_line()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vec_len_and_pitch() {
        let t = Tile::new("a", 4, 6, DataType::Float);
        assert_eq!(t.vec_len, 8);
        assert_eq!(t.pitch(), 8);
        assert_eq!(t.vectors_num(), 4);
        assert_eq!(t.line_segment_len(), 6);

        // Transposed tiles store columns as lines
        let t = Tile::new("b", 4, 6, DataType::Float).transposed(true);
        assert_eq!(t.vec_len, 4);
        assert_eq!(t.pitch(), 4);
        assert_eq!(t.vectors_num(), 6);
    }

    #[test]
    fn test_packed_pitch() {
        let t = Tile::new("c", 4, 2, DataType::Float).packed(true);
        // four lines of two elements share one float8
        assert_eq!(t.vec_len, 8);
        assert_eq!(t.pitch(), 2);
        assert_eq!(t.vectors_num(), 1);
        assert_eq!(t.element_expr(1, 0, 2).unwrap(), "c[0].s23");
    }

    #[test]
    fn test_element_expr_array() {
        let t = Tile::new("a", 2, 8, DataType::Float).with_vec_len(4);
        assert_eq!(t.element_expr(0, 0, 0).unwrap(), "a[0]");
        assert_eq!(t.element_expr(0, 4, 4).unwrap(), "a[1]");
        assert_eq!(t.element_expr(1, 5, 2).unwrap(), "a[3].s12");
        assert_eq!(t.element_expr(1, 7, 1).unwrap(), "a[3].s3");
    }

    #[test]
    fn test_element_expr_variable_set_trans() {
        let t = Tile::new("b", 4, 2, DataType::Double)
            .transposed(true)
            .with_vec_len(2)
            .with_storage(PrivateStorage::VariableSet);
        // column 1 is the second line: vectors 2 and 3
        assert_eq!(t.element_expr(2, 1, 1).unwrap(), "b3.s0");
        assert_eq!(t.element_expr(0, 1, 2).unwrap(), "b2");
    }

    #[test]
    fn test_element_expr_complex() {
        let t = Tile::new("c", 1, 4, DataType::ComplexFloat).with_vec_len(2);
        assert_eq!(t.element_expr(0, 1, 1).unwrap(), "c[0].s23");
        assert_eq!(t.element_expr(0, 2, 2).unwrap(), "c[1]");
        assert_eq!(t.element_half(0, 1, ElementHalf::Low).unwrap(), "c[0].s2");
        assert_eq!(t.element_half(0, 1, ElementHalf::High).unwrap(), "c[0].s3");

        let t = Tile::new("d", 2, 2, DataType::ComplexDouble).with_vec_len(1);
        assert_eq!(t.element_half(1, 0, ElementHalf::High).unwrap(), "d[2].s1");
    }

    #[test]
    fn test_element_out_of_bounds() {
        let t = Tile::new("a", 2, 8, DataType::Float).with_vec_len(4);
        assert!(t.element_expr(2, 0, 1).is_err());
        assert!(t.element_expr(0, 7, 2).is_err());
        // crossing a vector boundary inside the line
        assert!(t.element_expr(0, 3, 2).is_err());
        assert!(matches!(
            Tile::new("r", 1, 1, DataType::Float).element_half(0, 0, ElementHalf::Low),
            Err(TileError::NotComplex(_))
        ));
    }

    #[test]
    fn test_declare_storage() {
        let mut ctx = KgenContext::new(256);
        Tile::new("a", 2, 4, DataType::Float)
            .declare_storage(&mut ctx)
            .unwrap();
        Tile::new("b", 1, 4, DataType::ComplexFloat)
            .with_vec_len(2)
            .with_storage(PrivateStorage::VariableSet)
            .declare_storage(&mut ctx)
            .unwrap();
        assert_eq!(ctx.source(), "float4 a[2];\nfloat4 b0, b1;\n");
    }

    #[test]
    fn test_gen_zero_clips_segments() {
        let mut ctx = KgenContext::new(1024);
        let t = Tile::new("a", 1, 6, DataType::Float).with_vec_len(4);
        t.gen_zero(&mut ctx).unwrap();
        assert_eq!(ctx.source(), "a[0] = 0;\na[1].s01 = 0;\n\n");
    }

    #[test]
    fn test_gen_set_unit() {
        let mut ctx = KgenContext::new(1024);
        let t = Tile::new("a", 2, 2, DataType::ComplexFloat).with_vec_len(1);
        t.gen_set_unit(&mut ctx).unwrap();
        assert_eq!(
            ctx.source(),
            "a[0] = (float2)(1, 0);\na[3] = (float2)(1, 0);\n"
        );
    }

    #[test]
    fn test_gen_copy_mixed_layout() {
        let mut ctx = KgenContext::new(1024);
        let dst = Tile::new("c", 2, 2, DataType::Float).with_vec_len(2);
        let src = Tile::new("t", 2, 2, DataType::Float)
            .transposed(true)
            .with_vec_len(2);
        Tile::gen_copy(&mut ctx, &dst, &src, TileCopyOp::Add).unwrap();
        assert_eq!(
            ctx.source(),
            "c[0].s0 += t[0].s0;\nc[0].s1 += t[1].s0;\nc[1].s0 += t[0].s1;\nc[1].s1 += t[1].s1;\n\n"
        );
    }

    #[test]
    fn test_gen_copy_shape_mismatch() {
        let mut ctx = KgenContext::new(1024);
        let a = Tile::new("a", 2, 2, DataType::Float);
        let b = Tile::new("b", 2, 4, DataType::Float);
        assert!(Tile::gen_copy(&mut ctx, &a, &b, TileCopyOp::Set).is_err());
    }
}
