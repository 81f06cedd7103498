//! Cursor over the physical storage of a tile.
//!
//! The iterator walks vectors of `vec_len` elements along each physical line
//! of a tile, then moves to the next line. Both axes can be walked backward,
//! which generators use when the natural dependency order runs from the
//! bottom-right corner of a triangular block.

use crate::error::{Result, TileError};
use crate::tile::Tile;

/// Walking direction of the logical axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileIterFlags {
    pub backward_rows: bool,
    pub backward_cols: bool,
}

impl TileIterFlags {
    pub const FORWARD: Self = Self {
        backward_rows: false,
        backward_cols: false,
    };
}

/// Physical tile cursor.
///
/// Every non-end state satisfies `line < nr_lines` and `vec < nr_vecs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysTileIterator {
    line: isize,
    vec: usize,
    nr_lines: usize,
    nr_vecs: usize,
    vec_len: usize,
    row_major: bool,
    backward_lines: bool,
    backward_vecs: bool,
}

impl PhysTileIterator {
    /// Iterate `tile` by vectors of `vec_len` elements.
    ///
    /// Fails if `vec_len` does not divide the tile's physical line width.
    pub fn new(tile: &Tile, vec_len: usize, flags: TileIterFlags) -> Result<Self> {
        let row_major = !tile.trans;
        let width = tile.width();
        if vec_len == 0 || width % vec_len != 0 {
            return Err(TileError::IterWidth { vec_len, width });
        }
        let (backward_lines, backward_vecs) = if row_major {
            (flags.backward_rows, flags.backward_cols)
        } else {
            (flags.backward_cols, flags.backward_rows)
        };

        let mut iter = Self {
            line: 0,
            vec: 0,
            nr_lines: tile.height(),
            nr_vecs: width / vec_len,
            vec_len,
            row_major,
            backward_lines,
            backward_vecs,
        };
        iter.rewind();
        Ok(iter)
    }

    /// Return to the first position in the walking order.
    pub fn rewind(&mut self) {
        if self.nr_lines == 0 || self.nr_vecs == 0 {
            self.line = self.end_line();
            self.vec = 0;
            return;
        }
        self.line = if self.backward_lines {
            self.nr_lines as isize - 1
        } else {
            0
        };
        self.vec = if self.backward_vecs { self.nr_vecs - 1 } else { 0 };
    }

    fn end_line(&self) -> isize {
        if self.backward_lines {
            -1
        } else {
            self.nr_lines as isize
        }
    }

    /// Step one vector; returns `true` once the end is reached.
    pub fn iterate(&mut self) -> bool {
        if self.is_end() {
            return true;
        }
        let wrapped = if self.backward_vecs {
            if self.vec == 0 {
                self.vec = self.nr_vecs - 1;
                true
            } else {
                self.vec -= 1;
                false
            }
        } else {
            self.vec += 1;
            if self.vec == self.nr_vecs {
                self.vec = 0;
                true
            } else {
                false
            }
        };
        if wrapped {
            self.line += if self.backward_lines { -1 } else { 1 };
        }
        self.is_end()
    }

    pub fn is_end(&self) -> bool {
        if self.backward_lines {
            self.line < 0
        } else {
            self.line >= self.nr_lines as isize
        }
    }

    /// Jump to the physical position `(line, vec)`.
    pub fn seek_phys(&mut self, line: usize, vec: usize) -> Result<()> {
        if line >= self.nr_lines || vec >= self.nr_vecs {
            return Err(TileError::InvalidSeek { line, vec });
        }
        self.line = line as isize;
        self.vec = vec;
        Ok(())
    }

    /// Jump to the vector holding the logical element `(row, col)`.
    pub fn seek(&mut self, row: usize, col: usize) -> Result<()> {
        let (line, along) = if self.row_major { (row, col) } else { (col, row) };
        self.seek_phys(line, along / self.vec_len)
    }

    pub fn line(&self) -> isize {
        self.line
    }

    pub fn vec(&self) -> usize {
        self.vec
    }

    pub fn nr_lines(&self) -> usize {
        self.nr_lines
    }

    pub fn nr_vecs(&self) -> usize {
        self.nr_vecs
    }

    pub fn vec_len(&self) -> usize {
        self.vec_len
    }

    /// Logical row of the current vector's first element.
    pub fn row(&self) -> usize {
        if self.row_major {
            self.line.max(0) as usize
        } else {
            self.vec * self.vec_len
        }
    }

    /// Logical column of the current vector's first element.
    pub fn col(&self) -> usize {
        if self.row_major {
            self.vec * self.vec_len
        } else {
            self.line.max(0) as usize
        }
    }
}

/// Yields the logical `(row, col)` of every vector in walking order.
impl Iterator for PhysTileIterator {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let pos = (self.row(), self.col());
        self.iterate();
        Some(pos)
    }
}
