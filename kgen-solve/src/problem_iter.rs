//! Cursor over one axis of one matrix role.
//!
//! Used to walk image-backed problems panel by panel. The axis extent is
//! taken from the argument block: A runs along the triangle side (M, or N
//! for right side TRMM and TRSM) and B along the other side.

use kgen_blas::{BlasFunction, BlasKargs, MatrixRole, Side, Transpose, Uplo};
use kgen_emit::SubproblemDim;

use crate::step::prob_dims;

/// Height of one block of `role` in the decomposition `dim`.
pub fn matr_block_height(dim: &SubproblemDim, role: MatrixRole) -> usize {
    match role {
        MatrixRole::A | MatrixRole::C => dim.y,
        MatrixRole::B => dim.x,
    }
}

/// Whether `func` must walk its triangle from the far end.
///
/// TRMM overwrites B in place, so rows still needed as input must be
/// visited before the rows depending on them are rewritten. TRSM solves in
/// the opposite order.
fn scans_backward(func: BlasFunction, side: Side, uplo: Uplo, trans: Transpose) -> bool {
    let upper = uplo == Uplo::Upper;
    let trans = trans.is_trans();
    let trmm_backward = match side {
        Side::Left => upper != trans,
        Side::Right => upper == trans,
    };
    match func {
        BlasFunction::Trmm => trmm_backward,
        BlasFunction::Trsm => !trmm_backward,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct ProblemIterator {
    func: BlasFunction,
    extent: usize,
    /// Distance moved by one `iterate` call; zero covers everything at once.
    step: usize,
    backward: bool,
    pos: usize,
    prev_pos: usize,
}

impl ProblemIterator {
    /// Iterator over the axis of `role`.
    ///
    /// Non-TRSM functions advance by `max_panels` blocks of the level 0
    /// decomposition, TRSM by `max_blocks`.
    pub fn new(
        func: BlasFunction,
        role: MatrixRole,
        kargs: &BlasKargs,
        max_panels: usize,
        max_blocks: usize,
        subdims: &[SubproblemDim],
    ) -> Self {
        let dims = prob_dims(kargs);
        let extent = match role {
            MatrixRole::A | MatrixRole::C => dims.y,
            MatrixRole::B => dims.x,
        };
        let height = subdims.first().map_or(0, |d| matr_block_height(d, role));
        let count = if func == BlasFunction::Trsm { max_blocks } else { max_panels };
        let backward = scans_backward(func, kargs.side, kargs.uplo, kargs.trans_a);

        let mut iter = Self {
            func,
            extent,
            step: count * height,
            backward,
            pos: 0,
            prev_pos: 0,
        };
        iter.reset();
        iter
    }

    pub fn func(&self) -> BlasFunction {
        self.func
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn is_backward(&self) -> bool {
        self.backward
    }

    /// Rewind to the starting end.
    pub fn reset(&mut self) {
        self.pos = if self.backward { self.extent } else { 0 };
        self.prev_pos = self.pos;
    }

    /// Remaining distance to the far end.
    pub fn remaining(&self) -> usize {
        if self.backward {
            self.pos
        } else {
            self.extent - self.pos
        }
    }

    pub fn is_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Advance one step; returns whether the far end was reached.
    pub fn iterate(&mut self) -> bool {
        let remaining = self.remaining();
        let delta = if self.step == 0 { remaining } else { remaining.min(self.step) };
        self.prev_pos = self.pos;
        if self.backward {
            self.pos -= delta;
        } else {
            self.pos += delta;
        }
        self.is_end()
    }

    /// Distance travelled by the last `iterate` call.
    pub fn last_offset(&self) -> usize {
        self.pos.abs_diff(self.prev_pos)
    }

    /// Current position along the axis.
    pub fn position(&self) -> usize {
        self.pos
    }
}
