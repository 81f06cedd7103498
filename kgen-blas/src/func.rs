//! BLAS call description: function ids, operand layout and the argument
//! block handed from the routine layer to the decomposer.

use std::fmt;
use std::ops::Neg;

use kgen_tile::DataType;
use num_complex::Complex64;
use num_traits::{One, Zero};

use crate::extra::KernelType;
use crate::flags::KernelExtraFlags;

/// Level 3 BLAS functions served by the generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlasFunction {
    Gemm,
    Trmm,
    Trsm,
    Syrk,
    Syr2k,
}

impl BlasFunction {
    pub const ALL: [BlasFunction; 5] = [
        BlasFunction::Gemm,
        BlasFunction::Trmm,
        BlasFunction::Trsm,
        BlasFunction::Syrk,
        BlasFunction::Syr2k,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlasFunction::Gemm => "gemm",
            BlasFunction::Trmm => "trmm",
            BlasFunction::Trsm => "trsm",
            BlasFunction::Syrk => "syrk",
            BlasFunction::Syr2k => "syr2k",
        }
    }

    pub fn is_triangular(self) -> bool {
        matches!(self, BlasFunction::Trmm | BlasFunction::Trsm)
    }

    pub fn is_symmetric_rank(self) -> bool {
        matches!(self, BlasFunction::Syrk | BlasFunction::Syr2k)
    }

    /// Flags that change the kernel generated for this function.
    pub fn relevant_flags(self) -> KernelExtraFlags {
        type F = KernelExtraFlags;
        let common = F::TRANS_A
            | F::COLUMN_MAJOR
            | F::TAILS_M
            | F::TAILS_N
            | F::TAILS_K
            | F::TAILS_M_LOWER
            | F::TAILS_N_LOWER
            | F::TAILS_K_LOWER
            | F::NO_COPY_VEC_A
            | F::NO_COPY_VEC_C
            | F::ENABLE_MAD
            | F::VENDOR_AMD
            | F::A_OFF_NOT_ZERO
            | F::CY_OFF_NOT_ZERO;
        match self {
            BlasFunction::Gemm => {
                common
                    | F::CONJ_A
                    | F::TRANS_B
                    | F::CONJ_B
                    | F::BETA_ZERO
                    | F::NO_COPY_VEC_B
                    | F::BX_OFF_NOT_ZERO
            }
            BlasFunction::Trmm | BlasFunction::Trsm => {
                common
                    | F::CONJ_A
                    | F::UPPER_TRIANG
                    | F::SIDE_RIGHT
                    | F::UNIT_DIAG
                    | F::NO_COPY_VEC_B
                    | F::BX_OFF_NOT_ZERO
                    | F::STARTM_NOT_ZERO
                    | F::STARTN_NOT_ZERO
            }
            BlasFunction::Syrk => {
                common
                    | F::UPPER_TRIANG
                    | F::BETA_ZERO
                    | F::SYRK_SEPARATE_DIAGONAL
                    | F::SYRK_EVALUATE_DIAGONAL
                    | F::STARTM_NOT_ZERO
                    | F::STARTN_NOT_ZERO
            }
            BlasFunction::Syr2k => {
                BlasFunction::Syrk.relevant_flags()
                    | F::SYRK_2K_RANK
                    | F::NO_COPY_VEC_B
                    | F::BX_OFF_NOT_ZERO
            }
        }
    }
}

impl fmt::Display for BlasFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Matrix role inside a BLAS operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixRole {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    #[default]
    RowMajor,
    ColumnMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transpose {
    #[default]
    NoTrans,
    Trans,
    ConjTrans,
}

impl Transpose {
    pub fn is_trans(self) -> bool {
        self != Transpose::NoTrans
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Uplo {
    Upper,
    #[default]
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Diag {
    Unit,
    #[default]
    NonUnit,
}

/// Scalar argument (`alpha`, `beta`) of a BLAS call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgScalar {
    Real(f64),
    Complex(Complex64),
}

impl ArgScalar {
    pub fn zero(dtype: DataType) -> Self {
        if dtype.is_complex() {
            ArgScalar::Complex(Complex64::zero())
        } else {
            ArgScalar::Real(0.0)
        }
    }

    pub fn one(dtype: DataType) -> Self {
        if dtype.is_complex() {
            ArgScalar::Complex(Complex64::one())
        } else {
            ArgScalar::Real(1.0)
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ArgScalar::Real(v) => v.is_zero(),
            ArgScalar::Complex(v) => v.is_zero(),
        }
    }

    pub fn is_one(&self) -> bool {
        match self {
            ArgScalar::Real(v) => v.is_one(),
            ArgScalar::Complex(v) => v.is_one(),
        }
    }
}

impl Neg for ArgScalar {
    type Output = Self;
    fn neg(self) -> Self {
        match self {
            ArgScalar::Real(v) => ArgScalar::Real(-v),
            ArgScalar::Complex(v) => ArgScalar::Complex(-v),
        }
    }
}

/// Handle of a device buffer owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferId(pub u64);

/// Handle of a scratch image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u64);

/// Arguments of one BLAS call, or of one launch carved out of it.
///
/// Sizes follow the BLAS convention: `C` is `M x N` and the inner dimension
/// is `K`. For TRMM and TRSM, `K` equals `M` (left side) or `N` (right side).
/// `offset_m`, `offset_n` and `offset_k` locate a sub-problem inside the full
/// problem; they are folded into the buffer offsets before launching.
#[derive(Debug, Clone, PartialEq)]
pub struct BlasKargs {
    pub func: BlasFunction,
    pub dtype: DataType,
    pub order: Order,
    pub side: Side,
    pub uplo: Uplo,
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub diag: Diag,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: ArgScalar,
    pub beta: ArgScalar,
    pub a: BufferId,
    pub b: BufferId,
    pub c: BufferId,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub off_a: usize,
    pub off_bx: usize,
    pub off_cy: usize,
    pub offset_m: usize,
    pub offset_n: usize,
    pub offset_k: usize,
    pub scimage: [Option<ImageId>; 2],
    pub kern_type: KernelType,
}

impl BlasKargs {
    /// Argument block with unit `alpha`, zero `beta` and empty sizes.
    pub fn new(func: BlasFunction, dtype: DataType) -> Self {
        Self {
            func,
            dtype,
            order: Order::RowMajor,
            side: Side::Left,
            uplo: Uplo::Lower,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            diag: Diag::NonUnit,
            m: 0,
            n: 0,
            k: 0,
            alpha: ArgScalar::one(dtype),
            beta: ArgScalar::zero(dtype),
            a: BufferId(0),
            b: BufferId(1),
            c: BufferId(2),
            lda: 0,
            ldb: 0,
            ldc: 0,
            off_a: 0,
            off_bx: 0,
            off_cy: 0,
            offset_m: 0,
            offset_n: 0,
            offset_k: 0,
            scimage: [None, None],
            kern_type: KernelType::Compute,
        }
    }

    /// Flags implied by the call itself: layout, transposition, triangle
    /// shape and a zero `beta`.
    pub fn base_flags(&self) -> KernelExtraFlags {
        type F = KernelExtraFlags;
        let mut flags = F::empty();
        flags.set(F::COLUMN_MAJOR, self.order == Order::ColumnMajor);
        flags.set(F::TRANS_A, self.trans_a.is_trans());
        flags.set(
            F::CONJ_A,
            self.dtype.is_complex() && self.trans_a == Transpose::ConjTrans,
        );
        if self.func == BlasFunction::Gemm {
            flags.set(F::TRANS_B, self.trans_b.is_trans());
            flags.set(
                F::CONJ_B,
                self.dtype.is_complex() && self.trans_b == Transpose::ConjTrans,
            );
        }
        if self.func.is_triangular() || self.func.is_symmetric_rank() {
            flags.set(F::UPPER_TRIANG, self.uplo == Uplo::Upper);
        }
        if self.func.is_triangular() {
            flags.set(F::SIDE_RIGHT, self.side == Side::Right);
            flags.set(F::UNIT_DIAG, self.diag == Diag::Unit);
        }
        if self.func == BlasFunction::Syr2k {
            flags.insert(F::SYRK_2K_RANK);
        }
        if matches!(
            self.func,
            BlasFunction::Gemm | BlasFunction::Syrk | BlasFunction::Syr2k
        ) {
            flags.set(F::BETA_ZERO, self.beta.is_zero());
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_scalar_predicates() {
        assert!(ArgScalar::zero(DataType::ComplexFloat).is_zero());
        assert!(ArgScalar::one(DataType::Double).is_one());
        assert!(!ArgScalar::Complex(Complex64::new(0.0, 1.0)).is_zero());
        assert_eq!(-ArgScalar::Real(2.0), ArgScalar::Real(-2.0));
    }

    #[test]
    fn test_base_flags_gemm() {
        let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::ComplexFloat);
        kargs.order = Order::ColumnMajor;
        kargs.trans_b = Transpose::ConjTrans;
        kargs.uplo = Uplo::Upper;
        let f = kargs.base_flags();
        assert_eq!(
            f,
            KernelExtraFlags::COLUMN_MAJOR
                | KernelExtraFlags::TRANS_B
                | KernelExtraFlags::CONJ_B
                | KernelExtraFlags::BETA_ZERO
        );
    }

    #[test]
    fn test_base_flags_trsm() {
        let mut kargs = BlasKargs::new(BlasFunction::Trsm, DataType::Float);
        kargs.uplo = Uplo::Upper;
        kargs.side = Side::Right;
        kargs.diag = Diag::Unit;
        // real data never conjugates
        kargs.trans_a = Transpose::ConjTrans;
        let f = kargs.base_flags();
        assert!(f.contains(KernelExtraFlags::UPPER_TRIANG | KernelExtraFlags::SIDE_RIGHT));
        assert!(f.contains(KernelExtraFlags::UNIT_DIAG | KernelExtraFlags::TRANS_A));
        assert!(!f.intersects(KernelExtraFlags::CONJ_A | KernelExtraFlags::BETA_ZERO));
    }

    #[test]
    fn test_relevant_flags() {
        let gemm = BlasFunction::Gemm.relevant_flags();
        assert!(!gemm.intersects(KernelExtraFlags::UPPER_TRIANG | KernelExtraFlags::UNIT_DIAG));
        let syr2k = BlasFunction::Syr2k.relevant_flags();
        assert!(syr2k.contains(BlasFunction::Syrk.relevant_flags() | KernelExtraFlags::SYRK_2K_RANK));
        assert!(!BlasFunction::Trmm
            .relevant_flags()
            .contains(KernelExtraFlags::BETA_ZERO));
    }
}
