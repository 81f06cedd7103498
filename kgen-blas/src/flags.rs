//! Kernel variant flags.
//!
//! A [`KernelExtraFlags`] value identifies the semantic variant of a generated
//! kernel: transposition, triangularity, tails, non-zero offsets and so on.
//! Only the bits relevant to a given BLAS function take part in kernel cache
//! keys, see [`KernelExtraFlags::masked_for`].

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::func::{BlasFunction, MatrixRole};

/// Bit set describing a kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct KernelExtraFlags(u32);

macro_rules! kernel_flags {
    ($($name:ident = $value:expr;)*) => {
        impl KernelExtraFlags {
            $(pub const $name: Self = Self($value);)*

            const NAMED: &'static [(&'static str, KernelExtraFlags)] = &[
                $((stringify!($name), Self::$name),)*
            ];
        }
    };
}

kernel_flags! {
    TRANS_A = 0x1;
    CONJ_A = 0x2;
    TRANS_B = 0x4;
    CONJ_B = 0x8;
    COLUMN_MAJOR = 0x10;
    UPPER_TRIANG = 0x20;
    SIDE_RIGHT = 0x40;
    UNIT_DIAG = 0x80;
    TAILS_M = 0x100;
    TAILS_N = 0x200;
    TAILS_K = 0x400;
    BETA_ZERO = 0x800;
    NO_COPY_VEC_A = 0x1000;
    NO_COPY_VEC_B = 0x2000;
    NO_COPY_VEC_C = 0x4000;
    SYRK_SEPARATE_DIAGONAL = 0x8000;
    SYRK_EVALUATE_DIAGONAL = 0x10000;
    SYRK_2K_RANK = 0x20000;
    INCX_ONE = 0x40000;
    INCY_ONE = 0x80000;
    ENABLE_MAD = 0x100000;
    VENDOR_AMD = 0x200000;
    STARTM_NOT_ZERO = 0x400000;
    STARTN_NOT_ZERO = 0x800000;
    A_OFF_NOT_ZERO = 0x1000000;
    BX_OFF_NOT_ZERO = 0x2000000;
    CY_OFF_NOT_ZERO = 0x4000000;
    TAILS_M_LOWER = 0x8000000;
    TAILS_N_LOWER = 0x10000000;
    TAILS_K_LOWER = 0x20000000;
}

impl KernelExtraFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping bits with no meaning.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    pub const fn all() -> Self {
        Self(0x3fff_ffff)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Keep only the bits that change the kernel generated for `func`.
    pub fn masked_for(self, func: BlasFunction) -> Self {
        self & func.relevant_flags()
    }

    /// Whether `role` is walked along its columns in memory.
    ///
    /// For SYRK the second operand is the first one transposed, and for SYR2K
    /// it is the second matrix with the same transposition as the first.
    pub fn is_col_major_access(self, func: BlasFunction, role: MatrixRole) -> bool {
        let col_major = self.contains(Self::COLUMN_MAJOR);
        let trans_a = self.contains(Self::TRANS_A);
        match (func, role) {
            (_, MatrixRole::A) => col_major ^ trans_a,
            (BlasFunction::Gemm, MatrixRole::B) => col_major ^ self.contains(Self::TRANS_B),
            (BlasFunction::Syrk | BlasFunction::Syr2k, MatrixRole::B) => !(col_major ^ trans_a),
            (BlasFunction::Trmm | BlasFunction::Trsm, MatrixRole::B) => col_major,
            (_, MatrixRole::C) => col_major,
        }
    }

    pub fn is_upper(self) -> bool {
        self.contains(Self::UPPER_TRIANG)
    }

    /// `(M, N, K)` tail flags of the upper decomposition level.
    pub fn tails(self) -> (bool, bool, bool) {
        (
            self.contains(Self::TAILS_M),
            self.contains(Self::TAILS_N),
            self.contains(Self::TAILS_K),
        )
    }

    /// `(M, N, K)` tail flags of the per-item decomposition level.
    pub fn lower_tails(self) -> (bool, bool, bool) {
        (
            self.contains(Self::TAILS_M_LOWER),
            self.contains(Self::TAILS_N_LOWER),
            self.contains(Self::TAILS_K_LOWER),
        )
    }
}

impl BitOr for KernelExtraFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for KernelExtraFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for KernelExtraFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for KernelExtraFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for KernelExtraFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::all().0)
    }
}

impl fmt::Display for KernelExtraFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for (name, flag) in Self::NAMED {
            if self.contains(*flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
