//! Kernel argument lists.
//!
//! Each solver fills the list in exactly the order its kernel declaration
//! lists the parameters.

use num_complex::{Complex32, Complex64};
use smallvec::SmallVec;

use kgen_tile::DataType;

use crate::func::{ArgScalar, BufferId, ImageId};

pub type SVec<T> = SmallVec<[T; 16]>;

/// One kernel argument value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// Passed as `uint`.
    Size(usize),
    Float(f32),
    Double(f64),
    ComplexFloat(Complex32),
    ComplexDouble(Complex64),
    Buffer(BufferId),
    Image(ImageId),
}

impl KernelArg {
    /// Scalar converted to the kernel's element type.
    pub fn scalar(value: ArgScalar, dtype: DataType) -> Self {
        let c = match value {
            ArgScalar::Real(v) => Complex64::new(v, 0.0),
            ArgScalar::Complex(v) => v,
        };
        match dtype {
            DataType::Float => KernelArg::Float(c.re as f32),
            DataType::Double => KernelArg::Double(c.re),
            DataType::ComplexFloat => KernelArg::ComplexFloat(Complex32::new(c.re as f32, c.im as f32)),
            DataType::ComplexDouble => KernelArg::ComplexDouble(c),
        }
    }

    /// Size in bytes of the argument value.
    pub fn size(&self) -> usize {
        match self {
            KernelArg::Size(_) | KernelArg::Float(_) => 4,
            KernelArg::Double(_) | KernelArg::ComplexFloat(_) => 8,
            KernelArg::ComplexDouble(_) => 16,
            KernelArg::Buffer(_) | KernelArg::Image(_) => std::mem::size_of::<u64>(),
        }
    }
}

pub type KernelArgs = SVec<KernelArg>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversion() {
        let v = ArgScalar::Complex(Complex64::new(1.5, -2.0));
        assert_eq!(
            KernelArg::scalar(v, DataType::ComplexFloat),
            KernelArg::ComplexFloat(Complex32::new(1.5, -2.0))
        );
        // real kernels take the real part
        assert_eq!(KernelArg::scalar(v, DataType::Double), KernelArg::Double(1.5));
        assert_eq!(KernelArg::scalar(ArgScalar::Real(2.0), DataType::Float).size(), 4);
    }
}
