//! BLAS element types and their OpenCL spellings.

use std::fmt;

use crate::error::{Result, TileError};

/// Element type of a BLAS problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Float,
    Double,
    ComplexFloat,
    ComplexDouble,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Float,
        DataType::Double,
        DataType::ComplexFloat,
        DataType::ComplexDouble,
    ];

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Float => 4,
            DataType::Double | DataType::ComplexFloat => 8,
            DataType::ComplexDouble => 16,
        }
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, DataType::ComplexFloat | DataType::ComplexDouble)
    }

    pub const fn is_double_based(self) -> bool {
        matches!(self, DataType::Double | DataType::ComplexDouble)
    }

    /// Number of scalar components in one element.
    pub const fn components(self) -> usize {
        if self.is_complex() {
            2
        } else {
            1
        }
    }

    /// OpenCL type of one element.
    pub const fn builtin_type(self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::ComplexFloat => "float2",
            DataType::ComplexDouble => "double2",
        }
    }

    /// Scalar component type: `float` or `double`.
    pub const fn base_type(self) -> &'static str {
        if self.is_double_based() {
            "double"
        } else {
            "float"
        }
    }

    /// Routine prefix in BLAS naming (`sgemm`, `zsyrk`, ...).
    pub const fn blas_prefix(self) -> char {
        match self {
            DataType::Float => 's',
            DataType::Double => 'd',
            DataType::ComplexFloat => 'c',
            DataType::ComplexDouble => 'z',
        }
    }

    /// Literal of the multiplicative unit.
    pub const fn str_one(self) -> &'static str {
        match self {
            DataType::ComplexFloat => "(float2)(1, 0)",
            DataType::ComplexDouble => "(double2)(1, 0)",
            _ => "1",
        }
    }

    /// Literal of zero.
    pub const fn str_zero(self) -> &'static str {
        match self {
            DataType::ComplexFloat => "(float2)(0, 0)",
            DataType::ComplexDouble => "(double2)(0, 0)",
            _ => "0",
        }
    }

    /// OpenCL vector type holding `vec_len` elements.
    ///
    /// Complex elements occupy two components, so a complex float vector of
    /// length 2 is a `float4`.
    pub fn vector_type_name(self, vec_len: usize) -> Result<&'static str> {
        const FLOATS: [&str; 5] = ["float", "float2", "float4", "float8", "float16"];
        const DOUBLES: [&str; 5] = ["double", "double2", "double4", "double8", "double16"];

        let scalar = if self.is_double_based() { 8 } else { 4 };
        let width = vec_len * self.size() / scalar;
        let idx = match width {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            16 => 4,
            _ => return Err(TileError::UnsupportedVector { dtype: self, vec_len }),
        };
        if vec_len == 0 {
            return Err(TileError::UnsupportedVector { dtype: self, vec_len });
        }
        Ok(if self.is_double_based() {
            DOUBLES[idx]
        } else {
            FLOATS[idx]
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::ComplexFloat => "complex float",
            DataType::ComplexDouble => "complex double",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_type_names() {
        assert_eq!(DataType::Float.vector_type_name(1).unwrap(), "float");
        assert_eq!(DataType::Float.vector_type_name(4).unwrap(), "float4");
        assert_eq!(DataType::Double.vector_type_name(16).unwrap(), "double16");
        // complex widths count both components
        assert_eq!(DataType::ComplexFloat.vector_type_name(1).unwrap(), "float2");
        assert_eq!(DataType::ComplexFloat.vector_type_name(2).unwrap(), "float4");
        assert_eq!(DataType::ComplexDouble.vector_type_name(8).unwrap(), "double16");
    }

    #[test]
    fn test_vector_type_unknown() {
        assert!(DataType::Float.vector_type_name(3).is_err());
        assert!(DataType::Float.vector_type_name(0).is_err());
        assert!(DataType::ComplexDouble.vector_type_name(16).is_err());
    }

    #[test]
    fn test_prefixes_and_literals() {
        assert_eq!(DataType::ComplexDouble.blas_prefix(), 'z');
        assert_eq!(DataType::ComplexFloat.str_one(), "(float2)(1, 0)");
        assert_eq!(DataType::Double.str_one(), "1");
        assert_eq!(DataType::ComplexDouble.size(), 16);
    }
}
