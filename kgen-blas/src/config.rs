//! Generator and decomposer tuning constants.
//!
//! Every heuristic constant lives in [`GenConfig`]. The defaults reproduce
//! the values tuned for AMD GCN class hardware; a deployment may load
//! adjusted values from any serde format.

use kgen_tile::DataType;
use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};

/// Largest item tile side a rank-k kernel accepts.
pub const MAX_SYRK_ITEM: usize = 8;

/// One value per element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtypeTable<T> {
    pub float: T,
    pub double: T,
    pub complex_float: T,
    pub complex_double: T,
}

impl<T: Copy> DtypeTable<T> {
    pub fn get(&self, dtype: DataType) -> T {
        match dtype {
            DataType::Float => self.float,
            DataType::Double => self.double,
            DataType::ComplexFloat => self.complex_float,
            DataType::ComplexDouble => self.complex_double,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenConfig {
    /// Bytes served by one memory bank before switching channel.
    pub bank_size: usize,
    /// Number of memory channels.
    pub nr_channels: usize,
    /// Bytes of one wide channel access.
    pub wide_channel: usize,
    /// A block GEMM holds the whole A tile in registers when
    /// `item_y + item_x` does not exceed this.
    pub whole_a_limit: DtypeTable<usize>,
    /// TRXM, SYRK and SYR2K split when the problem side reaches
    /// `decomposition_bytes / element size`.
    pub decomposition_bytes: usize,
    /// Alignment of the parts a problem is divided into between queues.
    pub division_alignment: usize,
    /// Upper bound of one kernel's source length.
    pub max_source_size: usize,
    /// Wavefront size assumed when the device reports none.
    pub wavefront_size: u32,
    /// Side of the diagonal blocks of a decomposed SYRK. A power of two no
    /// smaller than [`MAX_SYRK_ITEM`], so block edges never cut an item tile.
    pub syrk_diagonal_block: usize,
    /// SYRK is only decomposed when N is not a multiple of this.
    pub syrk_decompose_alignment: usize,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            bank_size: 2048,
            nr_channels: 8,
            wide_channel: 64,
            whole_a_limit: DtypeTable {
                float: 16,
                double: 8,
                complex_float: 8,
                complex_double: 6,
            },
            decomposition_bytes: 2560 * 4,
            division_alignment: 128,
            max_source_size: 1 << 22,
            wavefront_size: 64,
            syrk_diagonal_block: 16,
            syrk_decompose_alignment: 8,
        }
    }
}

impl GenConfig {
    /// Problem side from which triangular and rank-k problems are split.
    pub fn decomposition_threshold(&self, dtype: DataType) -> usize {
        self.decomposition_bytes / dtype.size()
    }

    /// Elements of `dtype` served by one memory bank.
    pub fn bank_elements(&self, dtype: DataType) -> usize {
        (self.bank_size / dtype.size()).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let pow2 = [
            ("division_alignment", self.division_alignment),
            ("nr_channels", self.nr_channels),
            ("wide_channel", self.wide_channel),
        ];
        for (name, value) in pow2 {
            if !value.is_power_of_two() {
                return Err(GenError::InvalidConfig(format!(
                    "{name} must be a power of two, got {value}"
                )));
            }
        }
        if self.syrk_diagonal_block == 0 || self.syrk_decompose_alignment == 0 {
            return Err(GenError::InvalidConfig(
                "SYRK block sizes must be non-zero".into(),
            ));
        }
        let block = self.syrk_diagonal_block;
        if !block.is_power_of_two() || block < MAX_SYRK_ITEM {
            return Err(GenError::InvalidConfig(format!(
                "syrk_diagonal_block must be a power of two of at least {MAX_SYRK_ITEM}, got {block}"
            )));
        }
        if self.max_source_size == 0 || self.wavefront_size == 0 {
            return Err(GenError::InvalidConfig(
                "source size and wavefront size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let cfg = GenConfig::default();
        assert_eq!(cfg.decomposition_threshold(DataType::Float), 2560);
        assert_eq!(cfg.decomposition_threshold(DataType::ComplexDouble), 640);
        assert_eq!(cfg.whole_a_limit.get(DataType::Double), 8);
        assert_eq!(cfg.bank_elements(DataType::ComplexFloat), 256);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: GenConfig =
            serde_json::from_str(r#"{"division_alignment": 64, "syrk_diagonal_block": 32}"#)
                .unwrap();
        assert_eq!(cfg.division_alignment, 64);
        assert_eq!(cfg.syrk_diagonal_block, 32);
        assert_eq!(cfg.bank_size, 2048);
    }

    #[test]
    fn test_validate_rejects_bad_alignment() {
        let cfg = GenConfig {
            division_alignment: 100,
            ..GenConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GenError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unaligned_diagonal_block() {
        for block in [4, 10, 24] {
            let cfg = GenConfig {
                syrk_diagonal_block: block,
                ..GenConfig::default()
            };
            assert!(
                matches!(cfg.validate(), Err(GenError::InvalidConfig(_))),
                "block {block} accepted"
            );
        }
        for block in [8, 32, 64] {
            let cfg = GenConfig {
                syrk_diagonal_block: block,
                ..GenConfig::default()
            };
            cfg.validate().unwrap();
        }
    }
}
