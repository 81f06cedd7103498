//! Decomposition levels and workgroup granularity shared by every generator.

use std::fmt;

/// Marks a sub-dimension component that is not used by a decomposition.
pub const SUBDIM_UNUSED: usize = usize::MAX;

/// Maximum number of decomposition levels a step may carry.
pub const MAX_SUBDIMS: usize = 3;

/// Component of a [`SubproblemDim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SDimComponent {
    X,
    Y,
    BWidth,
}

/// Extent of one decomposition level.
///
/// `y` runs along M (rows of A and C), `x` along N (columns of B and C) and
/// `bwidth` along K. `item_x`/`item_y` give the part of the level evaluated
/// by a single work item or work group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubproblemDim {
    pub x: usize,
    pub y: usize,
    pub bwidth: usize,
    pub item_x: usize,
    pub item_y: usize,
}

impl SubproblemDim {
    pub const fn new(y: usize, x: usize, bwidth: usize, item_y: usize, item_x: usize) -> Self {
        Self {
            x,
            y,
            bwidth,
            item_x,
            item_y,
        }
    }

    /// Value of one component.
    pub fn get(&self, comp: SDimComponent) -> usize {
        match comp {
            SDimComponent::X => self.x,
            SDimComponent::Y => self.y,
            SDimComponent::BWidth => self.bwidth,
        }
    }

    pub fn set(&mut self, comp: SDimComponent, value: usize) {
        match comp {
            SDimComponent::X => self.x = value,
            SDimComponent::Y => self.y = value,
            SDimComponent::BWidth => self.bwidth = value,
        }
    }

    /// Swap the X and Y roles, items included.
    pub fn swap_xy(&mut self) {
        std::mem::swap(&mut self.x, &mut self.y);
        std::mem::swap(&mut self.item_x, &mut self.item_y);
    }
}

impl fmt::Display for SubproblemDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dim(v: usize) -> String {
            if v == SUBDIM_UNUSED {
                "unused".to_string()
            } else {
                v.to_string()
            }
        }
        write!(
            f,
            "itemY = {}, itemX = {}, y = {}, x = {}, bwidth = {}",
            dim(self.item_y),
            dim(self.item_x),
            dim(self.y),
            dim(self.x),
            dim(self.bwidth)
        )
    }
}

/// Check that every coarser level is an integral multiple of the next finer one.
///
/// Unused components are skipped. Returns the index of the first offending
/// level pair, counted from the coarser side.
pub fn check_subdims_nesting(subdims: &[SubproblemDim]) -> std::result::Result<(), usize> {
    fn divisible(coarse: usize, fine: usize) -> bool {
        if coarse == SUBDIM_UNUSED || fine == SUBDIM_UNUSED {
            return true;
        }
        fine != 0 && coarse % fine == 0
    }

    for (level, pair) in subdims.windows(2).enumerate() {
        let (outer, inner) = (&pair[0], &pair[1]);
        let ok = divisible(outer.x, inner.x)
            && divisible(outer.y, inner.y)
            && divisible(outer.bwidth, inner.bwidth);
        if !ok {
            return Err(level);
        }
    }
    Ok(())
}

/// Data parallelism granularity of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PGranularity {
    /// Work space dimensionality, 1 or 2.
    pub wg_dim: u32,
    pub wg_size: [u32; 2],
    /// Wavefront (warp) size of the target device.
    pub wf_size: u32,
    /// Work groups spawned by the latest launch, for consumers further down
    /// a sequence.
    pub num_wg_spawned: [usize; 2],
}

impl Default for PGranularity {
    fn default() -> Self {
        Self {
            wg_dim: 1,
            wg_size: [64, 1],
            wf_size: 64,
            num_wg_spawned: [0, 0],
        }
    }
}

impl PGranularity {
    pub fn one_dim(size: u32) -> Self {
        Self {
            wg_dim: 1,
            wg_size: [size, 1],
            ..Self::default()
        }
    }

    pub fn two_dim(size0: u32, size1: u32) -> Self {
        Self {
            wg_dim: 2,
            wg_size: [size0, size1],
            ..Self::default()
        }
    }

    /// Total number of work items in one work group.
    pub fn items(&self) -> u32 {
        self.wg_size[0] * self.wg_size[1]
    }
}

impl fmt::Display for PGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wgDim = {}, wgSize[0] = {}, wgSize[1] = {}, wfSize = {}",
            self.wg_dim, self.wg_size[0], self.wg_size[1], self.wf_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_ok() {
        let dims = [
            SubproblemDim::new(32, 32, 16, 32, 32),
            SubproblemDim::new(4, 4, 16, 4, 4),
        ];
        assert!(check_subdims_nesting(&dims).is_ok());
    }

    #[test]
    fn test_nesting_violation() {
        let dims = [
            SubproblemDim::new(30, 32, 16, 30, 32),
            SubproblemDim::new(4, 4, 16, 4, 4),
        ];
        assert_eq!(check_subdims_nesting(&dims), Err(0));
    }

    #[test]
    fn test_nesting_skips_unused() {
        let dims = [
            SubproblemDim::new(32, SUBDIM_UNUSED, 16, 32, SUBDIM_UNUSED),
            SubproblemDim::new(4, 4, 16, 4, 4),
        ];
        assert!(check_subdims_nesting(&dims).is_ok());
    }

    #[test]
    fn test_swap_xy() {
        let mut d = SubproblemDim::new(1, 2, 3, 4, 5);
        d.swap_xy();
        assert_eq!((d.y, d.x, d.item_y, d.item_x), (2, 1, 5, 4));
        assert_eq!(d.bwidth, 3);
    }
}
