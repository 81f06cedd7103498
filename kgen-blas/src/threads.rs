//! Work space arithmetic shared by solvers: global sizes, granularity and
//! decomposition sanity checks.

use kgen_emit::{check_subdims_nesting, PGranularity, SubproblemDim, SUBDIM_UNUSED};
use kgen_tile::DataType;

/// Decomposition axis mapped onto the fastest OpenCL work dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecompositionAxis {
    X,
    #[default]
    Y,
}

/// Global work size covering an `m x n` problem with work groups evaluating
/// `wg_dim.item_y x wg_dim.item_x` blocks each.
///
/// With a 2D granularity the Y groups are laid along dimension 0 and the X
/// groups along dimension 1; callers swap them when X is the inner axis.
pub fn calc_global_threads(
    wg_dim: &SubproblemDim,
    pgran: Option<&PGranularity>,
    m: usize,
    n: usize,
) -> [usize; 2] {
    let mut threads = [0usize, 1];

    if wg_dim.item_x != SUBDIM_UNUSED && wg_dim.item_y != SUBDIM_UNUSED {
        let groups_x = n.div_ceil(wg_dim.item_x.max(1));
        let groups_y = m.div_ceil(wg_dim.item_y.max(1));
        let nr_dims = pgran.map_or(1, |p| p.wg_dim);
        if nr_dims == 1 {
            threads[0] = groups_x * groups_y;
        } else {
            threads[0] = groups_y;
            threads[1] = groups_x;
        }
    } else {
        let (total, group) = if wg_dim.item_x != SUBDIM_UNUSED {
            (n, wg_dim.item_x)
        } else {
            (m, wg_dim.item_y)
        };
        threads[0] = total.div_ceil(group.max(1));
    }

    if let Some(pgran) = pgran {
        threads[0] *= pgran.wg_size[0] as usize;
        threads[1] *= pgran.wg_size[1] as usize;
    }
    threads
}

/// Generic validation of a two level decomposition.
///
/// The per-item extents must lie in `min_size..=max_size`, levels must nest,
/// and the private tiles must fit in `max_regs` 16-byte registers. Without
/// `whole_a` only one column of the A tile stays resident.
pub fn decomp_sanity_check(
    subdims: &[SubproblemDim],
    min_size: usize,
    max_size: usize,
    max_regs: usize,
    dtype: DataType,
    whole_a: bool,
) -> bool {
    let [top, item, ..] = subdims else {
        return false;
    };
    let in_range = |v: usize| (min_size..=max_size).contains(&v);
    if !(in_range(item.x) && in_range(item.y) && in_range(item.bwidth)) {
        return false;
    }
    if item.item_x != item.x || item.item_y != item.y {
        return false;
    }
    if top.x == 0 || top.y == 0 || top.bwidth == 0 {
        return false;
    }
    if check_subdims_nesting(&subdims[..2]).is_err() {
        return false;
    }

    let a_elems = if whole_a { item.y * item.bwidth } else { item.y };
    let regs = (a_elems + item.bwidth * item.x + item.x * item.y) * dtype.size() / 16;
    regs <= max_regs
}

/// Granularity for solvers where every item owns its part of the result.
///
/// `xdim` of `None` selects a 1D work space; otherwise the X items go to
/// dimension `xdim` and the Y items to the other one.
pub fn calc_pgran_dedicated(pgran: &mut PGranularity, subdims: &[SubproblemDim], xdim: Option<usize>) {
    let (top, item) = match subdims {
        [top, item, ..] => (top, item),
        _ => return,
    };
    let items_x = (top.x / item.item_x.max(1)).max(1) as u32;
    let items_y = (top.y / item.item_y.max(1)).max(1) as u32;

    match xdim {
        None => {
            pgran.wg_dim = 1;
            pgran.wg_size = [items_x * items_y, 1];
        }
        Some(x) => {
            let x = x.min(1);
            pgran.wg_dim = 2;
            pgran.wg_size[x] = items_x;
            pgran.wg_size[1 - x] = items_y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_threads_2d() {
        let wg = SubproblemDim::new(32, 16, 8, 32, 16);
        let pgran = PGranularity::two_dim(8, 4);
        // 130 rows -> 5 groups, 65 columns -> 5 groups
        assert_eq!(calc_global_threads(&wg, Some(&pgran), 130, 65), [40, 20]);
    }

    #[test]
    fn test_global_threads_1d_single_axis() {
        let wg = SubproblemDim::new(64, SUBDIM_UNUSED, 8, 64, SUBDIM_UNUSED);
        let pgran = PGranularity::one_dim(64);
        assert_eq!(calc_global_threads(&wg, Some(&pgran), 200, 1), [256, 1]);
        assert_eq!(calc_global_threads(&wg, None, 200, 1), [4, 1]);
    }

    #[test]
    fn test_sanity_check() {
        let dims = [
            SubproblemDim::new(32, 32, 8, 32, 32),
            SubproblemDim::new(4, 4, 8, 4, 4),
        ];
        assert!(decomp_sanity_check(&dims, 2, 8, 24, DataType::Float, true));
        // too many registers for complex double
        assert!(!decomp_sanity_check(&dims, 2, 8, 24, DataType::ComplexDouble, true));
        // item extent out of range
        assert!(!decomp_sanity_check(&dims, 8, 8, 64, DataType::Float, true));
    }

    #[test]
    fn test_pgran_dedicated() {
        let dims = [
            SubproblemDim::new(32, 64, 8, 32, 64),
            SubproblemDim::new(4, 8, 8, 4, 8),
        ];
        let mut pgran = PGranularity::default();
        calc_pgran_dedicated(&mut pgran, &dims, Some(1));
        assert_eq!(pgran.wg_dim, 2);
        assert_eq!(pgran.wg_size, [8, 8]);

        calc_pgran_dedicated(&mut pgran, &dims, None);
        assert_eq!((pgran.wg_dim, pgran.wg_size), (1, [64, 1]));
    }
}
