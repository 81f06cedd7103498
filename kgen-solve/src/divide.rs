//! Division of one problem between several command queues.
//!
//! Every queue starts with a step covering the whole problem. A division
//! shrinks the steps to disjoint parts sized after the compute units of
//! their devices, rounded to the division alignment. A step whose part
//! comes out empty is deactivated.

use kgen_blas::BlasFunction;
use tracing::debug;

use crate::step::{prob_dims, prob_offsets, set_prob_dims, set_prob_offsets, SolutionStep};

/// Round `value` to the nearest multiple of `alignment`, a power of two.
pub fn align(value: usize, alignment: usize) -> usize {
    (value + (alignment >> 1)) & !(alignment - 1)
}

fn proportional(extent: usize, nr_cu: u32, total_cus: u32) -> usize {
    (extent as f64 * f64::from(nr_cu) / f64::from(total_cus) + 0.5) as usize
}

fn compute_units(step: &SolutionStep) -> u32 {
    step.queue.device().compute_units()
}

/// Split along the columns of the result.
///
/// ```text
/// +------+--+----+--+
/// |      |  |    |  |
/// |  1   | 2|  3 | 4|
/// |      |  |    |  |
/// +------+--+----+--+
/// ```
pub fn stripe_division(steps: &mut [SolutionStep], mut total_cus: u32, alignment: usize) {
    let Some(first) = steps.first() else {
        return;
    };
    let mut size = prob_dims(&first.args);
    let mut offset = prob_offsets(&first.args);

    for step in steps.iter_mut() {
        let nr_cu = compute_units(step);
        if total_cus == 0 {
            step.active = false;
            continue;
        }

        let mut step_size = size;
        set_prob_offsets(&mut step.args, &offset);
        if total_cus != nr_cu {
            step_size.x = align(proportional(size.x, nr_cu, total_cus), alignment);
            if step_size.x == 0 {
                step.active = false;
            } else if step_size.x > size.x {
                step_size.x = size.x;
                total_cus = nr_cu;
            }
        }
        offset.x += step_size.x;
        size.x -= step_size.x;
        total_cus -= nr_cu;
        set_prob_dims(&mut step.args, &step_size);
    }
}

/// Split the longer side first, serving queues with more compute units
/// first.
///
/// ```text
/// +------+-----+
/// |      |  2  |
/// |  1   +--+--+
/// |      |3 | 4|
/// +------+--+--+
/// ```
pub fn rect_division(steps: &mut [SolutionStep], mut total_cus: u32, alignment: usize) {
    let Some(first) = steps.first() else {
        return;
    };
    let mut size = prob_dims(&first.args);
    let mut offset = prob_offsets(&first.args);

    let mut order: Vec<usize> = (0..steps.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(compute_units(&steps[i])));

    for i in order {
        let step = &mut steps[i];
        let nr_cu = compute_units(step);
        if total_cus == 0 {
            step.active = false;
            continue;
        }

        let mut step_size = size;
        set_prob_offsets(&mut step.args, &offset);
        if size.y > size.x {
            if total_cus != nr_cu {
                step_size.y = align(proportional(size.y, nr_cu, total_cus), alignment);
                if step_size.y > size.y {
                    step_size.y = size.y;
                    total_cus = nr_cu;
                } else if step_size.y == 0 {
                    step.active = false;
                }
            }
            size.y -= step_size.y;
            offset.y += step_size.y;
        } else {
            if total_cus != nr_cu {
                step_size.x = align(proportional(size.x, nr_cu, total_cus), alignment);
                if step_size.x > size.x {
                    step_size.x = size.x;
                    total_cus = nr_cu;
                } else if step_size.x == 0 {
                    step.active = false;
                }
            }
            size.x -= step_size.x;
            offset.x += step_size.x;
        }
        set_prob_dims(&mut step.args, &step_size);
        total_cus -= nr_cu;
    }
}

/// Split a triangular `N x N` result into horizontal stripes of balanced
/// area.
///
/// ```text
/// +----+
/// |\   |
/// +-\--+
/// |  \ |
/// |   \|
/// +----+
/// ```
///
/// Lower triangles are cut top-down, upper ones bottom-up.
pub fn tri_matrix_stripe_division(steps: &mut [SolutionStep], mut total_cus: u32, alignment: usize) {
    let Some(first) = steps.first() else {
        return;
    };
    let upper = first.extra_flags.is_upper();
    let mut size = prob_dims(&first.args);
    let mut offset = prob_offsets(&first.args);
    let mut top = 0usize;
    if upper {
        offset.y += size.y;
    }

    for step in steps.iter_mut() {
        let nr_cu = compute_units(step);
        if total_cus == 0 {
            step.active = false;
            continue;
        }

        let mut step_size = size;
        let mut step_offset = offset;
        if total_cus != nr_cu {
            let t = top as f64;
            let area = f64::from(nr_cu) / f64::from(total_cus) * size.y as f64 * (t + size.x as f64);
            step_size.y = align(((t * t + area).sqrt() - t) as usize, alignment);
            if step_size.y == 0 || step_size.y > size.y {
                step_size.y = size.y;
                total_cus = nr_cu;
            } else if upper && offset.y != align(offset.y, alignment) {
                // bottom-up cuts keep the stripe boundaries aligned
                let mut o = align(offset.y.saturating_sub(step_size.y), alignment);
                if o > offset.y {
                    o = o.saturating_sub(2 * alignment);
                }
                step_size.y = (offset.y - o).min(size.y);
            }
        } else {
            step_size.y = size.y;
        }

        size.y -= step_size.y;
        top += step_size.y;
        if upper {
            offset.y -= step_size.y;
            step_offset = offset;
        } else {
            offset.y += step_size.y;
        }

        set_prob_offsets(&mut step.args, &step_offset);
        set_prob_dims(&mut step.args, &step_size);
        total_cus -= nr_cu;
    }
}

/// Divide `steps`, one per queue, by the strategy suiting `func`.
pub fn divide_problem(func: BlasFunction, steps: &mut [SolutionStep], total_cus: u32, alignment: usize) {
    if steps.len() < 2 {
        return;
    }
    match func {
        BlasFunction::Gemm => rect_division(steps, total_cus, alignment),
        BlasFunction::Syrk | BlasFunction::Syr2k => tri_matrix_stripe_division(steps, total_cus, alignment),
        BlasFunction::Trmm | BlasFunction::Trsm => stripe_division(steps, total_cus, alignment),
    }
    for step in steps.iter_mut() {
        let dims = prob_dims(&step.args);
        if dims.x == 0 || dims.y == 0 {
            step.active = false;
        }
        debug!(
            %func,
            device = step.queue.device().name(),
            dims = ?prob_dims(&step.args),
            offsets = ?prob_offsets(&step.args),
            active = step.active,
            "divided problem"
        );
    }
}
