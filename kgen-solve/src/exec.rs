//! Enqueueing the kernels of a [`SolutionSeq`].

use std::sync::Arc;

use kgen_blas::{calc_global_threads, BlasFunction, DecompositionAxis, KernelType, MatrixRole};
use kgen_emit::SDimComponent;
use tracing::{debug, warn};

use crate::cache::Kernel;
use crate::device::Event;
use crate::error::{Result, SolveError};
use crate::make::{fixup_gemm_offsets, fixup_trxm_offsets};
use crate::problem_iter::{matr_block_height, ProblemIterator};
use crate::step::{prob_dims, SolutionSeq, SolutionStep};

/// Enqueue `kernel` for the problem `step` currently describes.
pub fn enqueue_kernel(step: &mut SolutionStep, kernel: &Arc<Kernel>, wait_list: Vec<Event>) -> Result<Event> {
    let (sops, nr_levels) = match &step.pattern {
        Some((_, pattern)) => (Arc::clone(&pattern.sops), pattern.nr_levels),
        None => {
            return Err(SolveError::InvalidValue(format!(
                "{} step has no solver pattern",
                step.func
            )))
        }
    };
    step.args.kern_type = kernel.extra.kern_type;

    let levels = step.levels().to_vec();
    let global = match sops.calc_threads(&levels, &step.pgran, &step.args, &kernel.extra) {
        Some(global) => global,
        None => {
            let mut top = levels.first().copied().unwrap_or_default();
            let mut glob = prob_dims(&step.args);
            if step.pgran.wg_dim == 2 && sops.inner_decomposition_axis(&step.args) == DecompositionAxis::X {
                top.swap_xy();
                glob.swap_xy();
            }
            let pgran = (nr_levels > 1).then_some(&step.pgran);
            calc_global_threads(&top, pgran, glob.y, glob.x)
        }
    };
    let local = [step.pgran.wg_size[0] as usize, step.pgran.wg_size[1] as usize];
    step.pgran.num_wg_spawned = [global[0] / local[0].max(1), global[1] / local[1].max(1)];

    let launch = crate::device::Launch {
        kernel: Arc::clone(kernel),
        global,
        local,
        work_dim: step.pgran.wg_dim,
        args: sops.assign_kargs(&step.args, &kernel.extra),
        wait_list,
    };
    debug!(kernel = %kernel.name, ?global, ?local, "enqueue");
    step.queue.enqueue(launch).map_err(|e| {
        warn!(kernel = %kernel.name, device = step.queue.device().name(), error = %e, "enqueue failed");
        SolveError::from(e)
    })
}

fn fold_offsets(step: &mut SolutionStep) {
    match step.func {
        BlasFunction::Gemm => fixup_gemm_offsets(&mut step.args, step.extra_flags),
        BlasFunction::Trmm | BlasFunction::Trsm => fixup_trxm_offsets(&mut step.args, step.extra_flags),
        BlasFunction::Syrk | BlasFunction::Syr2k => {}
    }
}

fn compute_kernel(step: &SolutionStep) -> Result<Arc<Kernel>> {
    step.kernel(KernelType::Compute)
        .cloned()
        .ok_or_else(|| SolveError::InvalidValue(format!("{} step has no compute kernel", step.func)))
}

/// Waits for the first launch of a step; later launches rely on queue order.
struct Waits {
    pending: Vec<Event>,
    last: Option<Event>,
}

impl Waits {
    fn next(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }

    fn launch(&mut self, step: &mut SolutionStep, kernel: &Arc<Kernel>) -> Result<()> {
        let waits = self.next();
        self.last = Some(enqueue_kernel(step, kernel, waits)?);
        Ok(())
    }
}

/// Run a step whose operands live in scratch images, panel by panel.
///
/// The outer matrix is cut into panels fitting its image, then the inner
/// one; every part gets its preparation kernels, if any, and the compute
/// kernel.
pub fn execute_image_step(step: &mut SolutionStep, wait_list: Vec<Event>) -> Result<Option<Event>> {
    let func = step.func;
    let Some(top) = step.levels().first().copied() else {
        return Err(SolveError::InvalidValue(format!("{func} step has no decomposition")));
    };

    let roles = [MatrixRole::A, MatrixRole::B];
    let mut max_panels = [0usize; 2];
    for (i, image) in step.args.scimage.iter().enumerate() {
        let Some(image) = image else {
            continue;
        };
        let (_, height) = step.queue.image_size(*image)?;
        let role = roles[i];
        if func == BlasFunction::Trsm || (func.is_triangular() && role == MatrixRole::A) {
            continue;
        }
        max_panels[i] = height / matr_block_height(&top, role).max(1);
    }

    let outer_role = if func == BlasFunction::Gemm {
        let whole = prob_dims(&step.args);
        let ha = whole.y.max(1);
        let hb = whole.x;
        let dy = max_panels[0] * matr_block_height(&top, MatrixRole::A);
        let dx = max_panels[1] * matr_block_height(&top, MatrixRole::B);
        let lhs = hb / ha;
        let rhs = (1 + hb.checked_div(dy).unwrap_or(0)) / (1 + ha.checked_div(dx).unwrap_or(0));
        if lhs < rhs {
            MatrixRole::B
        } else {
            MatrixRole::A
        }
    } else {
        MatrixRole::B
    };
    let (outer_idx, outer_comp, inner_role, inner_comp) = if outer_role == MatrixRole::B {
        (1, SDimComponent::X, MatrixRole::A, SDimComponent::Y)
    } else {
        (0, SDimComponent::Y, MatrixRole::B, SDimComponent::X)
    };
    let inner_idx = 1 - outer_idx;

    let levels = step.levels().to_vec();
    let mut outer = ProblemIterator::new(func, outer_role, &step.args, max_panels[outer_idx], 0, &levels);
    let mut inner = ProblemIterator::new(func, inner_role, &step.args, max_panels[inner_idx], 0, &levels);
    let backward = inner.is_backward();
    debug!(%func, ?outer_role, panels = ?max_panels, backward, "image step");

    let prep_for = |comp: SDimComponent| {
        if comp == SDimComponent::Y {
            KernelType::PrepA
        } else {
            KernelType::PrepB
        }
    };

    let mut waits = Waits {
        pending: wait_list,
        last: None,
    };
    let mut rest = step.clone();
    loop {
        let outer_end = outer.iterate();
        let mut panel = rest.split(outer_comp, outer.last_offset(), false);
        fold_offsets(&mut panel);
        if let Some(prep) = panel.kernel(prep_for(outer_comp)).cloned() {
            waits.launch(&mut panel, &prep)?;
        }

        inner.reset();
        let mut inner_rest = panel.clone();
        loop {
            let inner_end = inner.iterate();
            let mut part = inner_rest.split(inner_comp, inner.last_offset(), backward);
            fold_offsets(&mut part);
            let dims = prob_dims(&part.args);
            if dims.x != 0 && dims.y != 0 {
                if let Some(prep) = part.kernel(prep_for(inner_comp)).cloned() {
                    waits.launch(&mut part, &prep)?;
                }
                let kernel = compute_kernel(&part)?;
                waits.launch(&mut part, &kernel)?;
                step.pgran.num_wg_spawned = part.pgran.num_wg_spawned;
            }
            if inner_end {
                break;
            }
        }
        if outer_end {
            break;
        }
    }
    Ok(waits.last)
}

/// Enqueue every active step of `seq` in order.
///
/// A step waits for its own wait list and, when chained, for the step
/// before it. The first failure aborts the rest of the sequence. Returns
/// the completion events of the last step of every chain.
pub fn execute_seq(seq: &mut SolutionSeq) -> Result<Vec<Event>> {
    let mut prev: Option<Event> = None;
    for (i, step) in seq.steps_mut().iter_mut().enumerate() {
        if !step.active {
            continue;
        }
        let mut waits = step.wait_list.clone();
        if step.after_previous {
            waits.extend(prev);
        }
        let result = if step.args.scimage[0].is_some() {
            execute_image_step(step, waits)
        } else {
            compute_kernel(step).and_then(|kernel| enqueue_kernel(step, &kernel, waits).map(Some))
        };
        match result {
            Ok(event) => {
                step.event = event;
                if event.is_some() {
                    prev = event;
                }
            }
            Err(e) => {
                warn!(step = i, func = %step.func, error = %e, "sequence aborted");
                return Err(e);
            }
        }
    }

    let steps = seq.steps();
    let events = steps
        .iter()
        .enumerate()
        .filter(|(i, _)| steps.get(i + 1).map_or(true, |next| !next.after_previous))
        .filter_map(|(_, s)| s.event)
        .collect();
    Ok(events)
}
