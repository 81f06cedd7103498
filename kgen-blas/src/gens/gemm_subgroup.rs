//! Subgroup GEMM.
//!
//! A work group is split into subgroups of `bw0 / bw1` items. All items of a
//! subgroup evaluate the same `y1 x x1` block of C, each over its own share
//! of K; the partial tiles are then summed through local memory and stored
//! by the subgroup's first item.
//!
//! Work space layout: dimension 0 indexes the item inside its subgroup,
//! dimension 1 the subgroup inside the work group.

use kgen_emit::helpers::{add_barrier, MemFence};
use kgen_emit::{KgenContext, PGranularity, SubproblemDim};
use kgen_tile::DataType;

use super::gemm::{gemm_kargs, gemm_params, mul_opts};
use super::tilemul::{gen_fetch_and_mul, Bound, FetchSpec};
use super::upres::{gen_result_update, UpdateKind, UpdateSpec};
use super::{declare_kernel, declare_precision, init_default_tiles, init_tail_tiles, kernel_name, shift_pointers, MatrixAccess};
use crate::config::GenConfig;
use crate::error::{GenError, Result};
use crate::extra::{KernelExtra, SolverPriv};
use crate::flags::KernelExtraFlags;
use crate::func::{BlasFunction, BlasKargs, MatrixRole};
use crate::kargs::KernelArgs;
use crate::solver::{CheckCalcPGran, PatternPerformance, SolverFlags, SolverOps};

type F = KernelExtraFlags;

/// Register use limit of one item, in 16-byte registers.
const MAX_ITEM_REGS: usize = 50;

/// Shape of the subgroup layout derived from a decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubgroupShape {
    /// Items per subgroup.
    items: usize,
    /// Subgroups along Y.
    subg_a: usize,
    /// Subgroups along X.
    subg_b: usize,
}

impl SubgroupShape {
    fn of(subdims: &[SubproblemDim]) -> Option<Self> {
        let [top, item, ..] = subdims else {
            return None;
        };
        if item.x == 0 || item.y == 0 || item.bwidth == 0 {
            return None;
        }
        Some(Self {
            items: top.bwidth / item.bwidth,
            subg_a: top.y / item.y,
            subg_b: top.x / item.x,
        })
    }

    fn total_items(&self) -> usize {
        self.items * self.subg_a * self.subg_b
    }
}

fn gen_gemm_subgroup(
    ctx: &mut KgenContext,
    subdims: &[SubproblemDim],
    pgran: &PGranularity,
    extra: &KernelExtra,
) -> Result<()> {
    let shape = SubgroupShape::of(subdims)
        .ok_or_else(|| GenError::InvalidDecomposition("subgroup GEMM needs 2 levels".into()))?;
    let top = &subdims[0];
    let dims = &subdims[1];
    let flags = extra.flags;
    let dtype = extra.dtype;
    let func = BlasFunction::Gemm;
    let (bw0, bw1) = (top.bwidth, dims.bwidth);
    let items = shape.items;

    let acc_a = MatrixAccess::new("A", "lda", flags.is_col_major_access(func, MatrixRole::A));
    let acc_b = MatrixAccess::new("B", "ldb", flags.is_col_major_access(func, MatrixRole::B));
    let acc_c = MatrixAccess::new("C", "ldc", flags.is_col_major_access(func, MatrixRole::C));
    let tiles = init_default_tiles(func, dims, extra);
    let tails_k = flags.intersects(F::TAILS_K | F::TAILS_K_LOWER);
    let kbase = if tails_k { "Kbase" } else { "K" };
    let skip = flags.intersects(F::TAILS_M | F::TAILS_N);
    let t = dtype.builtin_type();

    declare_precision(ctx, dtype)?;
    declare_kernel(ctx, pgran, &kernel_name(dtype, "gemmSubgroup"), &gemm_params(dtype, flags))?;
    ctx.begin_func_body()?;

    kgen_emit::kprintf!(
        ctx,
        "const uint lid = get_local_id(0);\nconst uint sid = get_local_id(1);\n"
    )?;
    if tails_k {
        kgen_emit::kprintf!(ctx, "const uint Ktail = K % {bw0}u;\nconst uint Kbase = K - Ktail;\n")?;
    }
    tiles.a.declare_storage(ctx)?;
    tiles.b.declare_storage(ctx)?;
    tiles.c.declare_storage(ctx)?;
    kgen_emit::kprintf!(ctx, "__local {t} scratch[{}];\n", shape.total_items() * dims.y * dims.x)?;
    ctx.add_stmt("uint2 coord;\n")?;
    ctx.add_blank_line()?;

    kgen_emit::kprintf!(
        ctx,
        "coord.y = {}u * ((uint)get_group_id(1) * {}u + sid / {}u);\n\
         coord.x = {}u * ((uint)get_group_id(0) * {}u + sid % {}u);\n",
        dims.y,
        shape.subg_a,
        shape.subg_b,
        dims.x,
        shape.subg_b,
        shape.subg_b
    )?;
    if skip {
        ctx.add_stmt("const bool skipTileMul = (coord.y >= M) || (coord.x >= N);\n")?;
    }
    shift_pointers(ctx, flags, &[("A", MatrixRole::A), ("B", MatrixRole::B), ("C", MatrixRole::C)])?;
    tiles.c.gen_zero(ctx)?;

    let stag = extra.solver_priv.staggered() as usize / bw1 * bw1;
    if stag > 0 {
        kgen_emit::kprintf!(
            ctx,
            "const uint kstart = ({kbase} > 0u) ? ((uint)get_group_id(0) * {stag}u) % {kbase} : 0u;\n"
        )?;
    }

    let rows = if flags.contains(F::TAILS_M_LOWER) {
        Bound::Clamp("M".into())
    } else {
        Bound::None
    };
    let cols = if flags.contains(F::TAILS_N_LOWER) {
        Bound::Clamp("N".into())
    } else {
        Bound::None
    };
    let opts = mul_opts(flags);

    if skip {
        ctx.begin_branch(Some("if (!skipTileMul)"))?;
    }
    ctx.begin_branch(Some(&format!("for (uint k1 = lid * {bw1}u; k1 < {kbase}; k1 += {bw0}u)")))?;
    if stag > 0 {
        kgen_emit::kprintf!(ctx, "const uint k = (k1 + kstart) % {kbase};\n")?;
    } else {
        ctx.add_stmt("const uint k = k1;\n")?;
    }
    gen_fetch_and_mul(
        ctx,
        &FetchSpec::new(&tiles.a, &acc_a, "coord.y", "k").rows(rows.clone()),
        &FetchSpec::new(&tiles.b, &acc_b, "k", "coord.x").cols(cols.clone()),
        &tiles.c,
        opts,
    )?;
    ctx.end_branch(None)?;

    if tails_k {
        let (at, bt) = init_tail_tiles(&tiles);
        ctx.begin_branch(Some(&format!("for (uint k = Kbase + lid; k < K; k += {items}u)")))?;
        at.declare_storage(ctx)?;
        bt.declare_storage(ctx)?;
        gen_fetch_and_mul(
            ctx,
            &FetchSpec::new(&at, &acc_a, "coord.y", "k").rows(rows),
            &FetchSpec::new(&bt, &acc_b, "k", "coord.x").cols(cols),
            &tiles.c,
            opts,
        )?;
        ctx.end_branch(None)?;
    }
    if skip {
        ctx.end_branch(None)?;
    }
    ctx.add_blank_line()?;

    // merge partial tiles of the subgroup
    let tile_elems = dims.y * dims.x;
    kgen_emit::kprintf!(ctx, "uint sidx = (sid * {items}u + lid) * {tile_elems}u;\n")?;
    for r in 0..dims.y {
        for c in 0..dims.x {
            let elem = tiles.c.element_expr(r, c, 1)?;
            kgen_emit::kprintf!(ctx, "scratch[sidx + {}u] = {elem};\n", r * dims.x + c)?;
        }
    }
    add_barrier(ctx, MemFence::Local)?;
    ctx.add_blank_line()?;

    let cond = if skip { "if ((lid == 0u) && !skipTileMul)" } else { "if (lid == 0u)" };
    ctx.begin_branch(Some(cond))?;
    ctx.begin_branch(Some(&format!("for (uint i = 1u; i < {items}u; i++)")))?;
    kgen_emit::kprintf!(ctx, "sidx = (sid * {items}u + i) * {tile_elems}u;\n")?;
    for r in 0..dims.y {
        for c in 0..dims.x {
            let elem = tiles.c.element_expr(r, c, 1)?;
            kgen_emit::kprintf!(ctx, "{elem} += scratch[sidx + {}u];\n", r * dims.x + c)?;
        }
    }
    ctx.end_branch(None)?;
    ctx.add_blank_line()?;

    let kind = if flags.contains(F::BETA_ZERO) {
        UpdateKind::Alpha
    } else {
        UpdateKind::AlphaBeta
    };
    let spec = UpdateSpec::new(&tiles.c, &acc_c, "coord.y", "coord.x", kind)
        .bounded(
            flags.contains(F::TAILS_M_LOWER).then(|| "M".to_string()),
            flags.contains(F::TAILS_N_LOWER).then(|| "N".to_string()),
        )
        .with_core(opts.core);
    gen_result_update(ctx, &spec)?;
    ctx.end_branch(None)?;

    ctx.end_func_body()?;
    ctx.add_blank_line()?;
    Ok(())
}

/// Subgroup GEMM solver.
#[derive(Debug, Clone)]
pub struct GemmSubgroup {
    wide_channel: usize,
    nr_channels: usize,
    wavefront: u32,
}

impl GemmSubgroup {
    pub fn new(cfg: &GenConfig) -> Self {
        Self {
            wide_channel: cfg.wide_channel,
            nr_channels: cfg.nr_channels,
            wavefront: cfg.wavefront_size,
        }
    }

    fn dims_valid(subdims: &[SubproblemDim], dtype: DataType) -> bool {
        let [top, item, ..] = subdims else {
            return false;
        };
        if item.item_x != item.x || item.item_y != item.y {
            return false;
        }
        let min_size = if dtype == DataType::ComplexDouble { 1 } else { 2 };
        let in_range = |v: usize| (min_size..=8).contains(&v);
        if !(in_range(item.x) && in_range(item.y) && in_range(item.bwidth)) {
            return false;
        }
        if top.x % item.x != 0 || top.y % item.y != 0 || top.bwidth % item.bwidth != 0 {
            return false;
        }
        let regs = (item.bwidth * item.x + item.bwidth * item.y + item.x * item.y) * dtype.size() / 16;
        regs < MAX_ITEM_REGS
    }
}

impl SolverOps for GemmSubgroup {
    fn name(&self) -> &'static str {
        "gemm-subgroup"
    }

    fn flags(&self) -> SolverFlags {
        SolverFlags::WSPACE_2D
    }

    fn generate(
        &self,
        ctx: &mut KgenContext,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        extra: &KernelExtra,
    ) -> Result<()> {
        gen_gemm_subgroup(ctx, subdims, pgran, extra)
    }

    fn assign_kargs(&self, kargs: &BlasKargs, extra: &KernelExtra) -> KernelArgs {
        gemm_kargs(kargs, extra)
    }

    fn is_fit_to_lds(&self, subdims: &[SubproblemDim], dtype: DataType, lds_size: usize) -> bool {
        match SubgroupShape::of(subdims) {
            Some(shape) => shape.total_items() * subdims[1].y * subdims[1].x * dtype.size() <= lds_size,
            None => false,
        }
    }

    fn pattern_perf(&self, flags: KernelExtraFlags, _kargs: &BlasKargs) -> PatternPerformance {
        let cm_a = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::A);
        let cm_b = flags.is_col_major_access(BlasFunction::Gemm, MatrixRole::B);
        if !cm_a && !cm_b {
            PatternPerformance::Good
        } else {
            PatternPerformance::NotSupported
        }
    }

    fn calc_threads(
        &self,
        subdims: &[SubproblemDim],
        pgran: &PGranularity,
        kargs: &BlasKargs,
        _extra: &KernelExtra,
    ) -> Option<[usize; 2]> {
        let top = subdims.first()?;
        Some([
            kargs.n.div_ceil(top.x.max(1)) * pgran.wg_size[0] as usize,
            kargs.m.div_ceil(top.y.max(1)) * pgran.wg_size[1] as usize,
        ])
    }

    fn fixup_args(&self, kargs: &mut BlasKargs, extra: &mut KernelExtra, subdims: &[SubproblemDim]) {
        let Some(item) = subdims.get(1) else {
            return;
        };
        let size_type = (kargs.dtype.size() / 4).max(1);
        let size_block = (self.wide_channel * self.nr_channels / size_type).max(1);
        let staggered = if kargs.k % size_block == 0 {
            let align = (self.wide_channel / size_type).max(1);
            (item.bwidth * size_type).next_multiple_of(align)
        } else {
            0
        };
        extra.solver_priv = SolverPriv::Staggered(staggered as u32);
    }

    fn default_decomposition(&self, dtype: DataType, wf_size: u32) -> ([SubproblemDim; 2], PGranularity) {
        let (item, bw1, top, bw0) = match dtype {
            DataType::Float => (4, 4, 8, 64),
            DataType::Double | DataType::ComplexFloat => (4, 2, 8, 32),
            DataType::ComplexDouble => (2, 2, 4, 32),
        };
        let subdims = [
            SubproblemDim::new(top, top, bw0, top, top),
            SubproblemDim::new(item, item, bw1, item, item),
        ];
        let mut pgran = PGranularity {
            wf_size,
            ..PGranularity::default()
        };
        self.check_decomposition(&subdims, &mut pgran, dtype, CheckCalcPGran::Calc);
        (subdims, pgran)
    }

    fn check_decomposition(
        &self,
        subdims: &[SubproblemDim],
        pgran: &mut PGranularity,
        dtype: DataType,
        check: CheckCalcPGran,
    ) -> bool {
        if !Self::dims_valid(subdims, dtype) {
            return false;
        }
        let Some(shape) = SubgroupShape::of(subdims) else {
            return false;
        };
        let wg = [shape.items as u32, (shape.subg_a * shape.subg_b) as u32];
        match check {
            CheckCalcPGran::Check => {
                let wf = if pgran.wf_size == 0 { self.wavefront } else { pgran.wf_size };
                pgran.wg_size == wg && wg[0] >= 2 && pgran.items() % wf == 0
            }
            CheckCalcPGran::Calc => {
                pgran.wg_dim = 2;
                pgran.wg_size = wg;
                true
            }
        }
    }
}
