use std::sync::Arc;

use kgen_blas::{
    ArgScalar, BlasFunction, BlasKargs, GenConfig, GenError, ImageId, KernelExtraFlags, KernelType, Side, Uplo,
};
use kgen_solve::device::mem::{DeviceInfo, RecordingQueue, SourceBuilder};
use kgen_solve::{execute_seq, CommandQueue, Environment, Event, SolutionStep, SolveError};
use kgen_tile::DataType;

type F = KernelExtraFlags;

fn env_with(cfg: GenConfig) -> (Environment, Arc<SourceBuilder>) {
    let builder = Arc::new(SourceBuilder::new());
    let env = Environment::new(cfg, builder.clone()).unwrap();
    (env, builder)
}

fn queue(id: u64, cus: u32) -> Arc<RecordingQueue> {
    Arc::new(RecordingQueue::new(DeviceInfo::new(id, cus)))
}

fn dyn_queues(queues: &[Arc<RecordingQueue>]) -> Vec<Arc<dyn CommandQueue>> {
    queues.iter().map(|q| q.clone() as Arc<dyn CommandQueue>).collect()
}

fn gemm(m: usize, n: usize, k: usize) -> BlasKargs {
    let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
    kargs.m = m;
    kargs.n = n;
    kargs.k = k;
    kargs.lda = k;
    kargs.ldb = n;
    kargs.ldc = n;
    kargs
}

fn syrk(n: usize, k: usize) -> BlasKargs {
    let mut kargs = BlasKargs::new(BlasFunction::Syrk, DataType::Float);
    kargs.n = n;
    kargs.k = k;
    kargs.lda = k;
    kargs.ldc = n;
    kargs
}

fn small_syrk_config() -> GenConfig {
    GenConfig {
        decomposition_bytes: 64 * 4,
        ..GenConfig::default()
    }
}

#[test]
fn test_gemm_single_launch_threads_wait_list() {
    let (env, _) = env_with(GenConfig::default());
    let q = queue(0, 16);
    let events = env.execute(&gemm(256, 256, 256), &dyn_queues(&[q.clone()]), &[Event(99)]).unwrap();
    assert_eq!(events.len(), 1);

    let launches = q.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].wait_list, vec![Event(99)]);
    assert!(launches[0].global[0] > 0);
    assert_eq!(launches[0].global[0] % launches[0].local[0], 0);
}

#[test]
fn test_second_call_hits_cache() {
    let (env, builder) = env_with(GenConfig::default());
    let queues = dyn_queues(&[queue(0, 16)]);
    env.execute(&gemm(128, 128, 64), &queues, &[]).unwrap();
    env.execute(&gemm(128, 128, 64), &queues, &[]).unwrap();
    assert_eq!(builder.builds(), 1);
    assert_eq!(env.cache().len(), 1);

    env.teardown();
    assert!(env.cache().is_empty());
}

#[test]
fn test_gemm_divided_between_queues() {
    let (env, _) = env_with(GenConfig::default());
    let (small, big) = (queue(0, 4), queue(1, 12));
    let seq = env
        .make_solution_seq(&gemm(2048, 512, 64), &dyn_queues(&[small.clone(), big.clone()]), &[])
        .unwrap();
    assert_eq!(seq.len(), 2);
    let rows: usize = seq.steps().iter().map(|s| s.args.m).sum();
    assert_eq!(rows, 2048);
    // each part is folded into the C offset of its queue
    assert!(seq.steps().iter().any(|s| s.args.off_cy == 1536 * 512));
}

#[test]
fn test_large_trsm_runs_as_chain() {
    let (env, _) = env_with(GenConfig::default());
    let q = queue(0, 16);
    let mut kargs = BlasKargs::new(BlasFunction::Trsm, DataType::Float);
    kargs.side = Side::Left;
    kargs.uplo = Uplo::Upper;
    kargs.m = 3000;
    kargs.n = 64;
    kargs.lda = 3000;
    kargs.ldb = 64;
    kargs.alpha = ArgScalar::Real(1.0);

    let mut seq = env.make_solution_seq(&kargs, &dyn_queues(&[q.clone()]), &[]).unwrap();
    let funcs: Vec<_> = seq.steps().iter().map(|s| s.func).collect();
    assert_eq!(funcs, vec![BlasFunction::Trsm, BlasFunction::Gemm, BlasFunction::Trsm]);

    let events = execute_seq(&mut seq).unwrap();
    assert_eq!(events.len(), 1);
    let launches = q.launches();
    assert_eq!(launches.len(), 3);
    assert!(launches[0].wait_list.is_empty());
    assert_eq!(launches[1].wait_list, vec![Event(1)]);
    assert_eq!(launches[2].wait_list, vec![Event(2)]);
    assert_eq!(events, vec![Event(3)]);
}

#[test]
fn test_syrk_separate_diagonal_sequence() {
    let (env, _) = env_with(small_syrk_config());
    let q = queue(0, 8);
    let mut seq = env.make_solution_seq(&syrk(50, 10), &dyn_queues(&[q.clone()]), &[]).unwrap();
    assert_eq!(seq.len(), 7);
    let diagonal = seq
        .steps()
        .iter()
        .filter(|s| s.extra_flags.contains(F::SYRK_EVALUATE_DIAGONAL))
        .count();
    assert_eq!(diagonal, 4);

    execute_seq(&mut seq).unwrap();
    assert_eq!(q.launch_count(), 7);
}

/// Count the writes every stored cell of an `n x n` result receives,
/// following the tile guards of the rank-k kernel each step runs.
fn rank_k_writes(n: usize, upper: bool, steps: &[SolutionStep]) -> Vec<u32> {
    let mut hits = vec![0u32; n * n];
    for s in steps.iter().filter(|s| s.active) {
        let flags = s.kernel(KernelType::Compute).unwrap().extra.flags;
        let (top, item) = (s.levels()[0], s.levels()[1]);
        let (y1, x1) = (item.y, item.x);
        let a = &s.args;
        let (end_m, end_n) = (a.offset_m + a.m, a.offset_n + a.n);
        let separate_only = flags.contains(F::SYRK_SEPARATE_DIAGONAL) && !flags.contains(F::SYRK_EVALUATE_DIAGONAL);

        let tiles_y = a.m.div_ceil(top.y) * (top.y / y1);
        let tiles_x = a.n.div_ceil(top.x) * (top.x / x1);
        for gy in 0..tiles_y {
            for gx in 0..tiles_x {
                let (y, x) = (a.offset_m + y1 * gy, a.offset_n + x1 * gx);
                if (flags.contains(F::TAILS_M) && y >= end_m) || (flags.contains(F::TAILS_N) && x >= end_n) {
                    continue;
                }
                let unused = if upper { x + x1 <= y } else { y + y1 <= x };
                let crossing = if upper { x < y + y1 - 1 } else { y < x + x1 - 1 };
                if unused || (separate_only && crossing) {
                    continue;
                }
                for row in y..y + y1 {
                    for col in x..x + x1 {
                        if (flags.contains(F::TAILS_M_LOWER) && row >= end_m)
                            || (flags.contains(F::TAILS_N_LOWER) && col >= end_n)
                        {
                            continue;
                        }
                        let stored = if upper { row <= col } else { row >= col };
                        if !separate_only && !stored {
                            continue;
                        }
                        assert!(row < n && col < n, "write at ({row}, {col}) outside the result");
                        hits[row * n + col] += 1;
                    }
                }
            }
        }
    }
    hits
}

#[test]
fn test_decomposed_syrk_writes_triangle_once() {
    let n = 50;
    for block in [8, 16, 32] {
        for uplo in [Uplo::Lower, Uplo::Upper] {
            let cfg = GenConfig {
                syrk_diagonal_block: block,
                ..small_syrk_config()
            };
            let (env, _) = env_with(cfg);
            let mut kargs = syrk(n, 10);
            kargs.uplo = uplo;
            let seq = env.make_solution_seq(&kargs, &dyn_queues(&[queue(0, 8)]), &[]).unwrap();
            assert_eq!(seq.len(), 2 * n.div_ceil(block) - 1);

            let upper = uplo == Uplo::Upper;
            let hits = rank_k_writes(n, upper, seq.steps());
            for row in 0..n {
                for col in 0..n {
                    let expected = u32::from(if upper { row <= col } else { row >= col });
                    assert_eq!(hits[row * n + col], expected, "block {block}, {uplo:?}, cell ({row}, {col})");
                }
            }
        }
    }
}

#[test]
fn test_unaligned_diagonal_block_rejected() {
    let cfg = GenConfig {
        syrk_diagonal_block: 10,
        ..small_syrk_config()
    };
    let err = Environment::new(cfg, Arc::new(SourceBuilder::new())).unwrap_err();
    assert!(matches!(err, SolveError::Gen(GenError::InvalidConfig(_))));
}

#[test]
fn test_enqueue_failure_aborts_sequence() {
    let (env, _) = env_with(small_syrk_config());
    let q = Arc::new(RecordingQueue::new(DeviceInfo::new(0, 8)).failing_at(2));
    let err = env.execute(&syrk(50, 10), &dyn_queues(&[q.clone()]), &[]).unwrap_err();
    assert!(matches!(err, SolveError::Device(_)));
    assert_eq!(q.launch_count(), 2);
}

#[test]
fn test_build_failure_carries_context() {
    let env = Environment::new(GenConfig::default(), Arc::new(SourceBuilder::rejecting("__kernel"))).unwrap();
    let err = env.execute(&gemm(64, 64, 64), &dyn_queues(&[queue(3, 8)]), &[]).unwrap_err();
    match err {
        SolveError::Build(failure) => {
            assert_eq!(failure.device_name, "device3");
            assert!(failure.source.contains("__kernel"));
            assert!(failure.log.contains("rejected"));
            assert_eq!(failure.subdims.len(), 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_double_needs_native_support() {
    let (env, _) = env_with(GenConfig::default());
    let mut info = DeviceInfo::new(0, 8);
    info.native_double = false;
    let queues: Vec<Arc<dyn CommandQueue>> = vec![Arc::new(RecordingQueue::new(info))];
    let mut kargs = gemm(64, 64, 64);
    kargs.dtype = DataType::Double;
    let err = env.make_solution_seq(&kargs, &queues, &[]).unwrap_err();
    assert!(matches!(err, SolveError::Gen(GenError::Unsupported(_))));
}

#[test]
fn test_no_queues_is_invalid() {
    let (env, _) = env_with(GenConfig::default());
    let err = env.make_solution_seq(&gemm(8, 8, 8), &[], &[]).unwrap_err();
    assert!(matches!(err, SolveError::InvalidValue(_)));
}

#[test]
fn test_image_backed_gemm_runs_in_panels() {
    let (env, _) = env_with(GenConfig::default());
    let image = ImageId(7);
    let q = Arc::new(RecordingQueue::new(DeviceInfo::new(0, 8)).with_image(image, 256, 16));
    let mut kargs = gemm(64, 64, 64);
    kargs.scimage[0] = Some(image);

    let mut seq = env.make_solution_seq(&kargs, &dyn_queues(&[q.clone()]), &[Event(5)]).unwrap();
    assert!(seq.steps()[0].extra_flags.contains(F::A_OFF_NOT_ZERO | F::CY_OFF_NOT_ZERO));
    let events = execute_seq(&mut seq).unwrap();
    assert_eq!(events.len(), 1);

    // 16 image rows hold two 8-row blocks of A
    let launches = q.launches();
    assert_eq!(launches.len(), 4);
    assert_eq!(launches[0].wait_list, vec![Event(5)]);
    assert!(launches[1..].iter().all(|l| l.wait_list.is_empty()));
}
