use std::sync::Arc;

use approx::assert_relative_eq;
use blaskgen::device::mem::{DeviceInfo, RecordingQueue, SourceBuilder};
use blaskgen::kgen_solve::make::detect_problem_tails;
use blaskgen::{
    generate_source, ArgScalar, BlasFunction, BlasKargs, CommandQueue, DataType, Environment, GenConfig,
    KernelExtra, KernelExtraFlags, KgenError, PGranularity, Side, SolutionStep, Status, SubproblemDim, Uplo,
};
use num_complex::Complex64;

type F = KernelExtraFlags;

fn queues(cus: &[u32]) -> Vec<Arc<dyn CommandQueue>> {
    cus.iter()
        .enumerate()
        .map(|(i, &cu)| Arc::new(RecordingQueue::new(DeviceInfo::new(i as u64, cu))) as Arc<dyn CommandQueue>)
        .collect()
}

fn env(cfg: GenConfig) -> Environment {
    Environment::new(cfg, Arc::new(SourceBuilder::new())).unwrap()
}

#[test]
fn test_scenario_gemm_with_tails() {
    let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
    kargs.m = 130;
    kargs.n = 65;
    kargs.k = 40;
    kargs.lda = 40;
    kargs.ldb = 65;
    kargs.ldc = 65;

    let levels = [SubproblemDim::new(64, 64, 8, 8, 8), SubproblemDim::new(8, 8, 8, 8, 8)];
    let queue: Arc<dyn CommandQueue> = Arc::new(RecordingQueue::new(DeviceInfo::new(0, 8)));
    let mut step = SolutionStep::new(kargs, queue);
    step.set_levels(&levels);
    detect_problem_tails(&mut step);
    assert!(step.extra_flags.contains(F::TAILS_M | F::TAILS_N));
    assert!(!step.extra_flags.contains(F::TAILS_K));

    let table = blaskgen::SolverTable::standard(&GenConfig::default());
    let block = &table.patterns(BlasFunction::Gemm)[0];
    let pgran = PGranularity::two_dim(8, 8);
    let extra = KernelExtra::new(DataType::Float, step.extra_flags).with_vec_len(4);
    let src = generate_source(block.sops.as_ref(), &levels, &pgran, &extra, 1 << 20).unwrap();

    // full tiles along K, items past the matrix leave early, edge tiles
    // store element by element
    assert!(src.contains("for (uint k1 = 0u; k1 < K; k1 += 8u) {"));
    assert!(src.contains("if ((coord.y >= M) || (coord.x >= N)) {"));
    assert!(src.contains("if ((coord.y + 8u <= M) && (coord.x + 8u <= N)) {"));
    assert!(src.contains("else {"));
}

#[test]
fn test_scenario_syrk_separate_diagonal() {
    let cfg = GenConfig {
        decomposition_bytes: 64 * 4,
        ..GenConfig::default()
    };
    let env = env(cfg);
    let mut kargs = BlasKargs::new(BlasFunction::Syrk, DataType::Float);
    kargs.n = 50;
    kargs.k = 12;
    kargs.lda = 12;
    kargs.ldc = 50;

    let seq = env.make_solution_seq(&kargs, &queues(&[8]), &[]).unwrap();
    let diagonal: Vec<_> = seq
        .steps()
        .iter()
        .filter(|s| s.extra_flags.contains(F::SYRK_SEPARATE_DIAGONAL | F::SYRK_EVALUATE_DIAGONAL))
        .collect();
    assert_eq!(diagonal.len(), 4);
    assert_eq!(seq.len(), 7);

    let rects: Vec<_> = seq
        .steps()
        .iter()
        .map(|s| (s.args.offset_m, s.args.m, s.args.offset_n, s.args.n))
        .collect();
    for (i, a) in rects.iter().enumerate() {
        for b in &rects[i + 1..] {
            let rows = a.0 < b.0 + b.1 && b.0 < a.0 + a.1;
            let cols = a.2 < b.2 + b.3 && b.2 < a.2 + a.3;
            assert!(!(rows && cols), "{a:?} overlaps {b:?}");
        }
    }
    assert!(seq.steps()[1..].iter().all(|s| s.after_previous));
}

#[test]
fn test_trsm_update_scales_by_inverse_alpha() {
    let env = env(GenConfig::default());
    let mut kargs = BlasKargs::new(BlasFunction::Trsm, DataType::ComplexFloat);
    kargs.side = Side::Right;
    kargs.uplo = Uplo::Lower;
    kargs.m = 32;
    kargs.n = 1400;
    kargs.lda = 1400;
    kargs.ldb = 1400;
    kargs.alpha = ArgScalar::Complex(Complex64::new(0.0, 2.0));

    let seq = env.make_solution_seq(&kargs, &queues(&[16]), &[]).unwrap();
    assert_eq!(seq.len(), 3);
    let update = &seq.steps()[1];
    assert_eq!(update.func, BlasFunction::Gemm);
    match update.args.alpha {
        // -1 / 2i = 0.5i
        ArgScalar::Complex(c) => {
            assert_relative_eq!(c.re, 0.0);
            assert_relative_eq!(c.im, 0.5);
        }
        other => panic!("unexpected alpha {other:?}"),
    }
}

#[test]
fn test_status_of_failed_calls() {
    let env = Environment::new(GenConfig::default(), Arc::new(SourceBuilder::rejecting("__kernel"))).unwrap();
    let mut kargs = BlasKargs::new(BlasFunction::Gemm, DataType::Float);
    kargs.m = 64;
    kargs.n = 64;
    kargs.k = 64;
    let result = env.execute(&kargs, &queues(&[4]), &[]);
    assert_eq!(Status::from_result(&result), Status::BuildFailure);

    let result = env.execute(&kargs, &[], &[]);
    assert_eq!(Status::from_result(&result), Status::InvalidValue);

    let bad = GenConfig {
        division_alignment: 100,
        ..GenConfig::default()
    };
    let err = Environment::new(bad, Arc::new(SourceBuilder::new())).unwrap_err();
    assert_eq!(KgenError::from(err).status(), Status::InvalidValue);
}

#[test]
fn test_config_from_partial_json() {
    let cfg: GenConfig = serde_json::from_str(r#"{ "syrk_diagonal_block": 32, "division_alignment": 64 }"#).unwrap();
    assert_eq!(cfg.syrk_diagonal_block, 32);
    assert_eq!(cfg.division_alignment, 64);
    assert_eq!(cfg.nr_channels, GenConfig::default().nr_channels);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_every_function_executes() {
    let env = env(GenConfig::default());
    for func in BlasFunction::ALL {
        for dtype in DataType::ALL {
            let mut kargs = BlasKargs::new(func, dtype);
            kargs.m = 96;
            kargs.n = 80;
            kargs.k = 72;
            kargs.lda = 128;
            kargs.ldb = 128;
            kargs.ldc = 128;
            let events = env
                .execute(&kargs, &queues(&[8, 8]), &[])
                .unwrap_or_else(|e| panic!("{func} {dtype}: {e}"));
            assert!(!events.is_empty());
        }
    }
}
