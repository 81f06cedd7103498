use std::collections::HashSet;
use std::sync::Arc;

use blaskgen::device::mem::{DeviceInfo, RecordingQueue, SourceBuilder};
use blaskgen::{
    BlasFunction, BlasKargs, CommandQueue, DataType, EmitError, Environment, GenConfig, KgenContext, KgenGuard,
    Uplo,
};
use proptest::prelude::*;

fn gen_copy(ctx: &mut KgenContext, pattern: &(u8, u8)) -> Result<(), EmitError> {
    let (rows, cols) = *pattern;
    ctx.declare_function(&format!("void\ncopy{rows}x{cols}(__local float *dst, const __global float *src)\n"))?;
    ctx.begin_func_body()?;
    ctx.add_stmt(&format!("dst[{rows} * {cols} - 1] = src[0];\n"))?;
    ctx.end_func_body()?;
    ctx.add_blank_line()
}

/// Launch shapes and arguments of one call, in launch order.
fn launches(kargs: &BlasKargs, cus: &[u32]) -> Vec<(String, [usize; 2], [usize; 2], Vec<String>)> {
    let env = Environment::new(GenConfig::default(), Arc::new(SourceBuilder::new())).unwrap();
    let queues: Vec<_> = cus
        .iter()
        .enumerate()
        .map(|(i, &cu)| Arc::new(RecordingQueue::new(DeviceInfo::new(i as u64, cu))))
        .collect();
    let dyn_queues: Vec<Arc<dyn CommandQueue>> = queues.iter().map(|q| q.clone() as Arc<dyn CommandQueue>).collect();
    env.execute(kargs, &dyn_queues, &[]).unwrap();
    queues
        .iter()
        .flat_map(|q| q.launches())
        .map(|l| {
            let args = l.args.iter().map(|a| format!("{a:?}")).collect();
            (l.kernel.name.clone(), l.global, l.local, args)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_guard_one_function_per_pattern(patterns in prop::collection::vec((1u8..6, 1u8..6), 1..40)) {
        let mut ctx = KgenContext::new(1 << 16);
        let mut guard = KgenGuard::new(gen_copy);
        let mut names = Vec::new();
        for p in &patterns {
            let name: String = guard.find_or_generate(&mut ctx, p).unwrap();
            prop_assert_eq!(&name, &format!("copy{}x{}", p.0, p.1));
            names.push(name);
        }
        let distinct_patterns: HashSet<_> = patterns.iter().collect();
        let distinct_names: HashSet<_> = names.iter().collect();
        prop_assert_eq!(distinct_names.len(), distinct_patterns.len());
        prop_assert_eq!(guard.len(), distinct_patterns.len());
        prop_assert_eq!(ctx.functions_declared(), distinct_patterns.len());
    }

    #[test]
    fn prop_same_call_same_launches(
        func in prop_oneof![
            Just(BlasFunction::Gemm),
            Just(BlasFunction::Trmm),
            Just(BlasFunction::Syrk),
        ],
        m in 1usize..700,
        n in 1usize..700,
        k in 1usize..200,
        upper in any::<bool>(),
        cus in prop::collection::vec(1u32..24, 1..3),
    ) {
        let mut kargs = BlasKargs::new(func, DataType::Float);
        kargs.m = m;
        kargs.n = n;
        kargs.k = k;
        kargs.lda = m.max(n).max(k);
        kargs.ldb = kargs.lda;
        kargs.ldc = kargs.lda;
        kargs.uplo = if upper { Uplo::Upper } else { Uplo::Lower };

        // independent environments generate and launch identically
        let first = launches(&kargs, &cus);
        let second = launches(&kargs, &cus);
        prop_assert!(!first.is_empty());
        prop_assert_eq!(first, second);
    }
}
