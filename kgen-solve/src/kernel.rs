//! Generating and building the kernel of a step, through the cache.

use std::sync::Arc;

use kgen_blas::{generate_source, KernelExtra};
use tracing::{debug, warn};

use crate::cache::{Kernel, KernelKey};
use crate::env::Environment;
use crate::error::{BuildFailure, Result, SolveError};
use crate::step::SolutionStep;

/// Name of the first kernel function declared in `source`.
pub fn kernel_entry_name(source: &str) -> Option<&str> {
    let start = source.find("__kernel")? + "__kernel".len();
    let rest = &source[start..];
    let end = rest.find('(')?;
    let decl = rest[..end].trim();
    decl.split_whitespace().last()
}

/// Kernel of `step` for `extra`, built unless the cache already holds it.
pub fn build_kernel(env: &Environment, step: &SolutionStep, extra: &KernelExtra) -> Result<Arc<Kernel>> {
    let (sid, pattern) = step
        .pattern
        .as_ref()
        .ok_or_else(|| SolveError::InvalidValue(format!("{} step has no solver pattern", step.func)))?;
    let device = step.queue.device();
    let key = KernelKey::new(device.id(), device.context(), step.func, step.levels(), extra);
    if let Some(kernel) = env.cache().lookup(*sid, &key) {
        return Ok(kernel);
    }

    let source = generate_source(
        pattern.sops.as_ref(),
        step.levels(),
        &step.pgran,
        extra,
        env.config().max_source_size,
    )?;
    let name = kernel_entry_name(&source).unwrap_or(pattern.name).to_string();
    let options = extra.build_options_string();

    let program = env.builder().build(&source, &options, device).map_err(|log| {
        warn!(
            kernel = %name,
            device = device.name(),
            subdims = ?step.levels(),
            pgran = %step.pgran,
            flags = %extra.flags,
            "kernel build failed:\n{}",
            log.0
        );
        SolveError::Build(Box::new(BuildFailure {
            device_name: device.name().to_string(),
            vendor: device.vendor().to_string(),
            source: source.clone(),
            log: log.0,
            subdims: step.levels().to_vec(),
            pgran: step.pgran,
            flags: extra.flags,
            kern_type: extra.kern_type,
        }))
    })?;

    debug!(kernel = %name, device = device.name(), size = source.len(), options = %options, "built kernel");
    let kernel = Arc::new(Kernel {
        name,
        program,
        extra: extra.clone(),
        source_len: source.len(),
    });
    env.cache().insert(*sid, key, Arc::clone(&kernel));
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name() {
        let src = "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\n__attribute__((reqd_work_group_size(64, 1, 1)))\nvoid __kernel\nsgemmBlock(\n    uint M)\n{\n}\n";
        assert_eq!(kernel_entry_name(src), Some("sgemmBlock"));
        assert_eq!(kernel_entry_name("void helper(void)"), None);
    }
}
