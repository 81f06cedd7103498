//! Kernel cache.
//!
//! Generation is deterministic, so a kernel built once for a key can serve
//! every later request with the same key. Keys carry the kernel extra with
//! its flags reduced to the bits relevant for the function.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kgen_blas::{BlasFunction, KernelExtra, SolverId};
use kgen_emit::{SubproblemDim, MAX_SUBDIMS};
use tracing::debug;

use crate::device::{ContextId, DeviceId, Program};

/// Identity of a generated kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub device: DeviceId,
    pub context: ContextId,
    pub nr_dims: usize,
    pub subdims: [SubproblemDim; MAX_SUBDIMS],
    pub extra: KernelExtra,
}

impl KernelKey {
    pub fn new(
        device: DeviceId,
        context: ContextId,
        func: BlasFunction,
        subdims: &[SubproblemDim],
        extra: &KernelExtra,
    ) -> Self {
        let nr_dims = subdims.len().min(MAX_SUBDIMS);
        let mut dims = [SubproblemDim::default(); MAX_SUBDIMS];
        dims[..nr_dims].copy_from_slice(&subdims[..nr_dims]);
        Self {
            device,
            context,
            nr_dims,
            subdims: dims,
            extra: extra.masked_for(func),
        }
    }
}

/// A built kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    /// Entry point name.
    pub name: String,
    pub program: Program,
    /// Extra the source was generated with.
    pub extra: KernelExtra,
    pub source_len: usize,
}

/// Shared store of built kernels.
pub trait KernelCache: Send + Sync {
    fn lookup(&self, solver: SolverId, key: &KernelKey) -> Option<Arc<Kernel>>;

    fn insert(&self, solver: SolverId, key: KernelKey, kernel: Arc<Kernel>);

    /// Drop every entry.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`KernelCache`] in a mutex guarded hash map.
#[derive(Debug, Default)]
pub struct MemoryKernelCache {
    entries: Mutex<HashMap<(SolverId, KernelKey), Arc<Kernel>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MemoryKernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

impl KernelCache for MemoryKernelCache {
    fn lookup(&self, solver: SolverId, key: &KernelKey) -> Option<Arc<Kernel>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let found = entries.get(&(solver, key.clone())).cloned();
        match &found {
            Some(kernel) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(kernel = %kernel.name, ?solver, "kernel cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(?solver, flags = %key.extra.flags, "kernel cache miss");
            }
        }
        found
    }

    fn insert(&self, solver: SolverId, key: KernelKey, kernel: Arc<Kernel>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry((solver, key)).or_insert(kernel);
    }

    fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
