//! Process wide state: configuration, solver table, kernel cache and the
//! program builder.

use std::fmt;
use std::sync::{Arc, OnceLock};

use kgen_blas::{BlasKargs, GenConfig, SolverTable};
use tracing::info;

use crate::cache::{KernelCache, MemoryKernelCache};
use crate::device::{CommandQueue, Event, ProgramBuilder};
use crate::error::Result;
use crate::exec::execute_seq;
use crate::make::make_solution_seq;
use crate::step::SolutionSeq;

/// Everything a BLAS call needs besides its arguments and queues.
///
/// The solver table is built on first use. Cloning an [`Arc`] of the
/// environment is how it is shared between threads.
pub struct Environment {
    config: GenConfig,
    table: OnceLock<SolverTable>,
    cache: Arc<dyn KernelCache>,
    builder: Arc<dyn ProgramBuilder>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("table_ready", &self.table.get().is_some())
            .field("cached_kernels", &self.cache.len())
            .finish()
    }
}

impl Environment {
    pub fn new(config: GenConfig, builder: Arc<dyn ProgramBuilder>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            table: OnceLock::new(),
            cache: Arc::new(MemoryKernelCache::new()),
            builder,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn KernelCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Use `table` instead of the standard one.
    pub fn with_table(self, table: SolverTable) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(table);
        Self { table: cell, ..self }
    }

    pub fn config(&self) -> &GenConfig {
        &self.config
    }

    pub fn table(&self) -> &SolverTable {
        self.table.get_or_init(|| SolverTable::standard(&self.config))
    }

    pub fn cache(&self) -> &dyn KernelCache {
        self.cache.as_ref()
    }

    pub fn builder(&self) -> &dyn ProgramBuilder {
        self.builder.as_ref()
    }

    pub fn make_solution_seq(
        &self,
        kargs: &BlasKargs,
        queues: &[Arc<dyn CommandQueue>],
        wait_list: &[Event],
    ) -> Result<SolutionSeq> {
        make_solution_seq(self, kargs, queues, wait_list)
    }

    /// Build and run the sequence for one call; returns the events
    /// completing it.
    pub fn execute(
        &self,
        kargs: &BlasKargs,
        queues: &[Arc<dyn CommandQueue>],
        wait_list: &[Event],
    ) -> Result<Vec<Event>> {
        let mut seq = self.make_solution_seq(kargs, queues, wait_list)?;
        execute_seq(&mut seq)
    }

    /// Release every cached kernel.
    pub fn teardown(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "kernel cache cleared");
    }
}
