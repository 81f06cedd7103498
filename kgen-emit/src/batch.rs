//! Priority-ordered statement batches.
//!
//! Fetch, compute and store code for one tile are produced together but must
//! land in the kernel in phase order. A batch collects statements tagged with
//! a priority and flushes them lowest priority first, keeping insertion order
//! among statements of equal priority.

use std::fmt;

use crate::context::KgenContext;
use crate::error::{EmitError, Result};

/// Exclusive upper bound of statement priorities.
pub const MAX_STATEMENT_PRIORITY: usize = 63;

#[derive(Debug, Clone)]
pub struct StatementBatch {
    buckets: Vec<Vec<String>>,
}

impl Default for StatementBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementBatch {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); MAX_STATEMENT_PRIORITY],
        }
    }

    pub fn add(&mut self, priority: usize, stmt: impl Into<String>) -> Result<()> {
        let bucket = self.bucket(priority)?;
        let stmt = stmt.into();
        if bucket.try_reserve(1).is_err() {
            return Err(EmitError::OutOfMemory);
        }
        bucket.push(stmt);
        Ok(())
    }

    /// Formatted variant of [`add`](Self::add); see [`batch_printf!`](crate::batch_printf).
    pub fn add_fmt(&mut self, priority: usize, args: fmt::Arguments<'_>) -> Result<()> {
        self.add(priority, fmt::format(args))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Write every statement into `ctx` and leave the batch empty.
    ///
    /// The batch is drained even when the context fails midway.
    pub fn flush(&mut self, ctx: &mut KgenContext) -> Result<()> {
        let mut result = Ok(());
        for bucket in &mut self.buckets {
            for stmt in bucket.drain(..) {
                if result.is_ok() {
                    result = ctx.add_stmt(&stmt);
                }
            }
        }
        result
    }

    fn bucket(&mut self, priority: usize) -> Result<&mut Vec<String>> {
        self.buckets.get_mut(priority).ok_or_else(|| {
            EmitError::InvalidArgument(format!(
                "statement priority {priority} out of range 0..{MAX_STATEMENT_PRIORITY}"
            ))
        })
    }
}

/// `printf`-style statement added to a [`StatementBatch`].
#[macro_export]
macro_rules! batch_printf {
    ($batch:expr, $prio:expr, $($arg:tt)*) => {
        $batch.add_fmt($prio, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_orders_by_priority() {
        let mut batch = StatementBatch::new();
        batch.add(2, "store;\n").unwrap();
        batch.add(0, "fetch a;\n").unwrap();
        batch.add(1, "mul;\n").unwrap();
        batch.add(0, "fetch b;\n").unwrap();
        assert_eq!(batch.len(), 4);

        let mut ctx = KgenContext::new(1024);
        batch.flush(&mut ctx).unwrap();
        assert_eq!(ctx.source(), "fetch a;\nfetch b;\nmul;\nstore;\n");
        assert!(batch.is_empty());
    }

    #[test]
    fn test_top_priority_rejected() {
        let mut batch = StatementBatch::new();
        assert!(batch.add(MAX_STATEMENT_PRIORITY, "x;\n").is_err());
        assert!(batch.add(MAX_STATEMENT_PRIORITY - 1, "x;\n").is_ok());
    }

    #[test]
    fn test_flush_drains_on_overflow() {
        let mut batch = StatementBatch::new();
        batch_printf!(batch, 0, "int a{};\n", 0).unwrap();
        batch_printf!(batch, 0, "int a{};\n", 1).unwrap();
        let mut ctx = KgenContext::new(8);
        assert!(batch.flush(&mut ctx).unwrap_err().is_overflow());
        assert!(batch.is_empty());
    }
}
