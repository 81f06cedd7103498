//! Generation guard: one function per pattern per program.
//!
//! OpenCL C rejects two definitions of the same function in one translation
//! unit. Helpers such as tile copy routines are requested from many places of
//! a kernel generator, so the guard remembers which patterns were already
//! emitted and hands back the existing function name instead of emitting the
//! body again.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::context::KgenContext;
use crate::error::EmitError;

/// Longest function name a guard accepts.
pub const FUNC_NAME_MAXLEN: usize = 256;

/// Pattern table bound to a generator callback.
///
/// The callback must declare exactly one function in the context it receives
/// and name it uniquely for the pattern.
pub struct KgenGuard<P, F> {
    generated: HashMap<P, String>,
    callback: F,
}

impl<P, F> KgenGuard<P, F>
where
    P: Clone + Eq + Hash,
{
    pub fn new(callback: F) -> Self {
        Self {
            generated: HashMap::new(),
            callback,
        }
    }

    /// Forget every pattern and switch to another callback, for reuse with a
    /// new program.
    pub fn reinit(&mut self, callback: F) {
        self.generated.clear();
        self.callback = callback;
    }

    /// Number of distinct functions generated so far.
    pub fn len(&self) -> usize {
        self.generated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generated.is_empty()
    }

    /// Find the function generated for `pattern`, or generate it into `ctx`.
    pub fn find_or_generate<E>(&mut self, ctx: &mut KgenContext, pattern: &P) -> Result<String, E>
    where
        F: FnMut(&mut KgenContext, &P) -> Result<(), E>,
        E: From<EmitError>,
    {
        if let Some(name) = self.generated.get(pattern) {
            return Ok(name.clone());
        }

        let before = ctx.functions_declared();
        (self.callback)(ctx, pattern)?;
        if ctx.functions_declared() == before {
            return Err(EmitError::MissingFunction.into());
        }
        let name = ctx
            .last_func_name()
            .ok_or(EmitError::MissingFunction)?
            .to_string();
        if name.len() >= FUNC_NAME_MAXLEN {
            return Err(EmitError::NameTooLong {
                name,
                max: FUNC_NAME_MAXLEN,
            }
            .into());
        }
        if self.generated.values().any(|n| *n == name) {
            return Err(EmitError::DuplicateFunction(name).into());
        }

        debug!(function = %name, "generated guarded function");
        self.generated.insert(pattern.clone(), name.clone());
        Ok(name)
    }
}
