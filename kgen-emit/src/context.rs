//! Bounded, append-only builder for OpenCL C source.
//!
//! A context either stores text into a buffer limited to a fixed capacity, or
//! runs "dry" and only measures what would have been written. Generators are
//! run twice, first dry to learn the exact size and then for real, so every
//! generator must be a pure function of its inputs.
//!
//! Once an emit fails, the error sticks: every later call returns the same
//! error without touching the buffer.

use std::fmt;

use crate::error::{EmitError, Result};

/// Indentation width of one nesting level.
pub const TAB_WIDTH: usize = 4;
/// Deepest branch nesting a generator may open.
pub const MAX_NESTING: usize = 10;
/// Upper bound of nesting levels reachable through [`KgenContext::sync_formatting`].
pub const MAX_TABS: usize = 16;

const BLANKS: &str = concat!(
    "                                                                ",
    "                                                                ",
);

/// Source emitter state.
#[derive(Debug, Clone)]
pub struct KgenContext {
    /// `None` in dry-run mode.
    text: Option<String>,
    capacity: usize,
    len: usize,
    nesting: usize,
    nr_tabs: usize,
    fmt: bool,
    sticky: Option<EmitError>,
    last_fname: Option<String>,
    nr_functions: usize,
}

impl KgenContext {
    /// Emitting context which refuses to grow beyond `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            text: Some(String::new()),
            capacity,
            len: 0,
            nesting: 0,
            nr_tabs: 0,
            fmt: true,
            sticky: None,
            last_fname: None,
            nr_functions: 0,
        }
    }

    /// Measuring context. It stores nothing and never overflows.
    pub fn dry_run() -> Self {
        Self {
            text: None,
            capacity: usize::MAX,
            ..Self::new(0)
        }
    }

    /// Enable or disable automatic indentation.
    pub fn with_format(mut self, fmt: bool) -> Self {
        self.fmt = fmt;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.text.is_none()
    }

    /// Text emitted so far. Empty for a dry-run context.
    pub fn source(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn into_source(self) -> String {
        self.text.unwrap_or_default()
    }

    /// Length of the source in bytes, measured or stored.
    pub fn source_size(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn nesting(&self) -> usize {
        self.nesting
    }

    /// Error that poisoned the context, if any.
    pub fn error(&self) -> Option<&EmitError> {
        self.sticky.as_ref()
    }

    /// Name of the last declared function.
    pub fn last_func_name(&self) -> Option<&str> {
        self.last_fname.as_deref()
    }

    /// Number of functions declared since creation or the last reset.
    pub fn functions_declared(&self) -> usize {
        self.nr_functions
    }

    /// Drop all the text and state, keeping the mode and capacity.
    pub fn reset(&mut self) {
        if let Some(text) = self.text.as_mut() {
            text.clear();
        }
        self.len = 0;
        self.nesting = 0;
        self.sticky = None;
        self.last_fname = None;
        self.nr_functions = 0;
    }

    /// Align the nesting of `self` with `dst` plus `nr_tabs` extra levels, so
    /// text produced here can be pasted into `dst` at its current position.
    pub fn sync_formatting(&mut self, dst: &KgenContext, nr_tabs: usize) -> Result<()> {
        if nr_tabs + dst.nesting > MAX_TABS {
            return Err(EmitError::InvalidArgument(format!(
                "cannot format at {} levels, maximum is {MAX_TABS}",
                nr_tabs + dst.nesting
            )));
        }
        self.nesting = nr_tabs + dst.nesting;
        Ok(())
    }

    /// Add a function declaration. Must be called outside any function body.
    pub fn declare_function(&mut self, decl: &str) -> Result<()> {
        self.check()?;
        if self.nesting != 0 {
            return Err(self.fail(EmitError::Nesting("function declared inside a body")));
        }
        let Some(name) = search_func_name(decl) else {
            return Err(self.fail(EmitError::InvalidArgument(
                "declaration carries no function name".to_string(),
            )));
        };
        let name = name.to_string();
        self.add_str(None, Some(decl), None)?;
        self.last_fname = Some(name);
        self.nr_functions += 1;
        Ok(())
    }

    pub fn begin_func_body(&mut self) -> Result<()> {
        self.check()?;
        if self.nesting != 0 {
            return Err(self.fail(EmitError::Nesting("function body opened inside a body")));
        }
        self.add_str(None, None, Some("{\n"))?;
        self.nesting += 1;
        Ok(())
    }

    pub fn end_func_body(&mut self) -> Result<()> {
        self.check()?;
        if self.nesting != 1 {
            return Err(self.fail(EmitError::Nesting("unbalanced branches at function end")));
        }
        self.nesting -= 1;
        self.add_str(None, None, Some("}\n"))
    }

    /// Open a block, optionally headed by `stmt` (`if (...)`, `for (...)`).
    pub fn begin_branch(&mut self, stmt: Option<&str>) -> Result<()> {
        self.check()?;
        if self.nesting >= MAX_NESTING {
            return Err(self.fail(EmitError::Nesting("maximum branch nesting reached")));
        }
        match stmt {
            Some(stmt) => self.add_str(None, Some(stmt), Some(" {\n"))?,
            None => self.add_str(None, Some(""), Some("{\n"))?,
        }
        self.nesting += 1;
        Ok(())
    }

    /// Close a block. A trailing `stmt` yields `} stmt;`, as for `do {} while`.
    pub fn end_branch(&mut self, stmt: Option<&str>) -> Result<()> {
        self.check()?;
        if self.nesting == 0 {
            return Err(self.fail(EmitError::Nesting("no branch to close")));
        }
        self.nesting -= 1;
        match stmt {
            Some(stmt) => self.add_str(Some("} "), Some(stmt), Some(";\n")),
            None => self.add_str(Some("}\n"), None, None),
        }
    }

    /// Add a statement, possibly spanning several lines.
    pub fn add_stmt(&mut self, stmt: &str) -> Result<()> {
        self.check()?;
        self.add_str(None, Some(stmt), None)
    }

    /// Formatted statement; see the [`kprintf!`](crate::kprintf) macro.
    pub fn add_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        self.check()?;
        let stmt = fmt::format(args);
        self.add_str(None, Some(&stmt), None)
    }

    pub fn add_blank_line(&mut self) -> Result<()> {
        self.check()?;
        self.add_str(None, None, Some("\n"))
    }

    fn check(&self) -> Result<()> {
        match &self.sticky {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: EmitError) -> EmitError {
        self.sticky = Some(err.clone());
        err
    }

    fn push(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        let needed = self.len + s.len();
        if needed > self.capacity {
            return Err(self.fail(EmitError::Overflow {
                needed,
                capacity: self.capacity,
            }));
        }
        let mut oom = false;
        if let Some(text) = self.text.as_mut() {
            if text.try_reserve(s.len()).is_ok() {
                text.push_str(s);
            } else {
                oom = true;
            }
        }
        if oom {
            return Err(self.fail(EmitError::OutOfMemory));
        }
        self.len = needed;
        Ok(())
    }

    /// Append `pref`, `stmt` and `suff`, indenting every line of `stmt` that
    /// is not a bare newline.
    fn add_str(&mut self, pref: Option<&str>, stmt: Option<&str>, suff: Option<&str>) -> Result<()> {
        let nblanks = if self.fmt {
            ((self.nesting + self.nr_tabs) * TAB_WIDTH).min(BLANKS.len())
        } else {
            0
        };
        let blank = &BLANKS[..nblanks];

        let leading = pref.is_some() || stmt.is_some_and(|s| !s.starts_with('\n'));
        if nblanks > 0 && leading {
            self.push(blank)?;
        }
        if let Some(pref) = pref {
            self.push(pref)?;
        }
        if let Some(stmt) = stmt {
            if nblanks > 0 {
                for (i, line) in stmt.split_inclusive('\n').enumerate() {
                    if i > 0 && line != "\n" {
                        self.push(blank)?;
                    }
                    self.push(line)?;
                }
            } else {
                self.push(stmt)?;
            }
        }
        if let Some(suff) = suff {
            self.push(suff)?;
        }
        Ok(())
    }
}

/// Identifier right before the first opening parenthesis.
fn search_func_name(decl: &str) -> Option<&str> {
    let paren = decl.find('(')?;
    let head = &decl[..paren];
    let start = head
        .rfind([' ', '\n', '*'])
        .map_or(0, |i| i + 1);
    let name = &head[start..];
    (!name.is_empty()).then_some(name)
}

/// `printf`-style statement emission.
///
/// ```
/// use kgen_emit::{kprintf, KgenContext};
///
/// let mut ctx = KgenContext::new(256);
/// kprintf!(ctx, "uint k = {}u;\n", 16).unwrap();
/// assert_eq!(ctx.source(), "uint k = 16u;\n");
/// ```
#[macro_export]
macro_rules! kprintf {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.add_fmt(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ctx: &mut KgenContext) -> Result<()> {
        ctx.declare_function("void __kernel\nsgemm(uint M, uint N)\n")?;
        ctx.begin_func_body()?;
        ctx.add_stmt("uint i;\nuint j;\n")?;
        ctx.begin_branch(Some("for (i = 0; i < M; i++)"))?;
        ctx.add_stmt("j = i;\n\nj++;\n")?;
        ctx.end_branch(None)?;
        ctx.add_blank_line()?;
        ctx.end_func_body()
    }

    #[test]
    fn test_indentation() {
        let mut ctx = KgenContext::new(4096);
        sample(&mut ctx).unwrap();
        let expected = "void __kernel\nsgemm(uint M, uint N)\n{\n    uint i;\n    uint j;\n    \
                        for (i = 0; i < M; i++) {\n        j = i;\n\n        j++;\n    }\n\n}\n";
        assert_eq!(ctx.source(), expected);
        assert_eq!(ctx.last_func_name(), Some("sgemm"));
    }

    #[test]
    fn test_dry_run_matches_emit() {
        let mut dry = KgenContext::dry_run();
        sample(&mut dry).unwrap();
        let mut ctx = KgenContext::new(dry.source_size());
        sample(&mut ctx).unwrap();
        assert_eq!(ctx.source().len(), dry.source_size());
        assert!(dry.source().is_empty());
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut ctx = KgenContext::new(10);
        ctx.add_stmt("int a;\n").unwrap();
        let err = ctx.add_stmt("int b;\n").unwrap_err();
        assert!(err.is_overflow());
        // Nothing partial is kept after the failing push
        assert_eq!(ctx.source(), "int a;\n");
        // Even a tiny emit fails now
        assert!(ctx.add_stmt("\n").unwrap_err().is_overflow());
        assert!(ctx.add_blank_line().is_err());
    }

    #[test]
    fn test_nesting_rules() {
        let mut ctx = KgenContext::new(1024);
        ctx.declare_function("void f(void)\n").unwrap();
        ctx.begin_func_body().unwrap();
        assert!(matches!(
            ctx.declare_function("void g(void)\n"),
            Err(EmitError::Nesting(_))
        ));
        // The context is poisoned by the nesting violation
        assert!(ctx.add_stmt("x;\n").is_err());
    }

    #[test]
    fn test_max_nesting() {
        let mut ctx = KgenContext::new(1 << 16);
        for _ in 0..MAX_NESTING {
            ctx.begin_branch(None).unwrap();
        }
        assert!(ctx.begin_branch(None).is_err());
    }

    #[test]
    fn test_end_branch_with_stmt() {
        let mut ctx = KgenContext::new(1024);
        ctx.begin_branch(Some("do")).unwrap();
        ctx.add_stmt("i++;\n").unwrap();
        ctx.end_branch(Some("while (i < 4)")).unwrap();
        assert_eq!(ctx.source(), "do {\n    i++;\n} while (i < 4);\n");
    }

    #[test]
    fn test_search_func_name() {
        assert_eq!(search_func_name("void __kernel\nsgemmBlock(uint M)"), Some("sgemmBlock"));
        assert_eq!(search_func_name("float4 *getPtr(int)"), Some("getPtr"));
        assert_eq!(search_func_name("no parens"), None);
    }

    #[test]
    fn test_sync_formatting() {
        let mut dst = KgenContext::new(1024);
        dst.begin_branch(None).unwrap();
        let mut src = KgenContext::new(1024);
        src.sync_formatting(&dst, 1).unwrap();
        src.add_stmt("x = 1;\n").unwrap();
        assert_eq!(src.source(), "        x = 1;\n");
    }

    #[test]
    fn test_unformatted() {
        let mut ctx = KgenContext::new(1024).with_format(false);
        ctx.begin_branch(Some("if (a)")).unwrap();
        ctx.add_stmt("b;\nc;\n").unwrap();
        ctx.end_branch(None).unwrap();
        assert_eq!(ctx.source(), "if (a) {\nb;\nc;\n}\n");
    }
}
