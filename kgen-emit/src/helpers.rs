//! Small code snippets shared by kernel generators.

use crate::context::KgenContext;
use crate::dims::PGranularity;
use crate::error::Result;

/// Memory fence scope for barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFence {
    Local,
    Global,
}

impl MemFence {
    fn flag(self) -> &'static str {
        match self {
            MemFence::Local => "CLK_LOCAL_MEM_FENCE",
            MemFence::Global => "CLK_GLOBAL_MEM_FENCE",
        }
    }
}

/// Unified pointer kinds, see [`declare_uptrs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UptrType {
    Global,
    Local,
    Private,
}

impl UptrType {
    pub fn type_name(self) -> &'static str {
        match self {
            UptrType::Global => "GPtr",
            UptrType::Local => "LPtr",
            UptrType::Private => "PPtr",
        }
    }
}

pub fn add_barrier(ctx: &mut KgenContext, fence: MemFence) -> Result<()> {
    crate::kprintf!(ctx, "barrier({});\n", fence.flag())
}

pub fn add_mem_fence(ctx: &mut KgenContext, fence: MemFence) -> Result<()> {
    crate::kprintf!(ctx, "mem_fence({});\n", fence.flag())
}

/// Declare `name` as the item id linearized over the work group.
pub fn declare_local_id(ctx: &mut KgenContext, name: &str, pgran: &PGranularity) -> Result<()> {
    if pgran.wg_dim == 1 {
        crate::kprintf!(ctx, "const int {name} = get_local_id(0);\n")
    } else {
        crate::kprintf!(
            ctx,
            "const int {name} = get_local_id(1) * {} + get_local_id(0);\n",
            pgran.wg_size[0]
        )
    }
}

/// Declare `name` as the work group id linearized over the NDRange.
pub fn declare_group_id(ctx: &mut KgenContext, name: &str, pgran: &PGranularity) -> Result<()> {
    if pgran.wg_dim == 1 {
        crate::kprintf!(
            ctx,
            "const int {name} = get_global_id(0) / {};\n",
            pgran.wg_size[0]
        )
    } else {
        crate::kprintf!(
            ctx,
            "const int {name} = (get_global_id(1) / {}) * (get_global_size(0) / {}) + \
             get_global_id(0) / {};\n",
            pgran.wg_size[1],
            pgran.wg_size[0],
            pgran.wg_size[0]
        )
    }
}

/// Enable double precision in the program, with the AMD fallback pragma.
pub fn enable_double(ctx: &mut KgenContext) -> Result<()> {
    ctx.add_stmt(
        "#ifdef cl_khr_fp64\n\
         #pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\
         #else\n\
         #pragma OPENCL EXTENSION cl_amd_fp64 : enable\n\
         #endif\n\n",
    )
}

/// Declare the `GPtr`, `LPtr` and `PPtr` unions, giving typed views of one
/// pointer at every vector width.
pub fn declare_uptrs(ctx: &mut KgenContext, with_double: bool) -> Result<()> {
    let mut decl = String::new();
    if with_double {
        enable_double(ctx)?;
    }
    for (uptr, space) in [
        (UptrType::Global, "__global "),
        (UptrType::Local, "__local "),
        (UptrType::Private, ""),
    ] {
        decl.push_str("typedef union ");
        decl.push_str(uptr.type_name());
        decl.push_str(" {\n");
        for width in ["", "2", "4", "8", "16"] {
            let suffix = if width.is_empty() { "" } else { "v" };
            decl.push_str(&format!("    {space}float{width} *f{width}{suffix};\n"));
            if with_double {
                decl.push_str(&format!("    {space}double{width} *d{width}{suffix};\n"));
            }
        }
        decl.push_str("} ");
        decl.push_str(uptr.type_name());
        decl.push_str(";\n\n");
    }
    ctx.add_stmt(&decl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_2d() {
        let mut ctx = KgenContext::new(1024);
        declare_local_id(&mut ctx, "lid", &PGranularity::two_dim(8, 8)).unwrap();
        assert_eq!(
            ctx.source(),
            "const int lid = get_local_id(1) * 8 + get_local_id(0);\n"
        );
    }

    #[test]
    fn test_group_id_1d() {
        let mut ctx = KgenContext::new(1024);
        declare_group_id(&mut ctx, "gid", &PGranularity::one_dim(64)).unwrap();
        assert_eq!(ctx.source(), "const int gid = get_global_id(0) / 64;\n");
    }

    #[test]
    fn test_uptrs_single() {
        let mut ctx = KgenContext::new(1 << 12);
        declare_uptrs(&mut ctx, false).unwrap();
        let src = ctx.source();
        assert!(src.contains("typedef union GPtr {\n    __global float *f;\n"));
        assert!(src.contains("    float16 *f16v;\n} PPtr;"));
        assert!(!src.contains("double"));
    }

    #[test]
    fn test_barrier() {
        let mut ctx = KgenContext::new(64);
        add_barrier(&mut ctx, MemFence::Local).unwrap();
        assert_eq!(ctx.source(), "barrier(CLK_LOCAL_MEM_FENCE);\n");
    }
}
