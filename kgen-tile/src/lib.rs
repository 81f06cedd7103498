//! Private-memory tiles for generated BLAS kernels.
//!
//! # Core Types
//!
//! - [`DataType`]: BLAS element types and their OpenCL spellings
//! - [`Tile`]: shape and layout of a block held in private memory, rendering
//!   element expressions and whole-tile statements
//! - [`PhysTileIterator`]: vector-by-vector cursor over a tile's storage
//!
//! The [`expr`] module holds the arithmetic expression builders shared by the
//! kernel generators.

pub mod dtype;
pub mod error;
pub mod expr;
pub mod iter;
pub mod tile;

pub use dtype::DataType;
pub use error::{Result, TileError};
pub use expr::{complex_mul_update, fast_scalar_mad, real_mul_update, MulCore};
pub use iter::{PhysTileIterator, TileIterFlags};
pub use tile::{ElementHalf, PrivateStorage, Tile, TileCopyOp, MAX_TILE_VECLEN};
