//! HZ buffer builder.
//!
//! Turns row-major [`Patch`]es into per-level buffers ordered along the
//! hierarchical Z curve, and back.

pub mod buffer;
pub mod decode;
pub mod patch;

pub use buffer::{CompactedRange, HzBuffer, HzBufferState, LevelBuffer, populate_group};
pub use patch::Patch;
