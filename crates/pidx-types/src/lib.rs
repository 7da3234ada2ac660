//! Core type definitions for the PIDX pipeline.

pub mod bit_pattern;
pub mod config;
pub mod datatype;
pub mod geometry;

pub use bit_pattern::{AxisPriority, BitPattern, MAX_LEVELS};
pub use config::{
    DEFAULT_BITS_PER_BLOCK, DEFAULT_BLOCKS_PER_FILE, DEFAULT_FS_BLOCK_SIZE, DatasetConfig,
    LayoutPolicy,
};
pub use datatype::DataType;
pub use geometry::{BoxPoints, Coord, GridBox, MAX_DIMENSIONS};
