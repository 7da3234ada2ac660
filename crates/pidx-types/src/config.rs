//! Dataset-level configuration.

use pidx_error::{PidxError, Result};
use serde::{Deserialize, Serialize};

/// Default log2 of samples per block.
pub const DEFAULT_BITS_PER_BLOCK: u32 = 15;

/// Default number of blocks grouped into one file.
pub const DEFAULT_BLOCKS_PER_FILE: u64 = 256;

/// Default storage block size used to pad file headers.
pub const DEFAULT_FS_BLOCK_SIZE: u64 = 4096;

/// Which levels/blocks the aggregation engine scans and how it ships them.
///
/// The policies are alternatives selected per round and never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPolicy {
    /// Every populated level is sent as one contiguous run. Only valid for
    /// patches that are contiguous along the curve and touch no absent block.
    Dense,
    /// Only populated samples in present blocks are visited; absent blocks
    /// are skipped through the negative offset.
    #[default]
    BlockAware,
    /// Block-aware runs of all levels are gathered into one buffer and moved
    /// with a single indexed operation per destination rank.
    Flattened,
}

impl LayoutPolicy {
    /// Stable label used in logs and diagnostics events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::BlockAware => "block_aware",
            Self::Flattened => "flattened",
        }
    }
}

/// Parameters fixed for a dataset and identical on every rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// log2 of the number of samples in a block.
    pub bits_per_block: u32,
    /// Blocks per file.
    pub blocks_per_file: u64,
    /// Number of sample-slots each (file, value component) is split into.
    pub aggregation_factor: u32,
    /// Transfer strategy.
    pub layout_policy: LayoutPolicy,
    /// Byte-swap payloads on their way to or from disk.
    pub flip_endian: bool,
    /// Storage block size; file headers are padded to a multiple of it.
    pub fs_block_size: u64,
    /// Optional printf-style file name template (`%0Nx` placeholders).
    pub filename_template: Option<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            bits_per_block: DEFAULT_BITS_PER_BLOCK,
            blocks_per_file: DEFAULT_BLOCKS_PER_FILE,
            aggregation_factor: 1,
            layout_policy: LayoutPolicy::default(),
            flip_endian: false,
            fs_block_size: DEFAULT_FS_BLOCK_SIZE,
            filename_template: None,
        }
    }
}

impl DatasetConfig {
    /// Samples in one block.
    #[must_use]
    pub const fn samples_per_block(&self) -> u64 {
        1_u64 << self.bits_per_block
    }

    /// Samples one file can hold when every block is present.
    #[must_use]
    pub const fn samples_per_file(&self) -> u64 {
        self.samples_per_block() * self.blocks_per_file
    }

    /// Reject parameter combinations the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.bits_per_block >= 48 {
            return Err(PidxError::out_of_range("bits_per_block", self.bits_per_block));
        }
        if self.blocks_per_file == 0 {
            return Err(PidxError::out_of_range("blocks_per_file", 0));
        }
        if self.aggregation_factor == 0 {
            return Err(PidxError::out_of_range("aggregation_factor", 0));
        }
        if self.samples_per_block() % u64::from(self.aggregation_factor) != 0 {
            return Err(PidxError::precondition(format!(
                "aggregation_factor {} must divide samples_per_block {}",
                self.aggregation_factor,
                self.samples_per_block()
            )));
        }
        if self.fs_block_size == 0 {
            return Err(PidxError::out_of_range("fs_block_size", 0));
        }
        Ok(())
    }
}
