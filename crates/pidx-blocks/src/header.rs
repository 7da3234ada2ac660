//! Binary data-file header.
//!
//! Each data file starts with a table of 32-bit big-endian words: a
//! ten-word preamble followed by one ten-word record per (variable, block)
//! pair. Record `k = block + blocks_per_file * variable` stores the payload
//! byte offset at word `12 + 10k` and the byte length at word `14 + 10k`;
//! all other words are zero. Payload starts after the header rounded up to
//! the storage block size.

use pidx_error::{PidxError, Result};
use pidx_types::DataType;

use crate::layout::BlockLayout;

/// Words preceding the first block record.
pub const PREAMBLE_WORDS: u64 = 10;

/// Words per (variable, block) record.
pub const RECORD_WORDS: u64 = 10;

const OFFSET_WORD: u64 = 2;
const LENGTH_WORD: u64 = 4;

/// Unpadded header size in bytes.
#[must_use]
pub const fn raw_header_size(blocks_per_file: u64, variable_count: u64) -> u64 {
    (PREAMBLE_WORDS + RECORD_WORDS * blocks_per_file) * 4 * variable_count
}

/// Header size rounded up to a whole number of storage blocks.
#[must_use]
pub const fn header_size(blocks_per_file: u64, variable_count: u64, fs_block_size: u64) -> u64 {
    raw_header_size(blocks_per_file, variable_count).div_ceil(fs_block_size) * fs_block_size
}

/// Location of one block's payload inside its data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockEntry {
    pub offset: u32,
    pub length: u32,
}

/// In-memory form of a data-file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    blocks_per_file: u64,
    variable_count: u64,
    words: Vec<u32>,
}

impl FileHeader {
    /// All-zero header.
    #[must_use]
    pub fn new(blocks_per_file: u64, variable_count: u64) -> Self {
        let words = raw_header_size(blocks_per_file, variable_count) / 4;
        Self {
            blocks_per_file,
            variable_count,
            words: vec![0; words as usize],
        }
    }

    /// Header describing `file` with payload blocks packed per variable, in
    /// block order, absent blocks skipped.
    pub fn for_file(
        layout: &BlockLayout,
        file: u64,
        variables: &[DataType],
        fs_block_size: u64,
    ) -> Result<Self> {
        let bpf = layout.blocks_per_file();
        let spb = layout.samples_per_block();
        let present = layout.block_count_in_file(file)?;
        let mut header = Self::new(bpf, variables.len() as u64);
        let data_start = header_size(bpf, variables.len() as u64, fs_block_size);

        let mut variable_base = data_start;
        for (var, datatype) in variables.iter().enumerate() {
            let block_bytes = spb * datatype.bytes_per_sample() as u64;
            for block in layout.present_blocks_in_file(file) {
                let local = block % bpf;
                let dense = local - layout.negative_offset(block)?;
                let offset = variable_base + dense * block_bytes;
                header.set_entry(
                    local,
                    var as u64,
                    BlockEntry {
                        offset: to_word("block payload offset", offset)?,
                        length: to_word("block payload length", block_bytes)?,
                    },
                )?;
            }
            variable_base += present * block_bytes;
        }
        Ok(header)
    }

    fn record_base(&self, block: u64, variable: u64) -> Result<usize> {
        if block >= self.blocks_per_file || variable >= self.variable_count {
            return Err(PidxError::out_of_range(
                "header record",
                format!("block {block} variable {variable}"),
            ));
        }
        Ok((PREAMBLE_WORDS + RECORD_WORDS * (block + self.blocks_per_file * variable)) as usize)
    }

    pub fn set_entry(&mut self, block: u64, variable: u64, entry: BlockEntry) -> Result<()> {
        let base = self.record_base(block, variable)?;
        self.words[base + OFFSET_WORD as usize] = entry.offset;
        self.words[base + LENGTH_WORD as usize] = entry.length;
        Ok(())
    }

    pub fn entry(&self, block: u64, variable: u64) -> Result<BlockEntry> {
        let base = self.record_base(block, variable)?;
        Ok(BlockEntry {
            offset: self.words[base + OFFSET_WORD as usize],
            length: self.words[base + LENGTH_WORD as usize],
        })
    }

    /// Big-endian serialization, unpadded.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    /// Parse a header previously produced by [`FileHeader::encode`]. Trailing
    /// padding is ignored.
    pub fn decode(bytes: &[u8], blocks_per_file: u64, variable_count: u64) -> Result<Self> {
        let expected = raw_header_size(blocks_per_file, variable_count) as usize;
        if bytes.len() < expected {
            return Err(PidxError::inconsistent(format!(
                "header too short: expected {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let words = bytes[..expected]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            blocks_per_file,
            variable_count,
            words,
        })
    }
}

fn to_word(what: &str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| PidxError::out_of_range(what, value))
}
