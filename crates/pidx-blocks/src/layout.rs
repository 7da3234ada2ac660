//! Sample -> (file, block) mapping and block presence.
//!
//! Block 0 holds levels `0..=bits_per_block`; every later block lies inside a
//! single resolution level. A block is *present* when at least one rank holds
//! data that lands in it. Absent blocks occupy no bytes on disk, so the dense
//! position of a present block inside its file is its file-local index minus
//! the number of absent blocks before it (the *negative offset*).

use pidx_error::{PidxError, Result};
use pidx_hz::{curve_extent_at_level, hz_to_coord};
use pidx_types::{BitPattern, Coord, DatasetConfig, GridBox, MAX_DIMENSIONS};
use tracing::debug;

/// Immutable-per-round block presence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    bits_per_block: u32,
    blocks_per_file: u64,
    max_level: u32,
    present: Vec<bool>,
    /// For each block, number of present blocks before it in the same file.
    present_before: Vec<u64>,
    block_count_per_file: Vec<u64>,
    existing_files: Vec<u64>,
    file_ordinal: Vec<Option<usize>>,
}

impl BlockLayout {
    /// Layout with every block absent.
    pub fn empty(config: &DatasetConfig, max_level: u32) -> Result<Self> {
        config.validate()?;
        let total_blocks = if max_level > config.bits_per_block {
            1_u64 << (max_level - config.bits_per_block)
        } else {
            1
        };
        let file_count = total_blocks.div_ceil(config.blocks_per_file);
        let mut layout = Self {
            bits_per_block: config.bits_per_block,
            blocks_per_file: config.blocks_per_file,
            max_level,
            present: vec![false; total_blocks as usize],
            present_before: vec![0; total_blocks as usize],
            block_count_per_file: vec![0; file_count as usize],
            existing_files: Vec::new(),
            file_ordinal: vec![None; file_count as usize],
        };
        layout.reindex();
        Ok(layout)
    }

    /// Layout with exactly the listed blocks present.
    pub fn from_present_blocks(
        config: &DatasetConfig,
        max_level: u32,
        blocks: impl IntoIterator<Item = u64>,
    ) -> Result<Self> {
        let mut layout = Self::empty(config, max_level)?;
        for block in blocks {
            let slot = layout
                .present
                .get_mut(block as usize)
                .ok_or_else(|| PidxError::out_of_range("block number", block))?;
            *slot = true;
        }
        layout.reindex();
        Ok(layout)
    }

    /// Mark every block whose samples may intersect `bounds`.
    ///
    /// A block's coordinate extent is taken from its first and last HZ
    /// index, which are the lattice corners of an aligned run.
    pub fn from_bounds(
        pattern: &BitPattern,
        config: &DatasetConfig,
        bounds: &GridBox,
    ) -> Result<Self> {
        bounds.validate()?;
        let mut layout = Self::empty(config, pattern.max_level())?;
        let spb = layout.samples_per_block();

        let first_levels = config.bits_per_block.min(pattern.max_level());
        for level in 0..=first_levels {
            let (from, to) = curve_extent_at_level(pattern, level)?;
            if extent_intersects(pattern, from, to, bounds)? {
                layout.present[0] = true;
                break;
            }
        }
        for block in 1..layout.total_blocks() {
            let from = block * spb;
            let to = from + spb - 1;
            if extent_intersects(pattern, from, to, bounds)? {
                layout.present[block as usize] = true;
            }
        }
        layout.reindex();
        debug!(
            blocks = layout.total_blocks(),
            present = layout.present_block_count(),
            files = layout.existing_files.len(),
            "block layout built from bounds"
        );
        Ok(layout)
    }

    /// Combine two layouts of the same geometry; a block is present if it
    /// is present in either.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.bits_per_block != other.bits_per_block
            || self.blocks_per_file != other.blocks_per_file
            || self.max_level != other.max_level
        {
            return Err(PidxError::inconsistent(
                "cannot merge block layouts with different geometry",
            ));
        }
        let mut merged = self.clone();
        for (dst, &src) in merged.present.iter_mut().zip(&other.present) {
            *dst |= src;
        }
        merged.reindex();
        Ok(merged)
    }

    fn reindex(&mut self) {
        let bpf = self.blocks_per_file as usize;
        self.block_count_per_file.iter_mut().for_each(|c| *c = 0);
        for (file, chunk) in self.present.chunks(bpf).enumerate() {
            let mut before = 0_u64;
            for (i, &present) in chunk.iter().enumerate() {
                self.present_before[file * bpf + i] = before;
                if present {
                    before += 1;
                }
            }
            self.block_count_per_file[file] = before;
        }
        self.existing_files.clear();
        for (file, ordinal) in self.file_ordinal.iter_mut().enumerate() {
            if self.block_count_per_file[file] > 0 {
                *ordinal = Some(self.existing_files.len());
                self.existing_files.push(file as u64);
            } else {
                *ordinal = None;
            }
        }
    }

    #[must_use]
    pub const fn bits_per_block(&self) -> u32 {
        self.bits_per_block
    }

    #[must_use]
    pub const fn max_level(&self) -> u32 {
        self.max_level
    }

    #[must_use]
    pub const fn blocks_per_file(&self) -> u64 {
        self.blocks_per_file
    }

    #[must_use]
    pub const fn samples_per_block(&self) -> u64 {
        1_u64 << self.bits_per_block
    }

    /// Capacity of one file in samples.
    #[must_use]
    pub const fn samples_per_file(&self) -> u64 {
        self.samples_per_block() * self.blocks_per_file
    }

    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.present.len() as u64
    }

    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.block_count_per_file.len() as u64
    }

    #[must_use]
    pub fn present_block_count(&self) -> u64 {
        self.block_count_per_file.iter().sum()
    }

    /// Block holding HZ index `hz`.
    #[must_use]
    pub const fn block_of(&self, hz: u64) -> u64 {
        hz >> self.bits_per_block
    }

    /// File holding HZ index `hz`.
    #[must_use]
    pub const fn file_of(&self, hz: u64) -> u64 {
        hz / self.samples_per_file()
    }

    /// File holding global block `block`.
    #[must_use]
    pub const fn file_of_block(&self, block: u64) -> u64 {
        block / self.blocks_per_file
    }

    /// Single bitmap lookup; out-of-range blocks are absent.
    #[must_use]
    pub fn block_present(&self, block: u64) -> bool {
        self.present.get(block as usize).copied().unwrap_or(false)
    }

    /// Number of absent blocks preceding `block` inside its file.
    pub fn negative_offset(&self, block: u64) -> Result<u64> {
        if !self.block_present(block) {
            return Err(PidxError::AbsentBlock { block });
        }
        let local = block % self.blocks_per_file;
        Ok(local - self.present_before[block as usize])
    }

    /// Present blocks in `file`.
    pub fn block_count_in_file(&self, file: u64) -> Result<u64> {
        self.block_count_per_file
            .get(file as usize)
            .copied()
            .ok_or_else(|| PidxError::out_of_range("file number", file))
    }

    /// Samples stored in `file` once absent blocks are squeezed out.
    pub fn samples_in_file(&self, file: u64) -> Result<u64> {
        let samples = self.block_count_in_file(file)? * self.samples_per_block();
        let capacity = self.samples_per_file();
        if samples > capacity {
            return Err(PidxError::FileCapacityExceeded {
                file,
                samples,
                capacity,
            });
        }
        Ok(samples)
    }

    /// Files holding at least one present block, ascending.
    #[must_use]
    pub fn existing_files(&self) -> &[u64] {
        &self.existing_files
    }

    /// Position of `file` in [`BlockLayout::existing_files`].
    #[must_use]
    pub fn existing_file_ordinal(&self, file: u64) -> Option<usize> {
        self.file_ordinal.get(file as usize).copied().flatten()
    }

    /// Present blocks of `file`, ascending by global block number.
    pub fn present_blocks_in_file(&self, file: u64) -> impl Iterator<Item = u64> + '_ {
        let first = file * self.blocks_per_file;
        let last = (first + self.blocks_per_file).min(self.total_blocks());
        (first..last).filter(|&b| self.block_present(b))
    }

    /// Absent blocks overlapping the inclusive HZ range.
    #[must_use]
    pub fn missing_blocks_in(&self, hz_start: u64, hz_end: u64) -> Vec<u64> {
        if hz_start > hz_end {
            return Vec::new();
        }
        (self.block_of(hz_start)..=self.block_of(hz_end))
            .filter(|&b| !self.block_present(b))
            .collect()
    }
}

fn extent_intersects(pattern: &BitPattern, from: u64, to: u64, bounds: &GridBox) -> Result<bool> {
    let lo: Coord = hz_to_coord(pattern, from)?;
    let hi: Coord = hz_to_coord(pattern, to)?;
    Ok((0..MAX_DIMENSIONS)
        .all(|d| hi[d] as i64 >= bounds.lower[d] && lo[d] as i64 <= bounds.upper[d]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(bits_per_block: u32, blocks_per_file: u64) -> DatasetConfig {
        DatasetConfig {
            bits_per_block,
            blocks_per_file,
            ..DatasetConfig::default()
        }
    }

    #[test]
    fn test_sample_to_block_and_file() {
        let layout = BlockLayout::empty(&config(8, 4), 12).expect("layout");
        assert_eq!(layout.samples_per_block(), 256);
        assert_eq!(layout.total_blocks(), 16);
        assert_eq!(layout.file_count(), 4);
        assert_eq!(layout.block_of(255), 0);
        assert_eq!(layout.block_of(256), 1);
        assert_eq!(layout.file_of(1023), 0);
        assert_eq!(layout.file_of(1024), 1);
    }

    #[test]
    fn test_negative_offset_counts_absent_predecessors() {
        let layout =
            BlockLayout::from_present_blocks(&config(8, 4), 12, [0, 2, 3, 5, 7]).expect("layout");
        assert_eq!(layout.negative_offset(0).expect("present"), 0);
        assert_eq!(layout.negative_offset(2).expect("present"), 1);
        assert_eq!(layout.negative_offset(3).expect("present"), 1);
        // File 1 starts at block 4, which is absent.
        assert_eq!(layout.negative_offset(5).expect("present"), 1);
        assert_eq!(layout.negative_offset(7).expect("present"), 2);
        assert!(matches!(
            layout.negative_offset(1),
            Err(PidxError::AbsentBlock { block: 1 })
        ));
    }

    #[test]
    fn test_samples_in_file_and_existing_files() {
        let layout =
            BlockLayout::from_present_blocks(&config(8, 4), 12, [0, 2, 3, 13]).expect("layout");
        assert_eq!(layout.samples_in_file(0).expect("file"), 768);
        assert_eq!(layout.samples_in_file(1).expect("file"), 0);
        assert_eq!(layout.existing_files(), &[0, 3]);
        assert_eq!(layout.existing_file_ordinal(3), Some(1));
        assert_eq!(layout.existing_file_ordinal(1), None);
        assert!(layout.samples_in_file(9).is_err());
        assert_eq!(layout.present_blocks_in_file(0).collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn test_missing_blocks_in_range() {
        let layout =
            BlockLayout::from_present_blocks(&config(8, 4), 12, [0, 2, 3]).expect("layout");
        assert_eq!(layout.missing_blocks_in(100, 699), vec![1]);
        assert_eq!(layout.missing_blocks_in(512, 1023), Vec::<u64>::new());
        assert!(layout.missing_blocks_in(5, 4).is_empty());
    }

    #[test]
    fn test_block_index_out_of_range_is_rejected() {
        assert!(BlockLayout::from_present_blocks(&config(8, 4), 12, [16]).is_err());
    }

    #[test]
    fn test_from_bounds_full_domain_marks_everything() {
        let pattern = BitPattern::parse("V012012012").expect("pattern");
        let bounds = GridBox::from_dims(pattern.domain());
        let layout = BlockLayout::from_bounds(&pattern, &config(4, 4), &bounds).expect("layout");
        assert_eq!(layout.total_blocks(), 32);
        assert_eq!(layout.present_block_count(), 32);
    }

    #[test]
    fn test_from_bounds_corner_region_skips_far_blocks() {
        let pattern = BitPattern::parse("V012012012").expect("pattern");
        let corner = GridBox::from_offset_size([0; 5], [2, 2, 2, 1, 1]);
        let layout = BlockLayout::from_bounds(&pattern, &config(4, 4), &corner).expect("layout");
        assert!(layout.block_present(0));
        assert!(layout.present_block_count() < layout.total_blocks());
        // Every sample of the corner must land in a present block.
        for coord in corner.points() {
            let hz = pidx_hz::coord_to_hz(&pattern, &coord).expect("in domain");
            assert!(layout.block_present(layout.block_of(hz)), "hz {hz} in absent block");
        }
    }

    #[test]
    fn test_union_merges_presence() {
        let cfg = config(8, 4);
        let a = BlockLayout::from_present_blocks(&cfg, 12, [0, 5]).expect("layout");
        let b = BlockLayout::from_present_blocks(&cfg, 12, [1, 5, 9]).expect("layout");
        let merged = a.union(&b).expect("same geometry");
        assert_eq!(merged.present_block_count(), 4);
        assert_eq!(merged.existing_files(), &[0, 1, 2]);
        let other = BlockLayout::empty(&config(9, 4), 12).expect("layout");
        assert!(a.union(&other).is_err());
    }

    #[test]
    fn test_small_domain_has_single_block() {
        let layout = BlockLayout::empty(&config(15, 256), 6).expect("layout");
        assert_eq!(layout.total_blocks(), 1);
        assert_eq!(layout.file_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_negative_offset_difference_counts_gaps(mask in proptest::collection::vec(any::<bool>(), 16)) {
            let cfg = config(8, 16);
            let blocks: Vec<u64> = mask.iter().enumerate().filter(|(_, p)| **p).map(|(i, _)| i as u64).collect();
            let layout = BlockLayout::from_present_blocks(&cfg, 12, blocks.iter().copied()).expect("layout");
            for (i, &b1) in blocks.iter().enumerate() {
                for &b2 in &blocks[i + 1..] {
                    let gaps = ((b1 + 1)..b2).filter(|&b| !layout.block_present(b)).count() as u64;
                    let n1 = layout.negative_offset(b1).expect("present");
                    let n2 = layout.negative_offset(b2).expect("present");
                    prop_assert_eq!(n2 - n1, gaps);
                }
            }
        }
    }
}
