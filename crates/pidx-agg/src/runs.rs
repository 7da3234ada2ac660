//! Extraction of contiguous HZ runs from level buffers.

use pidx_blocks::BlockLayout;
use pidx_encode::{HzBuffer, LevelBuffer};
use pidx_error::{PidxError, Result};
use pidx_types::LayoutPolicy;

/// Consecutive HZ samples of one level that are transferred together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub level: u32,
    pub hz_start: u64,
    pub count: u64,
    /// Byte offset of `hz_start` inside the level buffer.
    pub src_offset: usize,
}

/// Runs of every populated level of `buffer`, coarsest level first.
pub fn extract_runs(
    buffer: &HzBuffer,
    layout: &BlockLayout,
    policy: LayoutPolicy,
) -> Result<Vec<Run>> {
    let bps = buffer.datatype().bytes_per_sample();
    let mut runs = Vec::new();
    for level in buffer.levels() {
        match policy {
            LayoutPolicy::Dense => dense_runs(level, layout, bps, &mut runs)?,
            LayoutPolicy::BlockAware | LayoutPolicy::Flattened => {
                block_aware_runs(level, layout, bps, &mut runs)?;
            }
        }
    }
    Ok(runs)
}

/// The whole level extent, split at file boundaries.
fn dense_runs(
    level: &LevelBuffer,
    layout: &BlockLayout,
    bps: usize,
    runs: &mut Vec<Run>,
) -> Result<()> {
    if !level.is_curve_contiguous() || !level.missing_blocks().is_empty() {
        return Err(PidxError::inconsistent(format!(
            "dense layout needs a hole-free level {}: {} of {} samples, {} absent blocks",
            level.level(),
            level.sample_count(),
            level.extent_len(),
            level.missing_blocks().len()
        )));
    }
    let spf = layout.samples_per_file();
    let mut hz = level.start_hz();
    while hz <= level.end_hz() {
        let file_last = (layout.file_of(hz) + 1) * spf - 1;
        let last = level.end_hz().min(file_last);
        runs.push(Run {
            level: level.level(),
            hz_start: hz,
            count: last - hz + 1,
            src_offset: (hz - level.start_hz()) as usize * bps,
        });
        hz = last + 1;
    }
    Ok(())
}

/// Maximal runs of consecutive populated HZ indices that stay inside one
/// file and never step into an absent block.
fn block_aware_runs(
    level: &LevelBuffer,
    layout: &BlockLayout,
    bps: usize,
    runs: &mut Vec<Run>,
) -> Result<()> {
    let index = level.hz_index();
    let mut i = 0;
    while i < index.len() {
        let start = index[i];
        let file = layout.file_of(start);
        let mut j = i + 1;
        while j < index.len() {
            let hz = index[j];
            let continues = hz == index[j - 1] + 1
                && layout.file_of(hz) == file
                && (layout.block_of(hz) == layout.block_of(hz - 1)
                    || (layout.block_present(layout.block_of(hz))
                        && layout.block_present(layout.block_of(hz - 1))));
            if !continues {
                break;
            }
            j += 1;
        }
        let src_offset = level.sample_offset(start, bps).ok_or_else(|| {
            PidxError::internal(format!("indexed hz {start} has no byte offset"))
        })?;
        runs.push(Run {
            level: level.level(),
            hz_start: start,
            count: (j - i) as u64,
            src_offset,
        });
        i = j;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pidx_encode::Patch;
    use pidx_types::{BitPattern, DataType, DatasetConfig, GridBox};

    use super::*;

    fn config(bits_per_block: u32, blocks_per_file: u64) -> DatasetConfig {
        DatasetConfig {
            bits_per_block,
            blocks_per_file,
            ..DatasetConfig::default()
        }
    }

    fn encoded(pattern: &BitPattern, region: GridBox, layout: &BlockLayout) -> HzBuffer {
        let patch = Patch::zeroed(region, DataType::FLOAT32).expect("patch");
        let mut buffer = HzBuffer::new(pattern.clone(), DataType::FLOAT32);
        buffer.allocate(region, layout).expect("allocate");
        buffer.populate(&patch).expect("populate");
        buffer
    }

    #[test]
    fn test_dense_full_domain_splits_at_files() {
        let pattern = BitPattern::parse("V012012").expect("pattern");
        let layout = BlockLayout::from_present_blocks(&config(2, 4), 6, 0..16).expect("layout");
        let buffer = encoded(&pattern, GridBox::from_dims(pattern.domain()), &layout);
        let runs = extract_runs(&buffer, &layout, LayoutPolicy::Dense).expect("runs");
        // Levels 0..=4 fit in file 0, level 5 fills file 1, level 6 spans 2 and 3.
        let level6: Vec<(u64, u64)> = runs
            .iter()
            .filter(|r| r.level == 6)
            .map(|r| (r.hz_start, r.count))
            .collect();
        assert_eq!(level6, vec![(32, 16), (48, 16)]);
        assert_eq!(runs.iter().map(|r| r.count).sum::<u64>(), 64);
    }

    #[test]
    fn test_dense_rejects_holes() {
        let pattern = BitPattern::parse("V012012").expect("pattern");
        let layout = BlockLayout::from_present_blocks(&config(2, 4), 6, 0..16).expect("layout");
        // An x line of four samples puts hz 8 and 12 on level 4.
        let region = GridBox::from_offset_size([0; 5], [4, 1, 1, 1, 1]);
        let buffer = encoded(&pattern, region, &layout);
        assert!(matches!(
            extract_runs(&buffer, &layout, LayoutPolicy::Dense),
            Err(PidxError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_block_aware_runs_skip_absent_block() {
        // 1-D curve of 1024 samples, 128 per block; block 5 covers hz 640..=767.
        let pattern = BitPattern::parse("V0000000000").expect("pattern");
        let present = (0..8).filter(|&b| b != 5);
        let layout = BlockLayout::from_present_blocks(&config(7, 8), 10, present).expect("layout");
        let mut buffer = encoded(&pattern, GridBox::from_dims(pattern.domain()), &layout);
        buffer.compact().expect("compact");

        let runs = extract_runs(&buffer, &layout, LayoutPolicy::BlockAware).expect("runs");
        let finest: Vec<(u64, u64, usize)> = runs
            .iter()
            .filter(|r| r.level == 10)
            .map(|r| (r.hz_start, r.count, r.src_offset))
            .collect();
        assert_eq!(finest, vec![(512, 128, 0), (768, 256, 128 * 4)]);
        assert!(runs.iter().all(|r| r.hz_start + r.count <= 640 || r.hz_start >= 768));
        assert_eq!(runs.iter().map(|r| r.count).sum::<u64>(), 1024 - 128);
    }

    #[test]
    fn test_uncompacted_samples_in_absent_block_start_a_new_run() {
        let pattern = BitPattern::parse("V0000000000").expect("pattern");
        let present = (0..8).filter(|&b| b != 5);
        let layout = BlockLayout::from_present_blocks(&config(7, 8), 10, present).expect("layout");
        let buffer = encoded(&pattern, GridBox::from_dims(pattern.domain()), &layout);
        let runs = extract_runs(&buffer, &layout, LayoutPolicy::Flattened).expect("runs");
        let finest: Vec<(u64, u64)> = runs
            .iter()
            .filter(|r| r.level == 10)
            .map(|r| (r.hz_start, r.count))
            .collect();
        assert_eq!(finest, vec![(512, 128), (640, 128), (768, 256)]);
    }
}
