//! Dataset-wide helpers: layout agreement, file naming, file images.

use pidx_agg::{AggregatedSlot, AggregationConfig};
use pidx_blocks::{BlockLayout, FileHeader, default_template, generate_file_name, header_size};
use pidx_error::{PidxError, Result};
use pidx_types::{BitPattern, DatasetConfig, GridBox};
use tracing::debug;

/// Block layout covering every region written in a round.
///
/// Each rank derives the same layout from the same region list, so the
/// result needs no further exchange.
pub fn agree_layout(
    pattern: &BitPattern,
    dataset: &DatasetConfig,
    regions: &[GridBox],
) -> Result<BlockLayout> {
    let mut layout = BlockLayout::empty(dataset, pattern.max_level())?;
    for region in regions {
        layout = layout.union(&BlockLayout::from_bounds(pattern, dataset, region)?)?;
    }
    debug!(
        regions = regions.len(),
        present = layout.present_block_count(),
        files = layout.existing_files().len(),
        "block layout agreed"
    );
    Ok(layout)
}

/// Path of data file `file`, from the configured template or the default
/// one derived from `idx_path`.
pub fn data_file_name(
    dataset: &DatasetConfig,
    idx_path: &str,
    max_level: u32,
    file: u64,
) -> Result<String> {
    match &dataset.filename_template {
        Some(template) => generate_file_name(dataset.blocks_per_file, template, file),
        None => generate_file_name(
            dataset.blocks_per_file,
            &default_template(idx_path, max_level, dataset.bits_per_block),
            file,
        ),
    }
}

/// Complete image of data file `file`: padded header, then each
/// variable's slots in slot order.
///
/// `slots` may hold slots of other files; all slots of `file` must be
/// present.
pub fn assemble_file(
    layout: &BlockLayout,
    config: &AggregationConfig,
    file: u64,
    slots: &[AggregatedSlot],
) -> Result<Vec<u8>> {
    let dataset = &config.dataset;
    let header = FileHeader::for_file(layout, file, &config.datatypes, dataset.fs_block_size)?;
    let data_start = header_size(
        dataset.blocks_per_file,
        config.variable_count() as u64,
        dataset.fs_block_size,
    ) as usize;
    let samples = layout.samples_in_file(file)? as usize;

    let mut image = header.encode();
    image.resize(data_start, 0);
    for (variable, datatype) in config.datatypes.iter().enumerate() {
        let mut parts: Vec<&AggregatedSlot> = slots
            .iter()
            .filter(|s| s.file == file && s.variable == variable)
            .collect();
        parts.sort_by_key(|s| s.slot);
        let expected = samples * datatype.bytes_per_sample();
        let got: usize = parts.iter().map(|s| s.bytes.len()).sum();
        if got != expected || parts.iter().enumerate().any(|(i, s)| s.slot != i) {
            return Err(PidxError::inconsistent(format!(
                "file {file} variable {variable}: {} slots with {got} bytes, expected {expected}",
                parts.len()
            )));
        }
        for part in parts {
            image.extend_from_slice(&part.bytes);
        }
    }
    Ok(image)
}
