//! Per-level HZ buffers and their lifecycle.
//!
//! A buffer starts [`HzBufferState::Unallocated`]. `allocate` aligns the
//! patch region to every resolution level and reserves one byte buffer per
//! level, dense over that level's HZ extent `[start_hz, end_hz]`. Writers
//! then `populate` it from a [`Patch`]; readers call `prepare_receive`, let
//! the aggregation engine fill the bytes, and `mark_received`. `compact`
//! squeezes out blocks that are absent from the agreed layout.
//!
//! Inside a level, sample `hz` lives at byte `(hz - start_hz) * bps` until
//! compaction; afterwards [`LevelBuffer::sample_offset`] accounts for the
//! removed ranges.

use std::fmt;

use pidx_blocks::BlockLayout;
use pidx_error::{PidxError, Result};
use pidx_hz::{align, coord_to_hz, level_of};
use pidx_types::{BitPattern, DataType, GridBox};
use tracing::{debug, debug_span, warn};

use crate::patch::Patch;

/// Where an [`HzBuffer`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HzBufferState {
    Unallocated,
    LevelBuffersAllocated,
    /// Read path: index known, bytes still to arrive.
    AwaitingData,
    Populated,
    Compacted,
}

impl HzBufferState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::LevelBuffersAllocated => "level_buffers_allocated",
            Self::AwaitingData => "awaiting_data",
            Self::Populated => "populated",
            Self::Compacted => "compacted",
        }
    }
}

impl fmt::Display for HzBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive HZ range cut out of a level buffer by compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactedRange {
    pub block: u64,
    pub first_hz: u64,
    pub last_hz: u64,
}

impl CompactedRange {
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.last_hz - self.first_hz + 1
    }

    #[must_use]
    pub const fn contains(&self, hz: u64) -> bool {
        hz >= self.first_hz && hz <= self.last_hz
    }
}

/// Samples of one resolution level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelBuffer {
    level: u32,
    start_hz: u64,
    end_hz: u64,
    expected_samples: u64,
    data: Vec<u8>,
    hz_index: Vec<u64>,
    missing_blocks: Vec<u64>,
    compacted: Vec<CompactedRange>,
}

impl LevelBuffer {
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub const fn start_hz(&self) -> u64 {
        self.start_hz
    }

    #[must_use]
    pub const fn end_hz(&self) -> u64 {
        self.end_hz
    }

    /// Width of the HZ extent, holes included.
    #[must_use]
    pub const fn extent_len(&self) -> u64 {
        self.end_hz - self.start_hz + 1
    }

    /// Populated samples of this level.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.hz_index.len() as u64
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Populated HZ indices, ascending.
    #[must_use]
    pub fn hz_index(&self) -> &[u64] {
        &self.hz_index
    }

    /// Absent blocks overlapping the extent that have not been compacted.
    #[must_use]
    pub fn missing_blocks(&self) -> &[u64] {
        &self.missing_blocks
    }

    #[must_use]
    pub fn compacted(&self) -> &[CompactedRange] {
        &self.compacted
    }

    /// Every HZ index of the extent is populated and nothing was cut.
    #[must_use]
    pub fn is_curve_contiguous(&self) -> bool {
        self.compacted.is_empty() && self.sample_count() == self.extent_len()
    }

    /// Byte offset of sample `hz`, or `None` if it lies outside the extent
    /// or inside a compacted range.
    #[must_use]
    pub fn sample_offset(&self, hz: u64, bytes_per_sample: usize) -> Option<usize> {
        if hz < self.start_hz || hz > self.end_hz {
            return None;
        }
        let mut removed = 0_u64;
        for range in &self.compacted {
            if range.contains(hz) {
                return None;
            }
            if range.last_hz < hz {
                removed += range.samples();
            } else {
                break;
            }
        }
        Some((hz - self.start_hz - removed) as usize * bytes_per_sample)
    }

    /// Returns (bytes removed, samples dropped).
    fn compact(&mut self, samples_per_block: u64, bytes_per_sample: usize) -> (usize, usize) {
        if self.missing_blocks.is_empty() {
            return (0, 0);
        }
        let bytes_before = self.data.len();
        let mut removed = self
            .compacted
            .iter()
            .map(CompactedRange::samples)
            .sum::<u64>();
        for block in std::mem::take(&mut self.missing_blocks) {
            let first_hz = (block * samples_per_block).max(self.start_hz);
            let last_hz = (block * samples_per_block + samples_per_block - 1).min(self.end_hz);
            if first_hz > last_hz {
                continue;
            }
            let offset = (first_hz - self.start_hz - removed) as usize * bytes_per_sample;
            let len = (last_hz - first_hz + 1) as usize * bytes_per_sample;
            self.data.copy_within(offset + len.., offset);
            self.data.truncate(self.data.len() - len);
            removed += last_hz - first_hz + 1;
            self.compacted.push(CompactedRange {
                block,
                first_hz,
                last_hz,
            });
        }

        let samples_before = self.hz_index.len();
        let compacted = &self.compacted;
        self.hz_index
            .retain(|&hz| !compacted.iter().any(|range| range.contains(hz)));
        (
            bytes_before - self.data.len(),
            samples_before - self.hz_index.len(),
        )
    }
}

/// One variable of one patch, reordered into HZ order level by level.
#[derive(Debug, Clone)]
pub struct HzBuffer {
    pattern: BitPattern,
    datatype: DataType,
    samples_per_block: u64,
    state: HzBufferState,
    region: GridBox,
    levels: Vec<Option<LevelBuffer>>,
}

impl HzBuffer {
    #[must_use]
    pub fn new(pattern: BitPattern, datatype: DataType) -> Self {
        Self {
            pattern,
            datatype,
            samples_per_block: 0,
            state: HzBufferState::Unallocated,
            region: GridBox::EMPTY,
            levels: Vec::new(),
        }
    }

    /// Align `region` to every level and reserve the level buffers.
    pub fn allocate(&mut self, region: GridBox, layout: &BlockLayout) -> Result<()> {
        self.expect_state(&[HzBufferState::Unallocated], "allocate")?;
        region.validate()?;
        let max_level = self.pattern.max_level();
        if layout.max_level() != max_level {
            return Err(PidxError::inconsistent(format!(
                "layout built for max_level {} but pattern {} has {max_level}",
                layout.max_level(),
                self.pattern
            )));
        }
        let domain = GridBox::from_dims(self.pattern.domain());
        if !domain.encloses(&region) {
            return Err(PidxError::MalformedBox {
                detail: format!(
                    "region {:?}..{:?} exceeds domain {:?}",
                    region.lower,
                    region.upper,
                    self.pattern.domain()
                ),
            });
        }

        let bps = self.datatype.bytes_per_sample();
        let mut levels = Vec::with_capacity(max_level as usize + 1);
        let mut reserved = 0_usize;
        for level in 0..=max_level {
            let Some(level_box) = align(&self.pattern, &region, level)?.as_level_box().copied()
            else {
                levels.push(None);
                continue;
            };
            let (start_hz, end_hz) = level_box.hz_range(&self.pattern)?;
            let extent = usize::try_from(end_hz - start_hz + 1)
                .map_err(|_| PidxError::out_of_range("level extent", end_hz - start_hz + 1))?;
            let len = extent
                .checked_mul(bps)
                .ok_or_else(|| PidxError::out_of_range("level buffer bytes", extent))?;
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .map_err(|e| PidxError::allocation("hz level buffer", len, e))?;
            data.resize(len, 0);
            let expected_samples = level_box.sample_count();
            let mut hz_index = Vec::new();
            hz_index
                .try_reserve_exact(expected_samples as usize)
                .map_err(|e| PidxError::allocation("hz index", expected_samples as usize * 8, e))?;
            reserved += len;
            levels.push(Some(LevelBuffer {
                level,
                start_hz,
                end_hz,
                expected_samples,
                data,
                hz_index,
                missing_blocks: layout.missing_blocks_in(start_hz, end_hz),
                compacted: Vec::new(),
            }));
        }

        debug!(
            levels = levels.iter().flatten().count(),
            bytes = reserved,
            "hz level buffers allocated"
        );
        self.region = region;
        self.samples_per_block = layout.samples_per_block();
        self.levels = levels;
        self.state = HzBufferState::LevelBuffersAllocated;
        Ok(())
    }

    /// Copy `patch` into the level buffers in ascending HZ order.
    pub fn populate(&mut self, patch: &Patch) -> Result<()> {
        populate_group(std::slice::from_mut(self), &[patch])
    }

    /// Read path: compute the HZ index without data so that the engine can
    /// pull bytes into place.
    pub fn prepare_receive(&mut self) -> Result<()> {
        self.expect_state(&[HzBufferState::LevelBuffersAllocated], "prepare_receive")?;
        let order = sorted_points(&self.pattern, &self.region)?;
        self.fill(&order, None)?;
        self.state = HzBufferState::AwaitingData;
        Ok(())
    }

    /// Read path: the engine has written every populated sample.
    pub fn mark_received(&mut self) -> Result<()> {
        self.expect_state(&[HzBufferState::AwaitingData], "mark_received")?;
        self.state = HzBufferState::Populated;
        Ok(())
    }

    /// Remove the byte ranges of blocks absent from the layout.
    ///
    /// Missing blocks are processed in ascending order; each shifts the
    /// bytes behind it left. A second call finds nothing left to remove.
    /// A buffer awaiting data stays awaiting; the engine then never asks
    /// for samples of absent blocks.
    pub fn compact(&mut self) -> Result<()> {
        self.expect_state(
            &[
                HzBufferState::Populated,
                HzBufferState::Compacted,
                HzBufferState::AwaitingData,
            ],
            "compact",
        )?;
        let receiving = self.state == HzBufferState::AwaitingData;
        let bps = self.datatype.bytes_per_sample();
        let mut removed_bytes = 0_usize;
        let mut dropped = 0_usize;
        for level in self.levels.iter_mut().flatten() {
            let (bytes, samples) = level.compact(self.samples_per_block, bps);
            removed_bytes += bytes;
            dropped += samples;
        }
        if dropped > 0 && !receiving {
            warn!(dropped, "compaction dropped samples that fall in absent blocks");
        }
        debug!(removed_bytes, dropped, "hz buffer compacted");
        if !receiving {
            self.state = HzBufferState::Compacted;
        }
        Ok(())
    }

    /// Release the buffers.
    pub fn destroy(self) {
        debug!(state = %self.state, "hz buffer destroyed");
    }

    #[must_use]
    pub const fn state(&self) -> HzBufferState {
        self.state
    }

    #[must_use]
    pub const fn pattern(&self) -> &BitPattern {
        &self.pattern
    }

    #[must_use]
    pub const fn datatype(&self) -> DataType {
        self.datatype
    }

    /// Region the buffer was allocated for; [`GridBox::EMPTY`] before that.
    #[must_use]
    pub const fn region(&self) -> &GridBox {
        &self.region
    }

    /// Level buffer of `level`, if the region has samples there.
    #[must_use]
    pub fn level(&self, level: u32) -> Option<&LevelBuffer> {
        self.levels.get(level as usize).and_then(Option::as_ref)
    }

    pub fn level_mut(&mut self, level: u32) -> Option<&mut LevelBuffer> {
        self.levels.get_mut(level as usize).and_then(Option::as_mut)
    }

    /// Populated levels, coarsest first.
    pub fn levels(&self) -> impl Iterator<Item = &LevelBuffer> {
        self.levels.iter().flatten()
    }

    pub fn levels_mut(&mut self) -> impl Iterator<Item = &mut LevelBuffer> {
        self.levels.iter_mut().flatten()
    }

    /// Populated sample count per level, indexed by level.
    #[must_use]
    pub fn samples_per_level(&self) -> Vec<u64> {
        self.levels
            .iter()
            .map(|l| l.as_ref().map_or(0, LevelBuffer::sample_count))
            .collect()
    }

    /// Compaction-aware byte offset of `hz` inside its level buffer.
    #[must_use]
    pub fn sample_offset(&self, hz: u64) -> Option<(u32, usize)> {
        let level = level_of(hz);
        let offset = self
            .level(level)?
            .sample_offset(hz, self.datatype.bytes_per_sample())?;
        Some((level, offset))
    }

    pub(crate) fn expect_state(&self, allowed: &[HzBufferState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PidxError::precondition(format!(
                "{op} is not allowed on an hz buffer in state {}",
                self.state
            )))
        }
    }

    fn check_patch(&self, patch: &Patch) -> Result<()> {
        self.expect_state(&[HzBufferState::LevelBuffersAllocated], "populate")?;
        if *patch.region() != self.region {
            return Err(PidxError::precondition(format!(
                "patch region {:?}..{:?} differs from allocated region {:?}..{:?}",
                patch.region().lower,
                patch.region().upper,
                self.region.lower,
                self.region.upper
            )));
        }
        if patch.datatype() != self.datatype {
            return Err(PidxError::precondition(format!(
                "patch datatype {} differs from buffer datatype {}",
                patch.datatype(),
                self.datatype
            )));
        }
        Ok(())
    }

    /// Walk `order` and record each hz; copy sample bytes when a patch is
    /// supplied. On failure the level buffers are left empty.
    fn fill(&mut self, order: &[(u64, u64)], patch: Option<&Patch>) -> Result<()> {
        let filled = self.fill_levels(order, patch);
        if filled.is_err() {
            self.clear_levels();
        }
        filled
    }

    /// Drop every recorded hz and zero the level bytes.
    fn clear_levels(&mut self) {
        for buffer in self.levels.iter_mut().flatten() {
            buffer.hz_index.clear();
            buffer.data.fill(0);
        }
    }

    fn fill_levels(&mut self, order: &[(u64, u64)], patch: Option<&Patch>) -> Result<()> {
        let bps = self.datatype.bytes_per_sample();
        for &(hz, index) in order {
            let level = level_of(hz);
            let buffer = self
                .levels
                .get_mut(level as usize)
                .and_then(Option::as_mut)
                .filter(|b| hz >= b.start_hz && hz <= b.end_hz)
                .ok_or_else(|| {
                    PidxError::internal(format!("hz {hz} outside the aligned extent of level {level}"))
                })?;
            if let Some(patch) = patch {
                let src = index as usize * bps;
                let dst = (hz - buffer.start_hz) as usize * bps;
                buffer.data[dst..dst + bps].copy_from_slice(&patch.data()[src..src + bps]);
            }
            buffer.hz_index.push(hz);
        }
        for buffer in self.levels.iter().flatten() {
            if buffer.sample_count() != buffer.expected_samples {
                return Err(PidxError::inconsistent(format!(
                    "level {} received {} samples, alignment predicted {}",
                    buffer.level,
                    buffer.sample_count(),
                    buffer.expected_samples
                )));
            }
        }
        Ok(())
    }
}

/// Populate several variables of one patch region with a single HZ sort.
pub fn populate_group(buffers: &mut [HzBuffer], patches: &[&Patch]) -> Result<()> {
    let Some(first) = buffers.first() else {
        return Err(PidxError::precondition("patch group is empty"));
    };
    if buffers.len() != patches.len() {
        return Err(PidxError::precondition(format!(
            "{} hz buffers for {} patches",
            buffers.len(),
            patches.len()
        )));
    }
    let pattern = first.pattern.clone();
    let region = first.region;
    for (buffer, patch) in buffers.iter().zip(patches) {
        if buffer.pattern != pattern {
            return Err(PidxError::precondition(
                "all buffers of a patch group must share one bit pattern",
            ));
        }
        buffer.check_patch(patch)?;
    }

    let _span = debug_span!(
        "hz_encode",
        variables = buffers.len(),
        samples = region.volume()
    )
    .entered();
    let order = sorted_points(&pattern, &region)?;
    let filled = buffers
        .iter_mut()
        .zip(patches)
        .try_for_each(|(buffer, patch)| buffer.fill(&order, Some(patch)));
    if let Err(err) = filled {
        for buffer in buffers.iter_mut() {
            buffer.clear_levels();
        }
        return Err(err);
    }
    for buffer in buffers.iter_mut() {
        buffer.state = HzBufferState::Populated;
    }
    debug!(samples = order.len(), "patch group encoded");
    Ok(())
}

/// `(hz, row-major point index)` for every point of `region`, sorted by hz.
pub(crate) fn sorted_points(pattern: &BitPattern, region: &GridBox) -> Result<Vec<(u64, u64)>> {
    let count = region.volume() as usize;
    let mut order = Vec::new();
    order
        .try_reserve_exact(count)
        .map_err(|e| PidxError::allocation("hz sort permutation", count * 16, e))?;
    for (index, coord) in region.points().enumerate() {
        order.push((coord_to_hz(pattern, &coord)?, index as u64));
    }
    order.sort_by_key(|&(hz, _)| hz);
    Ok(order)
}
