//! One aggregation round, end to end, on a single rank.
//!
//! A write round encodes this rank's patch group into HZ buffers, builds the
//! replicated ownership table, exposes the rank's owner memory as a window
//! and runs one write epoch. What comes back is the set of file-ready slots
//! this rank owns. A read round runs the same steps in reverse.
//!
//! Both rounds are collective: every rank of the fabric must call them with
//! the same layout and configuration, including ranks that contribute no
//! data. A rank that fails locally still creates its window and sits out the
//! epoch before returning the error.

use pidx_agg::{
    AggregatedSlot, AggregationConfig, AggregationEngine, AggregationEvent, OwnerBuffers,
    OwnershipTable, RmaFabric, RmaWindow, skip_epoch,
};
use pidx_blocks::{BlockLayout, apply_endianness};
use pidx_encode::{HzBuffer, Patch, populate_group};
use pidx_error::{PidxError, Result};
use pidx_types::{BitPattern, GridBox};
use tracing::{debug, info, info_span, warn};

/// Everything a rank sets up before the window exists.
struct Prepared {
    buffers: Vec<HzBuffer>,
    table: OwnershipTable,
    owner: OwnerBuffers,
}

/// Shared, read-only inputs of a round.
#[derive(Debug, Clone, Copy)]
pub struct AggregationRound<'a> {
    pattern: &'a BitPattern,
    layout: &'a BlockLayout,
    config: &'a AggregationConfig,
}

impl<'a> AggregationRound<'a> {
    pub fn new(
        pattern: &'a BitPattern,
        layout: &'a BlockLayout,
        config: &'a AggregationConfig,
    ) -> Result<Self> {
        if layout.max_level() != pattern.max_level() {
            return Err(PidxError::inconsistent(format!(
                "layout has max level {}, bit pattern has {}",
                layout.max_level(),
                pattern.max_level()
            )));
        }
        if layout.bits_per_block() != config.dataset.bits_per_block
            || layout.blocks_per_file() != config.dataset.blocks_per_file
        {
            return Err(PidxError::inconsistent(
                "layout geometry differs from the dataset configuration",
            ));
        }
        Ok(Self {
            pattern,
            layout,
            config,
        })
    }

    /// Encode one patch per variable into compacted HZ buffers.
    ///
    /// An empty slice yields no buffers.
    pub fn encode(&self, patches: &[Patch]) -> Result<Vec<HzBuffer>> {
        if patches.is_empty() {
            return Ok(Vec::new());
        }
        if patches.len() != self.config.variable_count() {
            return Err(PidxError::precondition(format!(
                "{} patches for {} variables",
                patches.len(),
                self.config.variable_count()
            )));
        }
        let region = *patches[0].region();
        let mut buffers = Vec::with_capacity(patches.len());
        for datatype in &self.config.datatypes {
            let mut buffer = HzBuffer::new(self.pattern.clone(), *datatype);
            buffer.allocate(region, self.layout)?;
            buffers.push(buffer);
        }
        let group: Vec<&Patch> = patches.iter().collect();
        populate_group(&mut buffers, &group)?;
        for buffer in &mut buffers {
            buffer.compact()?;
        }
        Ok(buffers)
    }

    /// Aggregate `patches` onto their owners and return the slots this rank
    /// owns, in file byte order when the dataset flips endianness.
    pub fn write<F: RmaFabric>(&self, fabric: &F, patches: &[Patch]) -> Result<Vec<AggregatedSlot>> {
        let rank = fabric.rank();
        let span = info_span!(
            "aggregation_round",
            rank,
            direction = "write",
            policy = self.config.layout_policy().as_str()
        );
        let _guard = span.enter();

        let mut prepared = self.prepare_write(fabric, patches);
        let memory = match &mut prepared {
            Ok(p) => p.owner.take_memory(),
            Err(_) => Vec::new(),
        };
        let mut window = fabric.create_window(memory)?;
        let Prepared {
            buffers,
            table,
            mut owner,
        } = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Err(sit_out(&mut window, rank, err)),
        };
        let engine = match AggregationEngine::new(self.config, self.layout, &table, rank) {
            Ok(engine) => engine,
            Err(err) => return Err(sit_out(&mut window, rank, err)),
        };
        let summary = engine.write(&mut window, &buffers)?;
        owner.restore_memory(window.into_local()?)?;

        let mut slots = owner.into_slots();
        for slot in &mut slots {
            self.config.emit(&AggregationEvent::SlotDigest {
                rank,
                file: slot.file,
                variable: slot.variable,
                slot: slot.slot,
                xxh3: slot.digest(),
            });
            apply_endianness(
                &mut slot.bytes,
                self.config.datatypes[slot.variable],
                self.config.dataset.flip_endian,
            )?;
        }
        info!(
            rank,
            slots = slots.len(),
            legs = summary.legs,
            bytes = summary.bytes,
            "write round complete"
        );
        Ok(slots)
    }

    /// Scatter previously aggregated `slots` back to the ranks that ask for
    /// them. `region` is the box this rank reads, or `None` when it only
    /// serves its owned slots. Samples of absent blocks read back as zero.
    pub fn read<F: RmaFabric>(
        &self,
        fabric: &F,
        region: Option<&GridBox>,
        slots: Vec<AggregatedSlot>,
    ) -> Result<Vec<Patch>> {
        let rank = fabric.rank();
        let span = info_span!(
            "aggregation_round",
            rank,
            direction = "read",
            policy = self.config.layout_policy().as_str()
        );
        let _guard = span.enter();

        let mut prepared = self.prepare_read(fabric, region, slots);
        let memory = match &mut prepared {
            Ok(p) => p.owner.take_memory(),
            Err(_) => Vec::new(),
        };
        let mut window = fabric.create_window(memory)?;
        let Prepared {
            mut buffers, table, ..
        } = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Err(sit_out(&mut window, rank, err)),
        };
        let engine = match AggregationEngine::new(self.config, self.layout, &table, rank) {
            Ok(engine) => engine,
            Err(err) => return Err(sit_out(&mut window, rank, err)),
        };
        let summary = engine.read(&mut window, &mut buffers)?;
        window.into_local()?;
        debug!(rank, legs = summary.legs, bytes = summary.bytes, "read epoch done");

        let patches = buffers
            .iter()
            .map(HzBuffer::decode_into)
            .collect::<Result<Vec<_>>>()?;
        info!(rank, patches = patches.len(), "read round complete");
        Ok(patches)
    }

    fn prepare_write<F: RmaFabric>(&self, fabric: &F, patches: &[Patch]) -> Result<Prepared> {
        let buffers = self.encode(patches)?;
        let table = OwnershipTable::build(self.layout, self.config, fabric.size())?;
        let owner = OwnerBuffers::allocate(&table, fabric.rank())?;
        owner.announce(self.config);
        Ok(Prepared {
            buffers,
            table,
            owner,
        })
    }

    fn prepare_read<F: RmaFabric>(
        &self,
        fabric: &F,
        region: Option<&GridBox>,
        mut slots: Vec<AggregatedSlot>,
    ) -> Result<Prepared> {
        for slot in &mut slots {
            let datatype = self.config.datatypes.get(slot.variable).copied().ok_or_else(|| {
                PidxError::out_of_range("slot variable", slot.variable)
            })?;
            apply_endianness(&mut slot.bytes, datatype, self.config.dataset.flip_endian)?;
        }
        let table = OwnershipTable::build(self.layout, self.config, fabric.size())?;
        let owner = OwnerBuffers::from_slots(&table, fabric.rank(), slots)?;

        let mut buffers = Vec::new();
        if let Some(region) = region {
            for datatype in &self.config.datatypes {
                let mut buffer = HzBuffer::new(self.pattern.clone(), *datatype);
                buffer.allocate(*region, self.layout)?;
                buffer.prepare_receive()?;
                buffer.compact()?;
                buffers.push(buffer);
            }
        }
        Ok(Prepared {
            buffers,
            table,
            owner,
        })
    }
}

/// Fence through the epoch with no legs, then hand back `err`.
fn sit_out<W: RmaWindow>(window: &mut W, rank: usize, err: PidxError) -> PidxError {
    if let Err(fence) = skip_epoch(window) {
        warn!(rank, error = %fence, "fence failed while sitting out the epoch");
    }
    warn!(rank, error = %err, "rank sat out the epoch");
    err
}

#[cfg(test)]
mod tests {
    use pidx_agg::{LocalFabric, RecordingObserver};
    use pidx_types::{DataType, DatasetConfig};
    use std::sync::Arc;

    use super::*;
    use crate::dataset::agree_layout;

    fn dataset() -> DatasetConfig {
        DatasetConfig {
            bits_per_block: 3,
            blocks_per_file: 2,
            ..DatasetConfig::default()
        }
    }

    #[test]
    fn test_round_rejects_mismatched_layout() {
        let pattern = BitPattern::parse("V010101").expect("pattern");
        let other = BitPattern::parse("V0101").expect("pattern");
        let layout = agree_layout(&other, &dataset(), &[]).expect("layout");
        let config = AggregationConfig::new(dataset(), vec![DataType::UINT8]).expect("config");
        assert!(AggregationRound::new(&pattern, &layout, &config).is_err());
    }

    #[test]
    fn test_encode_checks_group_size() {
        let pattern = BitPattern::parse("V010101").expect("pattern");
        let region = GridBox::from_dims(pattern.domain());
        let layout = agree_layout(&pattern, &dataset(), &[region]).expect("layout");
        let config = AggregationConfig::new(dataset(), vec![DataType::UINT8, DataType::FLOAT32])
            .expect("config");
        let round = AggregationRound::new(&pattern, &layout, &config).expect("round");
        let patch = Patch::zeroed(region, DataType::UINT8).expect("patch");
        assert!(round.encode(&[patch]).is_err());
        assert!(round.encode(&[]).expect("nothing").is_empty());
    }

    #[test]
    fn test_single_rank_write_emits_digests() {
        let pattern = BitPattern::parse("V010101").expect("pattern");
        let region = GridBox::from_dims(pattern.domain());
        let layout = agree_layout(&pattern, &dataset(), &[region]).expect("layout");
        let recorder = Arc::new(RecordingObserver::new());
        let config = AggregationConfig::new(dataset(), vec![DataType::UINT8])
            .expect("config")
            .with_observer(recorder.clone());
        let round = AggregationRound::new(&pattern, &layout, &config).expect("round");
        let patch = Patch::from_fn(region, DataType::UINT8, |c, out| {
            out[0] = (c[0] + 8 * c[1]) as u8;
        })
        .expect("patch");

        let fabric = LocalFabric::new(1).expect("fabric");
        let rank = fabric.ranks().pop().expect("rank");
        let slots = round.write(&rank, &[patch]).expect("write");
        assert_eq!(slots.len(), layout.existing_files().len());
        let digests = recorder
            .events()
            .iter()
            .filter(|e| e.kind_str() == "slot_digest")
            .count();
        assert_eq!(digests, slots.len());
    }
}
