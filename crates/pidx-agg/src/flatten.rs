//! Flattened transfer: one indexed operation per target rank.
//!
//! All legs bound for the same rank are packed into one contiguous buffer
//! with a matching `(target_disp, len)` list, so each peer sees a single put
//! (or get) per epoch regardless of how fragmented the runs are.

use std::collections::BTreeMap;

use pidx_encode::HzBuffer;
use pidx_error::Result;

use crate::diagnostics::Direction;
use crate::engine::{
    AggregationEngine, EpochSummary, PlannedLeg, copy_from, copy_into, destination_bytes,
    source_bytes,
};
use crate::instrumentation::{record_local_copy, record_remote_get, record_remote_put};
use crate::transport::RmaWindow;

#[derive(Debug, Default)]
struct Batch<'p> {
    blocks: Vec<(usize, usize)>,
    legs: Vec<&'p PlannedLeg>,
    len: usize,
}

fn batches(planned: &[PlannedLeg]) -> BTreeMap<usize, Batch<'_>> {
    let mut by_rank: BTreeMap<usize, Batch<'_>> = BTreeMap::new();
    for p in planned {
        let batch = by_rank.entry(p.leg.rank).or_default();
        batch.blocks.push((p.leg.target_offset, p.leg.len));
        batch.legs.push(p);
        batch.len += p.leg.len;
    }
    by_rank
}

pub(crate) fn write<W: RmaWindow>(
    engine: &AggregationEngine<'_>,
    window: &mut W,
    buffers: &[HzBuffer],
    planned: &[PlannedLeg],
) -> Result<EpochSummary> {
    let rank = engine.rank();
    let mut summary = EpochSummary::default();
    for (target, batch) in batches(planned) {
        if target == rank {
            window.with_local_mut(|memory| {
                batch.legs.iter().try_for_each(|p| {
                    copy_into(memory, rank, p.leg.target_offset, source_bytes(buffers, p)?)
                })
            })?;
            record_local_copy(batch.len);
            summary.local_legs += batch.legs.len();
        } else {
            let mut flat = Vec::with_capacity(batch.len);
            for p in &batch.legs {
                flat.extend_from_slice(source_bytes(buffers, p)?);
            }
            window.put_indexed(target, &batch.blocks, &flat)?;
            record_remote_put(batch.len);
            summary.remote_ops += 1;
        }
        summary.legs += batch.legs.len();
        summary.bytes += batch.len;
        for p in &batch.legs {
            engine.observe_leg(Direction::Write, &p.leg);
        }
    }
    Ok(summary)
}

pub(crate) fn read<W: RmaWindow>(
    engine: &AggregationEngine<'_>,
    window: &mut W,
    buffers: &mut [HzBuffer],
    planned: &[PlannedLeg],
) -> Result<EpochSummary> {
    let rank = engine.rank();
    let mut summary = EpochSummary::default();
    for (target, batch) in batches(planned) {
        let mut flat = vec![0_u8; batch.len];
        if target == rank {
            window.with_local(|memory| {
                let mut cursor = 0;
                batch.legs.iter().try_for_each(|p| {
                    let out = &mut flat[cursor..cursor + p.leg.len];
                    cursor += p.leg.len;
                    copy_from(memory, rank, p.leg.target_offset, out)
                })
            })?;
            record_local_copy(batch.len);
            summary.local_legs += batch.legs.len();
        } else {
            window.get_indexed(target, &batch.blocks, &mut flat)?;
            record_remote_get(batch.len);
            summary.remote_ops += 1;
        }

        let mut cursor = 0;
        for p in &batch.legs {
            destination_bytes(buffers, p)?.copy_from_slice(&flat[cursor..cursor + p.leg.len]);
            cursor += p.leg.len;
            engine.observe_leg(Direction::Read, &p.leg);
        }
        summary.legs += batch.legs.len();
        summary.bytes += batch.len;
    }
    Ok(summary)
}
