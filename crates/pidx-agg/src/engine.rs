//! Fence-epoch transfer between HZ buffers and owner windows.
//!
//! Every rank plans its own runs against the replicated layout and
//! ownership table, opens an epoch, executes each leg as a local copy or a
//! one-sided put/get, and closes the epoch. A rank whose planning or legs
//! fail still issues both fences and reports its error afterwards, so peers
//! never wait on a rank that bailed out.

use pidx_blocks::BlockLayout;
use pidx_encode::{HzBuffer, HzBufferState};
use pidx_error::{PidxError, Result};
use pidx_types::LayoutPolicy;
use tracing::{debug, debug_span, trace};

use crate::config::AggregationConfig;
use crate::diagnostics::{AggregationEvent, Direction};
use crate::flatten;
use crate::instrumentation::{
    record_epoch, record_local_copy, record_remote_get, record_remote_put, record_split_transfer,
};
use crate::ownership::OwnershipTable;
use crate::plan::{Leg, plan_transfer};
use crate::runs::extract_runs;
use crate::transport::RmaWindow;

/// A leg together with where its bytes live on the contributing rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLeg {
    pub variable: usize,
    pub level: u32,
    /// Byte offset inside the level buffer.
    pub src_offset: usize,
    pub leg: Leg,
}

/// Totals of one closed epoch on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochSummary {
    pub legs: usize,
    pub local_legs: usize,
    /// Puts or gets issued to other ranks; an indexed op counts once.
    pub remote_ops: usize,
    pub bytes: usize,
}

/// Moves one rank's HZ buffers to or from the owner windows.
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine<'a> {
    config: &'a AggregationConfig,
    layout: &'a BlockLayout,
    table: &'a OwnershipTable,
    rank: usize,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(
        config: &'a AggregationConfig,
        layout: &'a BlockLayout,
        table: &'a OwnershipTable,
        rank: usize,
    ) -> Result<Self> {
        if rank >= table.process_count() {
            return Err(PidxError::out_of_range("rank", rank));
        }
        if table.variable_count() != config.variable_count() {
            return Err(PidxError::inconsistent(format!(
                "ownership table has {} variables, config has {}",
                table.variable_count(),
                config.variable_count()
            )));
        }
        Ok(Self {
            config,
            layout,
            table,
            rank,
        })
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Legs for every run of every buffer, in variable then HZ order.
    ///
    /// `buffers` holds one buffer per variable, or none when this rank
    /// contributes nothing.
    pub fn plan(&self, buffers: &[HzBuffer]) -> Result<Vec<PlannedLeg>> {
        if !buffers.is_empty() && buffers.len() != self.config.variable_count() {
            return Err(PidxError::precondition(format!(
                "{} hz buffers for {} variables",
                buffers.len(),
                self.config.variable_count()
            )));
        }
        let policy = self.config.layout_policy();
        let mut planned = Vec::new();
        for (variable, buffer) in buffers.iter().enumerate() {
            let datatype = self.config.datatypes[variable];
            if buffer.datatype() != datatype {
                return Err(PidxError::precondition(format!(
                    "variable {variable} is {datatype} but its buffer holds {}",
                    buffer.datatype()
                )));
            }
            for run in extract_runs(buffer, self.layout, policy)? {
                let legs = plan_transfer(
                    self.layout,
                    self.table,
                    variable,
                    datatype,
                    run.hz_start,
                    run.count,
                )?;
                if legs.len() > 1 {
                    record_split_transfer();
                }
                planned.extend(legs.into_iter().map(|leg| PlannedLeg {
                    variable,
                    level: run.level,
                    src_offset: run.src_offset + leg.src_offset,
                    leg,
                }));
            }
        }
        Ok(planned)
    }

    /// Push every populated sample into its owner's window.
    pub fn write<W: RmaWindow>(&self, window: &mut W, buffers: &[HzBuffer]) -> Result<EpochSummary> {
        let planned = buffers
            .iter()
            .try_for_each(|b| {
                expect_state(b, &[HzBufferState::Populated, HzBufferState::Compacted])
            })
            .and_then(|()| self.plan(buffers));
        let _span = debug_span!(
            "aggregation_epoch",
            rank = self.rank,
            direction = Direction::Write.as_str(),
            legs = planned.as_ref().map_or(0, Vec::len)
        )
        .entered();

        window.fence()?;
        let outcome = planned.and_then(|planned| match self.config.layout_policy() {
            LayoutPolicy::Flattened => flatten::write(self, window, buffers, &planned),
            LayoutPolicy::Dense | LayoutPolicy::BlockAware => {
                self.write_split(window, buffers, &planned)
            }
        });
        let closed = window.fence();
        let summary = outcome?;
        closed?;
        self.close_epoch(Direction::Write, summary);
        Ok(summary)
    }

    /// Pull every indexed sample back out of the owner windows. Buffers must
    /// be awaiting data and are marked received on success.
    pub fn read<W: RmaWindow>(
        &self,
        window: &mut W,
        buffers: &mut [HzBuffer],
    ) -> Result<EpochSummary> {
        let planned = buffers
            .iter()
            .try_for_each(|b| expect_state(b, &[HzBufferState::AwaitingData]))
            .and_then(|()| self.plan(&*buffers));
        let _span = debug_span!(
            "aggregation_epoch",
            rank = self.rank,
            direction = Direction::Read.as_str(),
            legs = planned.as_ref().map_or(0, Vec::len)
        )
        .entered();

        window.fence()?;
        let outcome = planned.and_then(|planned| match self.config.layout_policy() {
            LayoutPolicy::Flattened => flatten::read(self, window, &mut *buffers, &planned),
            LayoutPolicy::Dense | LayoutPolicy::BlockAware => {
                self.read_split(window, &mut *buffers, &planned)
            }
        });
        let closed = window.fence();
        let summary = outcome?;
        closed?;
        for buffer in buffers.iter_mut() {
            buffer.mark_received()?;
        }
        self.close_epoch(Direction::Read, summary);
        Ok(summary)
    }

    fn write_split<W: RmaWindow>(
        &self,
        window: &mut W,
        buffers: &[HzBuffer],
        planned: &[PlannedLeg],
    ) -> Result<EpochSummary> {
        let mut summary = EpochSummary::default();
        for p in planned {
            let src = source_bytes(buffers, p)?;
            if p.leg.is_local(self.rank) {
                window.with_local_mut(|memory| {
                    copy_into(memory, self.rank, p.leg.target_offset, src)
                })?;
                record_local_copy(src.len());
                summary.local_legs += 1;
            } else {
                window.put(p.leg.rank, p.leg.target_offset, src)?;
                record_remote_put(src.len());
                summary.remote_ops += 1;
            }
            summary.legs += 1;
            summary.bytes += src.len();
            self.observe_leg(Direction::Write, &p.leg);
        }
        Ok(summary)
    }

    fn read_split<W: RmaWindow>(
        &self,
        window: &mut W,
        buffers: &mut [HzBuffer],
        planned: &[PlannedLeg],
    ) -> Result<EpochSummary> {
        let mut summary = EpochSummary::default();
        for p in planned {
            let out = destination_bytes(buffers, p)?;
            if p.leg.is_local(self.rank) {
                window.with_local(|memory| copy_from(memory, self.rank, p.leg.target_offset, out))?;
                record_local_copy(p.leg.len);
                summary.local_legs += 1;
            } else {
                window.get(p.leg.rank, p.leg.target_offset, out)?;
                record_remote_get(p.leg.len);
                summary.remote_ops += 1;
            }
            summary.legs += 1;
            summary.bytes += p.leg.len;
            self.observe_leg(Direction::Read, &p.leg);
        }
        Ok(summary)
    }

    pub(crate) fn observe_leg(&self, direction: Direction, leg: &Leg) {
        trace!(
            rank = self.rank,
            target = leg.rank,
            file = leg.file,
            variable = leg.variable,
            slot = leg.slot,
            offset = leg.target_offset,
            bytes = leg.len,
            direction = direction.as_str(),
            "transfer leg"
        );
        self.config.emit(&AggregationEvent::Transfer {
            direction,
            rank: self.rank,
            target: leg.rank,
            file: leg.file,
            variable: leg.variable,
            slot: leg.slot,
            target_offset: leg.target_offset,
            bytes: leg.len,
            local: leg.is_local(self.rank),
        });
    }

    fn close_epoch(&self, direction: Direction, summary: EpochSummary) {
        record_epoch();
        debug!(
            rank = self.rank,
            direction = direction.as_str(),
            legs = summary.legs,
            local_legs = summary.local_legs,
            remote_ops = summary.remote_ops,
            bytes = summary.bytes,
            "aggregation epoch closed"
        );
        self.config.emit(&AggregationEvent::EpochClosed {
            direction,
            rank: self.rank,
            legs: summary.legs,
            bytes: summary.bytes,
        });
    }
}

/// Take part in an epoch without moving any data.
///
/// For a rank that failed before it could build an engine: issuing both
/// fences lets the peers finish their own epoch.
pub fn skip_epoch<W: RmaWindow>(window: &mut W) -> Result<()> {
    window.fence()?;
    window.fence()
}

fn expect_state(buffer: &HzBuffer, allowed: &[HzBufferState]) -> Result<()> {
    if allowed.contains(&buffer.state()) {
        Ok(())
    } else {
        Err(PidxError::precondition(format!(
            "hz buffer in state {} cannot take part in this epoch",
            buffer.state()
        )))
    }
}

pub(crate) fn source_bytes<'b>(buffers: &'b [HzBuffer], p: &PlannedLeg) -> Result<&'b [u8]> {
    buffers
        .get(p.variable)
        .and_then(|b| b.level(p.level))
        .and_then(|l| l.data().get(p.src_offset..p.src_offset + p.leg.len))
        .ok_or_else(|| missing_source(p))
}

pub(crate) fn destination_bytes<'b>(
    buffers: &'b mut [HzBuffer],
    p: &PlannedLeg,
) -> Result<&'b mut [u8]> {
    buffers
        .get_mut(p.variable)
        .and_then(|b| b.level_mut(p.level))
        .and_then(|l| l.data_mut().get_mut(p.src_offset..p.src_offset + p.leg.len))
        .ok_or_else(|| missing_source(p))
}

fn missing_source(p: &PlannedLeg) -> PidxError {
    PidxError::internal(format!(
        "variable {} level {} has no bytes at {}..{}",
        p.variable,
        p.level,
        p.src_offset,
        p.src_offset + p.leg.len
    ))
}

pub(crate) fn copy_into(memory: &mut [u8], rank: usize, offset: usize, src: &[u8]) -> Result<()> {
    let window_len = memory.len();
    let dst = memory
        .get_mut(offset..offset + src.len())
        .ok_or_else(|| local_range_error(rank, offset, src.len(), window_len))?;
    dst.copy_from_slice(src);
    Ok(())
}

pub(crate) fn copy_from(memory: &[u8], rank: usize, offset: usize, out: &mut [u8]) -> Result<()> {
    let src = memory
        .get(offset..offset + out.len())
        .ok_or_else(|| local_range_error(rank, offset, out.len(), memory.len()))?;
    out.copy_from_slice(src);
    Ok(())
}

fn local_range_error(rank: usize, offset: usize, len: usize, window_len: usize) -> PidxError {
    PidxError::Transport {
        op: "local_copy",
        rank,
        detail: format!("{len} bytes at {offset} exceed the local window of {window_len}"),
    }
}
