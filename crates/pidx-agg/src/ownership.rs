//! Assignment of (file, variable, slot) triples to owner ranks.
//!
//! Every existing file is cut, per variable, into `values_per_sample *
//! fanout` slots of `samples_in_file / fanout` values each. Slots are
//! numbered in (file, variable, slot) order and dealt to ranks at a fixed
//! stride so that owners spread evenly over the process group. The table is
//! computed identically on every rank and never changes during a round.

use pidx_blocks::BlockLayout;
use pidx_error::{PidxError, Result};
use tracing::info;

use crate::config::AggregationConfig;
use crate::diagnostics::AggregationEvent;

/// Owner of one slot and where the slot lives inside the owner's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub rank: usize,
    /// Byte offset of the slot inside the owner's window.
    pub window_offset: usize,
    pub len_bytes: usize,
}

/// One slot together with its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedSlot {
    pub file: u64,
    pub variable: usize,
    pub slot: usize,
    pub assignment: SlotAssignment,
}

/// Replicated, read-only slot ownership for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTable {
    process_count: usize,
    interval: usize,
    fanout: u64,
    files: Vec<u64>,
    slots_per_variable: Vec<usize>,
    max_slots: usize,
    /// Per existing file ordinal.
    slot_len_values: Vec<u64>,
    /// Flat `(ordinal * variables + variable) * max_slots + slot`.
    entries: Vec<Option<SlotAssignment>>,
    window_len: Vec<usize>,
}

impl OwnershipTable {
    pub fn build(
        layout: &BlockLayout,
        config: &AggregationConfig,
        process_count: usize,
    ) -> Result<Self> {
        if process_count == 0 {
            return Err(PidxError::precondition("process group is empty"));
        }
        let fanout = config.fanout();
        if layout.samples_per_block() % fanout != 0 {
            return Err(PidxError::precondition(format!(
                "aggregation factor {fanout} must divide samples_per_block {}",
                layout.samples_per_block()
            )));
        }
        let files = layout.existing_files().to_vec();
        let slots_per_variable: Vec<usize> = config
            .datatypes
            .iter()
            .map(|dt| dt.values_per_sample * fanout as usize)
            .collect();
        let max_slots = slots_per_variable.iter().copied().max().unwrap_or(0);
        let variables = slots_per_variable.len();
        let total_slots = slots_per_variable.iter().sum::<usize>() * files.len();
        let interval = if total_slots == 0 {
            1
        } else {
            (process_count / total_slots).max(1)
        };

        let mut slot_len_values = Vec::with_capacity(files.len());
        let mut entries = vec![None; files.len() * variables * max_slots];
        let mut window_len = vec![0_usize; process_count];
        let mut ordinal = 0_usize;
        for (file_ordinal, &file) in files.iter().enumerate() {
            let slot_len = layout.samples_in_file(file)? / fanout;
            slot_len_values.push(slot_len);
            for (variable, datatype) in config.datatypes.iter().enumerate() {
                let len_bytes = slot_len as usize * datatype.bytes_per_value;
                for slot in 0..slots_per_variable[variable] {
                    let rank = (ordinal * interval) % process_count;
                    let index = (file_ordinal * variables + variable) * max_slots + slot;
                    entries[index] = Some(SlotAssignment {
                        rank,
                        window_offset: window_len[rank],
                        len_bytes,
                    });
                    window_len[rank] += len_bytes;
                    ordinal += 1;
                }
            }
        }

        info!(
            files = files.len(),
            slots = total_slots,
            interval,
            process_count,
            "ownership table built"
        );
        config.emit(&AggregationEvent::OwnershipBuilt {
            files: files.len(),
            slots: total_slots,
            interval,
            process_count,
        });
        Ok(Self {
            process_count,
            interval,
            fanout,
            files,
            slots_per_variable,
            max_slots,
            slot_len_values,
            entries,
            window_len,
        })
    }

    #[must_use]
    pub const fn process_count(&self) -> usize {
        self.process_count
    }

    /// Rank stride between consecutive slots.
    #[must_use]
    pub const fn interval(&self) -> usize {
        self.interval
    }

    #[must_use]
    pub const fn fanout(&self) -> u64 {
        self.fanout
    }

    /// Existing files covered by the table.
    #[must_use]
    pub fn files(&self) -> &[u64] {
        &self.files
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.slots_per_variable.len()
    }

    /// Slots of one variable in each file.
    pub fn slot_count(&self, variable: usize) -> Result<usize> {
        self.slots_per_variable
            .get(variable)
            .copied()
            .ok_or_else(|| PidxError::out_of_range("variable", variable))
    }

    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    fn ordinal(&self, file: u64) -> Result<usize> {
        self.files
            .binary_search(&file)
            .map_err(|_| PidxError::out_of_range("file without present blocks", file))
    }

    /// Values per slot in `file`.
    pub fn slot_len_values(&self, file: u64) -> Result<u64> {
        Ok(self.slot_len_values[self.ordinal(file)?])
    }

    pub fn owner(&self, file: u64, variable: usize, slot: usize) -> Result<SlotAssignment> {
        let ordinal = self.ordinal(file)?;
        if slot >= self.slot_count(variable)? {
            return Err(PidxError::out_of_range("slot", slot));
        }
        let index = (ordinal * self.variable_count() + variable) * self.max_slots + slot;
        self.entries[index]
            .ok_or_else(|| PidxError::internal(format!("slot {index} was never assigned")))
    }

    /// Bytes of window memory `rank` exposes.
    #[must_use]
    pub fn window_len(&self, rank: usize) -> usize {
        self.window_len.get(rank).copied().unwrap_or(0)
    }

    /// Every slot, in (file, variable, slot) order.
    pub fn slots(&self) -> impl Iterator<Item = OwnedSlot> + '_ {
        let variables = self.variable_count();
        self.files.iter().enumerate().flat_map(move |(ordinal, &file)| {
            (0..variables).flat_map(move |variable| {
                (0..self.slots_per_variable[variable]).filter_map(move |slot| {
                    let index = (ordinal * variables + variable) * self.max_slots + slot;
                    self.entries[index].map(|assignment| OwnedSlot {
                        file,
                        variable,
                        slot,
                        assignment,
                    })
                })
            })
        })
    }

    /// Slots owned by `rank`, in window order.
    pub fn slots_owned_by(&self, rank: usize) -> impl Iterator<Item = OwnedSlot> + '_ {
        self.slots().filter(move |s| s.assignment.rank == rank)
    }
}
