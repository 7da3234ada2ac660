//! Mapping an HZ run onto owner slots.
//!
//! A run of `count` consecutive HZ samples of one variable lands at value
//! displacement `disp = (hz_start - file * spf - neg * spb) * vps` of its
//! file, where `neg` is the negative offset of the run's first block. The
//! file's values are cut into equal slots; a run that crosses slot
//! boundaries is split into one leg per slot touched.

use pidx_blocks::BlockLayout;
use pidx_error::{PidxError, Result};
use pidx_types::DataType;
use smallvec::SmallVec;

use crate::ownership::OwnershipTable;

/// Part of a run that lands in exactly one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leg {
    pub file: u64,
    pub variable: usize,
    pub slot: usize,
    /// Owner of the slot.
    pub rank: usize,
    /// Byte displacement in the owner's window.
    pub target_offset: usize,
    /// Byte offset relative to the first byte of the run.
    pub src_offset: usize,
    pub len: usize,
}

impl Leg {
    #[must_use]
    pub const fn is_local(&self, rank: usize) -> bool {
        self.rank == rank
    }
}

/// Legs of one run, in ascending slot order.
pub type TransferPlan = SmallVec<[Leg; 4]>;

/// Split the run `[hz_start, hz_start + count)` of `variable` into legs.
///
/// The run must lie in a single file and must not cross an absent block.
pub fn plan_transfer(
    layout: &BlockLayout,
    table: &OwnershipTable,
    variable: usize,
    datatype: DataType,
    hz_start: u64,
    count: u64,
) -> Result<TransferPlan> {
    if count == 0 {
        return Err(PidxError::precondition("cannot plan an empty run"));
    }
    let hz_end = hz_start + count - 1;
    let file = layout.file_of(hz_start);
    if layout.file_of(hz_end) != file {
        return Err(PidxError::precondition(format!(
            "run {hz_start}..={hz_end} crosses a file boundary"
        )));
    }
    let spb = layout.samples_per_block();
    let vps = datatype.values_per_sample as u64;
    let bpv = datatype.bytes_per_value;
    let neg = layout.negative_offset(layout.block_of(hz_start))?;
    for block in layout.block_of(hz_start) + 1..=layout.block_of(hz_end) {
        if !layout.block_present(block) {
            return Err(PidxError::AbsentBlock { block });
        }
    }

    let slot_len = table.slot_len_values(file)?;
    let slot_count = table.slot_count(variable)?;
    let capacity = slot_len * slot_count as u64;
    let disp_samples =
        i128::from(hz_start) - i128::from(file * layout.samples_per_file()) - i128::from(neg * spb);
    let out_of_range = |displacement: i128| PidxError::DisplacementOutOfRange {
        file,
        variable,
        displacement,
        capacity,
    };
    if disp_samples < 0 {
        return Err(out_of_range(disp_samples * i128::from(vps)));
    }
    let disp = disp_samples as u64 * vps;
    let end = disp + count * vps;
    if end > capacity || slot_len == 0 {
        return Err(out_of_range(i128::from(end)));
    }

    let start_slot = (disp / slot_len) as usize;
    let end_slot = ((end - 1) / slot_len) as usize;
    let mut legs = TransferPlan::new();
    for slot in start_slot..=end_slot {
        let slot_start = slot as u64 * slot_len;
        let from = disp.max(slot_start);
        let to = end.min(slot_start + slot_len);
        let owner = table.owner(file, variable, slot)?;
        legs.push(Leg {
            file,
            variable,
            slot,
            rank: owner.rank,
            target_offset: owner.window_offset + (from - slot_start) as usize * bpv,
            src_offset: (from - disp) as usize * bpv,
            len: (to - from) as usize * bpv,
        });
    }
    Ok(legs)
}
