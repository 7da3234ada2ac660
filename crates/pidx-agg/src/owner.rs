//! Window memory of an owner rank and the file-ready slots carved from it.

use pidx_error::{PidxError, Result};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::AggregationConfig;
use crate::diagnostics::AggregationEvent;
use crate::ownership::{OwnedSlot, OwnershipTable};

/// Contiguous values of one (file, variable, slot) triple, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedSlot {
    pub file: u64,
    pub variable: usize,
    pub slot: usize,
    pub bytes: Vec<u8>,
}

impl AggregatedSlot {
    /// xxh3 of the payload.
    #[must_use]
    pub fn digest(&self) -> u64 {
        xxh3_64(&self.bytes)
    }
}

/// Backing memory of one rank's window: its owned slots, back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerBuffers {
    rank: usize,
    slots: Vec<OwnedSlot>,
    memory: Vec<u8>,
}

impl OwnerBuffers {
    /// Zeroed memory for every slot `rank` owns.
    pub fn allocate(table: &OwnershipTable, rank: usize) -> Result<Self> {
        let len = table.window_len(rank);
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(len)
            .map_err(|e| PidxError::allocation("owner window", len, e))?;
        memory.resize(len, 0);
        Ok(Self {
            rank,
            slots: table.slots_owned_by(rank).collect(),
            memory,
        })
    }

    /// Rebuild owner memory from slots produced by an earlier round.
    pub fn from_slots(
        table: &OwnershipTable,
        rank: usize,
        slots: impl IntoIterator<Item = AggregatedSlot>,
    ) -> Result<Self> {
        let mut owner = Self::allocate(table, rank)?;
        for slot in slots {
            let assignment = table.owner(slot.file, slot.variable, slot.slot)?;
            if assignment.rank != rank {
                return Err(PidxError::inconsistent(format!(
                    "slot ({}, {}, {}) belongs to rank {}, not {rank}",
                    slot.file, slot.variable, slot.slot, assignment.rank
                )));
            }
            if slot.bytes.len() != assignment.len_bytes {
                return Err(PidxError::inconsistent(format!(
                    "slot ({}, {}, {}) carries {} bytes, expected {}",
                    slot.file,
                    slot.variable,
                    slot.slot,
                    slot.bytes.len(),
                    assignment.len_bytes
                )));
            }
            let start = assignment.window_offset;
            owner.memory[start..start + assignment.len_bytes].copy_from_slice(&slot.bytes);
        }
        Ok(owner)
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn slots(&self) -> &[OwnedSlot] {
        &self.slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Hand the memory over to a window; leaves this value empty.
    pub fn take_memory(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.memory)
    }

    /// Take the memory back from a closed window.
    pub fn restore_memory(&mut self, memory: Vec<u8>) -> Result<()> {
        let expected: usize = self.slots.iter().map(|s| s.assignment.len_bytes).sum();
        if memory.len() != expected {
            return Err(PidxError::inconsistent(format!(
                "window returned {} bytes, rank {} owns {expected}",
                memory.len(),
                self.rank
            )));
        }
        self.memory = memory;
        Ok(())
    }

    /// Report each owned slot to the observer.
    pub fn announce(&self, config: &AggregationConfig) {
        for s in &self.slots {
            config.emit(&AggregationEvent::SlotAllocated {
                rank: self.rank,
                file: s.file,
                variable: s.variable,
                slot: s.slot,
                bytes: s.assignment.len_bytes as u64,
            });
        }
    }

    /// Split the memory into per-slot buffers.
    #[must_use]
    pub fn into_slots(self) -> Vec<AggregatedSlot> {
        let memory = self.memory;
        self.slots
            .into_iter()
            .map(|s| {
                let start = s.assignment.window_offset;
                AggregatedSlot {
                    file: s.file,
                    variable: s.variable,
                    slot: s.slot,
                    bytes: memory[start..start + s.assignment.len_bytes].to_vec(),
                }
            })
            .collect()
    }
}
