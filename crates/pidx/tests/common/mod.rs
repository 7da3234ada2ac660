#![allow(dead_code)]

use std::collections::BTreeMap;
use std::thread;

use pidx::{
    AggregatedSlot, BitPattern, BlockLayout, DataType, GridBox, LocalFabric, LocalRank, Patch,
    coord_to_hz,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Run `body` once per rank, each on its own thread, and collect the
/// results in rank order.
pub fn run_ranks<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalRank) -> T + Sync,
{
    let fabric = LocalFabric::new(size).expect("fabric");
    let body = &body;
    thread::scope(|scope| {
        let handles: Vec<_> = fabric
            .ranks()
            .into_iter()
            .map(|rank| scope.spawn(move || body(rank)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Deterministic sample bytes for `coord` of `variable`.
pub fn sample_bytes(coord: &[u64; 5], variable: usize, datatype: DataType, out: &mut [u8]) {
    let base = coord[0] + 37 * coord[1] + 1009 * coord[2] + 7919 * variable as u64;
    for (i, value) in out.chunks_exact_mut(datatype.bytes_per_value).enumerate() {
        let v = base.wrapping_mul(31).wrapping_add(i as u64 + 1);
        value.copy_from_slice(&v.to_le_bytes()[..datatype.bytes_per_value]);
    }
}

pub fn patch_group(region: GridBox, datatypes: &[DataType]) -> Vec<Patch> {
    datatypes
        .iter()
        .enumerate()
        .map(|(variable, &datatype)| {
            Patch::from_fn(region, datatype, |c, out| {
                sample_bytes(c, variable, datatype, out);
            })
            .expect("patch")
        })
        .collect()
}

/// What every (file, variable) payload must look like after aggregation,
/// computed sample by sample straight from the curve and the layout.
pub fn reference_files(
    pattern: &BitPattern,
    layout: &BlockLayout,
    datatypes: &[DataType],
    regions: &[GridBox],
) -> BTreeMap<(u64, usize), Vec<u8>> {
    let spb = layout.samples_per_block();
    let spf = layout.samples_per_file();
    let mut files = BTreeMap::new();
    for &file in layout.existing_files() {
        let samples = layout.samples_in_file(file).expect("file") as usize;
        for (variable, datatype) in datatypes.iter().enumerate() {
            files.insert(
                (file, variable),
                vec![0_u8; samples * datatype.bytes_per_sample()],
            );
        }
    }
    for region in regions {
        for coord in region.points() {
            let hz = coord_to_hz(pattern, &coord).expect("hz");
            let block = layout.block_of(hz);
            if !layout.block_present(block) {
                continue;
            }
            let file = layout.file_of(hz);
            let neg = layout.negative_offset(block).expect("present");
            let position = (hz - file * spf - neg * spb) as usize;
            for (variable, &datatype) in datatypes.iter().enumerate() {
                let bps = datatype.bytes_per_sample();
                let image = files.get_mut(&(file, variable)).expect("existing file");
                sample_bytes(
                    &coord,
                    variable,
                    datatype,
                    &mut image[position * bps..(position + 1) * bps],
                );
            }
        }
    }
    files
}

/// Concatenate slots per (file, variable) in slot order.
pub fn assemble(slots: &[AggregatedSlot]) -> BTreeMap<(u64, usize), Vec<u8>> {
    let mut sorted: Vec<&AggregatedSlot> = slots.iter().collect();
    sorted.sort_by_key(|s| (s.file, s.variable, s.slot));
    let mut files: BTreeMap<(u64, usize), Vec<u8>> = BTreeMap::new();
    for slot in sorted {
        files
            .entry((slot.file, slot.variable))
            .or_default()
            .extend_from_slice(&slot.bytes);
    }
    files
}
