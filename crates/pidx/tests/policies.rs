mod common;

use common::{assemble, init_tracing, patch_group, reference_files, run_ranks};
use pidx::{
    AggregatedSlot, AggregationConfig, AggregationRound, BitPattern, Communicator, DataType,
    DatasetConfig, GridBox, LayoutPolicy, PidxError, agree_layout,
};

fn dataset(policy: LayoutPolicy) -> DatasetConfig {
    DatasetConfig {
        bits_per_block: 4,
        blocks_per_file: 2,
        aggregation_factor: 2,
        layout_policy: policy,
        ..DatasetConfig::default()
    }
}

fn regions() -> Vec<GridBox> {
    vec![
        GridBox::from_offset_size([0; 5], [5, 3, 8, 1, 1]),
        GridBox::from_offset_size([5, 0, 0, 0, 0], [3, 3, 8, 1, 1]),
        GridBox::from_offset_size([2, 6, 1, 0, 0], [4, 2, 6, 1, 1]),
    ]
}

fn write_all(policy: LayoutPolicy) -> Vec<AggregatedSlot> {
    let pattern = BitPattern::parse("V012012012").expect("pattern");
    let regions = regions();
    let datatypes = vec![DataType::FLOAT32, DataType::UINT8];
    let layout = agree_layout(&pattern, &dataset(policy), &regions).expect("layout");
    let config = AggregationConfig::new(dataset(policy), datatypes.clone()).expect("config");
    let round = AggregationRound::new(&pattern, &layout, &config).expect("round");

    let mut slots: Vec<AggregatedSlot> = run_ranks(regions.len(), |rank| {
        let patches = patch_group(regions[rank.rank()], &datatypes);
        round.write(&rank, &patches).expect("write")
    })
    .into_iter()
    .flatten()
    .collect();
    assert_eq!(
        assemble(&slots),
        reference_files(&pattern, &layout, &datatypes, &regions)
    );
    slots.sort_by_key(|s| (s.file, s.variable, s.slot));
    slots
}

#[test]
fn test_flattened_and_block_aware_agree() {
    init_tracing();
    assert_eq!(
        write_all(LayoutPolicy::Flattened),
        write_all(LayoutPolicy::BlockAware)
    );
}

#[test]
fn test_dense_full_domain_matches_block_aware() {
    init_tracing();
    let pattern = BitPattern::parse("V012012").expect("pattern");
    let region = GridBox::from_dims(pattern.domain());
    let datatypes = vec![DataType::FLOAT64];
    let mut outputs = Vec::new();
    for policy in [LayoutPolicy::Dense, LayoutPolicy::BlockAware] {
        let layout = agree_layout(&pattern, &dataset(policy), &[region]).expect("layout");
        let config = AggregationConfig::new(dataset(policy), datatypes.clone()).expect("config");
        let round = AggregationRound::new(&pattern, &layout, &config).expect("round");
        let slots = run_ranks(1, |rank| {
            round
                .write(&rank, &patch_group(region, &datatypes))
                .expect("write")
        })
        .pop()
        .expect("rank 0");
        assert_eq!(
            assemble(&slots),
            reference_files(&pattern, &layout, &datatypes, &[region])
        );
        outputs.push(slots);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_dense_rejects_region_with_holes() {
    init_tracing();
    let pattern = BitPattern::parse("V012012").expect("pattern");
    let region = GridBox::from_offset_size([0; 5], [3, 2, 2, 1, 1]);
    let datatypes = vec![DataType::FLOAT32];
    let layout = agree_layout(&pattern, &dataset(LayoutPolicy::Dense), &[region]).expect("layout");
    let config =
        AggregationConfig::new(dataset(LayoutPolicy::Dense), datatypes.clone()).expect("config");
    let round = AggregationRound::new(&pattern, &layout, &config).expect("round");
    let err = run_ranks(1, |rank| {
        round
            .write(&rank, &patch_group(region, &datatypes))
            .expect_err("dense with holes")
    })
    .pop()
    .expect("rank 0");
    assert!(matches!(err, PidxError::Inconsistent { .. }), "{err}");
}
