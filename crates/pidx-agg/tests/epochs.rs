use std::thread;

use pidx_agg::{
    AggregationConfig, AggregationEngine, Communicator, EpochSummary, LocalFabric, LocalRank,
    OwnerBuffers, OwnershipTable, RmaFabric, RmaWindow,
};
use pidx_blocks::BlockLayout;
use pidx_encode::{HzBuffer, Patch};
use pidx_error::{PidxError, Result};
use pidx_hz::hz_to_coord;
use pidx_types::{BitPattern, DataType, DatasetConfig, GridBox, LayoutPolicy};

fn dataset(fanout: u32, policy: LayoutPolicy) -> DatasetConfig {
    DatasetConfig {
        bits_per_block: 4,
        blocks_per_file: 16,
        aggregation_factor: fanout,
        layout_policy: policy,
        ..DatasetConfig::default()
    }
}

fn pattern() -> BitPattern {
    BitPattern::parse("V00000000").expect("pattern")
}

/// `region` of `pattern` with sample value `x`.
fn encoded_in(pattern: &BitPattern, region: GridBox, layout: &BlockLayout) -> HzBuffer {
    let patch = Patch::from_fn(region, DataType::FLOAT32, |c, out| {
        out.copy_from_slice(&(c[0] as f32).to_ne_bytes());
    })
    .expect("patch");
    let mut buffer = HzBuffer::new(pattern.clone(), DataType::FLOAT32);
    buffer.allocate(region, layout).expect("allocate");
    buffer.populate(&patch).expect("populate");
    buffer.compact().expect("compact");
    buffer
}

/// Whole 1-D domain.
fn encoded(layout: &BlockLayout) -> HzBuffer {
    encoded_in(&pattern(), GridBox::from_dims(pattern().domain()), layout)
}

struct RankSetup {
    config: AggregationConfig,
    layout: BlockLayout,
    buffers: Vec<HzBuffer>,
}

/// Each rank writes with its own setup; returns the epoch outcome and the
/// rank's window memory.
fn run_write(setups: Vec<RankSetup>) -> Vec<(Result<EpochSummary>, Vec<u8>)> {
    let fabric = LocalFabric::new(setups.len()).expect("fabric");
    thread::scope(|scope| {
        let handles: Vec<_> = fabric
            .ranks()
            .into_iter()
            .zip(setups)
            .map(|(rank, setup)| scope.spawn(move || write_on(&rank, &setup)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread"))
            .collect()
    })
}

fn write_on(rank: &LocalRank, setup: &RankSetup) -> (Result<EpochSummary>, Vec<u8>) {
    let table = OwnershipTable::build(&setup.layout, &setup.config, rank.size()).expect("table");
    let mut owner = OwnerBuffers::allocate(&table, rank.rank()).expect("owner");
    let mut window = rank.create_window(owner.take_memory()).expect("window");
    let engine =
        AggregationEngine::new(&setup.config, &setup.layout, &table, rank.rank()).expect("engine");
    let outcome = engine.write(&mut window, &setup.buffers);
    (outcome, window.into_local().expect("memory"))
}

fn setup(policy: LayoutPolicy, contribute: bool) -> RankSetup {
    let config =
        AggregationConfig::new(dataset(4, policy), vec![DataType::FLOAT32]).expect("config");
    let layout = BlockLayout::from_present_blocks(&config.dataset, 8, 0..16).expect("layout");
    let buffers = if contribute {
        vec![encoded(&layout)]
    } else {
        Vec::new()
    };
    RankSetup {
        config,
        layout,
        buffers,
    }
}

fn value_at_hz(hz: u64) -> f32 {
    hz_to_coord(&pattern(), hz).expect("coord")[0] as f32
}

#[test]
fn test_flattened_batches_remote_legs_per_target() {
    // Slots of 64 samples alternate between the two ranks.
    let mut summaries = Vec::new();
    for policy in [LayoutPolicy::BlockAware, LayoutPolicy::Flattened] {
        let results = run_write(vec![setup(policy, true), setup(policy, false)]);
        let mut results = results.into_iter();
        let (outcome, _) = results.next().expect("rank 0");
        let (idle, memory) = results.next().expect("rank 1");
        summaries.push(outcome.expect("rank 0 epoch"));
        assert_eq!(idle.expect("rank 1 epoch").legs, 0);

        // Rank 1 owns slots 1 and 3: hz 64..128 and 192..256.
        let values: Vec<f32> = memory
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes(b.try_into().expect("4 bytes")))
            .collect();
        let expected: Vec<f32> = (64..128).chain(192..256).map(value_at_hz).collect();
        assert_eq!(values, expected);
    }
    let (split, flat) = (summaries[0], summaries[1]);
    assert_eq!(split.bytes, 256 * 4);
    assert_eq!(flat.bytes, 256 * 4);
    assert_eq!(split.legs, flat.legs);
    assert_eq!(split.remote_ops, 2);
    assert_eq!(flat.remote_ops, 1);
}

#[test]
fn test_failed_put_still_closes_the_epoch() {
    // Rank 1 sizes its window for half the blocks; rank 0 believes every
    // block is present and overruns it.
    let full = setup(LayoutPolicy::BlockAware, true);
    let config = AggregationConfig::new(
        dataset(4, LayoutPolicy::BlockAware),
        vec![DataType::FLOAT32],
    )
    .expect("config");
    let layout = BlockLayout::from_present_blocks(&config.dataset, 8, 0..8).expect("layout");
    let half = RankSetup {
        config,
        layout,
        buffers: Vec::new(),
    };

    let results = run_write(vec![full, half]);
    let err = results[0].0.as_ref().expect_err("overrun");
    assert!(matches!(err, PidxError::Transport { op: "put", rank: 1, .. }), "{err}");
    assert!(results[1].0.is_ok());
}

#[test]
fn test_failed_plan_still_joins_the_epoch() {
    // Dense needs hole-free levels; rank 1's x-line leaves gaps in level 4.
    let cube = BitPattern::parse("V012012").expect("pattern");
    let setup_for = |region: GridBox| {
        let config = AggregationConfig::new(
            dataset(2, LayoutPolicy::Dense),
            vec![DataType::FLOAT32],
        )
        .expect("config");
        let layout = BlockLayout::from_present_blocks(&config.dataset, cube.max_level(), 0..4)
            .expect("layout");
        let buffers = vec![encoded_in(&cube, region, &layout)];
        RankSetup {
            config,
            layout,
            buffers,
        }
    };

    let results = run_write(vec![
        setup_for(GridBox::from_dims(cube.domain())),
        setup_for(GridBox::from_offset_size([0; 5], [4, 1, 1, 1, 1])),
    ]);
    let summary = results[0].0.as_ref().expect("rank 0 epoch");
    assert_eq!(summary.bytes, 64 * 4);
    let err = results[1].0.as_ref().expect_err("holey dense level");
    assert!(matches!(err, PidxError::Inconsistent { .. }), "{err}");
}
