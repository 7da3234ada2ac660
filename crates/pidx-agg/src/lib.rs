//! Aggregation of HZ-ordered samples onto file owners.
//!
//! Ranks agree on a [`BlockLayout`](pidx_blocks::BlockLayout) and derive
//! the same [`OwnershipTable`]. Each rank then exposes the memory of the
//! slots it owns through an [`RmaWindow`] and moves its encoded samples
//! there with an [`AggregationEngine`], one fence epoch per direction.

pub mod config;
pub mod diagnostics;
pub mod engine;
mod flatten;
pub mod instrumentation;
pub mod local;
pub mod owner;
pub mod ownership;
pub mod plan;
pub mod runs;
pub mod transport;

pub use config::AggregationConfig;
pub use diagnostics::{
    AggregationEvent, AggregationObserver, Direction, JsonLinesObserver, NoOpObserver,
    RecordingObserver,
};
pub use engine::{AggregationEngine, EpochSummary, PlannedLeg, skip_epoch};
pub use instrumentation::{
    AggregationMetricsSnapshot, aggregation_metrics_snapshot, reset_aggregation_metrics,
};
pub use local::{LocalFabric, LocalRank, LocalWindow};
pub use owner::{AggregatedSlot, OwnerBuffers};
pub use ownership::{OwnedSlot, OwnershipTable, SlotAssignment};
pub use plan::{Leg, TransferPlan, plan_transfer};
pub use runs::{Run, extract_runs};
pub use transport::{Communicator, RmaFabric, RmaWindow};
