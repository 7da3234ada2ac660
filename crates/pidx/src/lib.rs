//! Parallel HZ-order indexing and aggregation.
//!
//! Ranks encode their patches into hierarchical Z-order, agree on which
//! blocks of the curve hold data, and move every sample to the rank that
//! owns its slot of its data file through one-sided transfers. The
//! [`AggregationRound`] type strings those stages together; the lower
//! crates stay available for callers that drive them individually.

pub mod dataset;
pub mod round;

pub use dataset::{agree_layout, assemble_file, data_file_name};
pub use round::AggregationRound;

pub use pidx_agg::{
    AggregatedSlot, AggregationConfig, AggregationEngine, AggregationEvent,
    AggregationMetricsSnapshot, AggregationObserver, Communicator, Direction, EpochSummary,
    JsonLinesObserver, LocalFabric, LocalRank, LocalWindow, NoOpObserver, OwnerBuffers,
    OwnershipTable, RecordingObserver, RmaFabric, RmaWindow, aggregation_metrics_snapshot,
    reset_aggregation_metrics,
};
pub use pidx_blocks::{BlockLayout, FileHeader, header_size};
pub use pidx_encode::{HzBuffer, HzBufferState, Patch};
pub use pidx_error::{ErrorCategory, PidxError, Result};
pub use pidx_hz::{align, coord_to_hz, hz_to_coord, level_of};
pub use pidx_types::{
    AxisPriority, BitPattern, Coord, DataType, DatasetConfig, GridBox, LayoutPolicy,
};
