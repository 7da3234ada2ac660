//! Per-round aggregation settings.

use std::fmt;
use std::sync::Arc;

use pidx_error::{PidxError, Result};
use pidx_types::{DataType, DatasetConfig, LayoutPolicy};

use crate::diagnostics::{AggregationEvent, AggregationObserver, NoOpObserver};

/// Everything the engine needs besides the layout and the fabric.
#[derive(Clone)]
pub struct AggregationConfig {
    pub dataset: DatasetConfig,
    /// One entry per variable, in variable order.
    pub datatypes: Vec<DataType>,
    pub observer: Arc<dyn AggregationObserver>,
}

impl AggregationConfig {
    /// Validated config with the no-op observer.
    pub fn new(dataset: DatasetConfig, datatypes: Vec<DataType>) -> Result<Self> {
        dataset.validate()?;
        if datatypes.is_empty() {
            return Err(PidxError::precondition("at least one variable is required"));
        }
        Ok(Self {
            dataset,
            datatypes,
            observer: Arc::new(NoOpObserver),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn AggregationObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.datatypes.len()
    }

    /// Slots each value component of a file is split into.
    #[must_use]
    pub fn fanout(&self) -> u64 {
        u64::from(self.dataset.aggregation_factor)
    }

    #[must_use]
    pub const fn layout_policy(&self) -> LayoutPolicy {
        self.dataset.layout_policy
    }

    /// Forward `event` to the configured observer.
    pub fn emit(&self, event: &AggregationEvent) {
        self.observer.on_event(event);
    }
}

impl fmt::Debug for AggregationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationConfig")
            .field("dataset", &self.dataset)
            .field("datatypes", &self.datatypes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingObserver;

    #[test]
    fn test_requires_variables() {
        assert!(AggregationConfig::new(DatasetConfig::default(), Vec::new()).is_err());
        let bad = DatasetConfig {
            aggregation_factor: 0,
            ..DatasetConfig::default()
        };
        assert!(AggregationConfig::new(bad, vec![DataType::FLOAT32]).is_err());
    }

    #[test]
    fn test_observer_is_swappable() {
        let recorder = Arc::new(RecordingObserver::new());
        let config = AggregationConfig::new(DatasetConfig::default(), vec![DataType::FLOAT64])
            .expect("config")
            .with_observer(recorder.clone());
        config.emit(&AggregationEvent::EpochClosed {
            direction: crate::diagnostics::Direction::Write,
            rank: 0,
            legs: 0,
            bytes: 0,
        });
        assert_eq!(recorder.len(), 1);
        assert_eq!(config.fanout(), 1);
        assert!(format!("{config:?}").contains("AggregationConfig"));
    }
}
