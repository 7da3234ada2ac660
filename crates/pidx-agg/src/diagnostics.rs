//! Structured aggregation diagnostics.
//!
//! The engine reports what it does through an [`AggregationObserver`]
//! carried in [`crate::AggregationConfig`]. Observers are called from rank
//! threads while an epoch is open; they must not block on other ranks.

use std::io::Write;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Event schema
// ---------------------------------------------------------------------------

/// Direction of a transfer epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Contributors put HZ samples into owner buffers.
    Write,
    /// Contributors get HZ samples back out of owner buffers.
    Read,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AggregationEvent {
    /// The ownership table was computed.
    OwnershipBuilt {
        files: usize,
        slots: usize,
        interval: usize,
        process_count: usize,
    },
    /// A rank reserved the window region of one owned slot.
    SlotAllocated {
        rank: usize,
        file: u64,
        variable: usize,
        slot: usize,
        bytes: u64,
    },
    /// One leg of a planned transfer was executed.
    Transfer {
        direction: Direction,
        rank: usize,
        target: usize,
        file: u64,
        variable: usize,
        slot: usize,
        target_offset: usize,
        bytes: usize,
        local: bool,
    },
    /// A fence pair completed.
    EpochClosed {
        direction: Direction,
        rank: usize,
        legs: usize,
        bytes: usize,
    },
    /// Content hash of a finished slot buffer.
    SlotDigest {
        rank: usize,
        file: u64,
        variable: usize,
        slot: usize,
        xxh3: u64,
    },
}

impl AggregationEvent {
    /// Stable label used in logs.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::OwnershipBuilt { .. } => "ownership_built",
            Self::SlotAllocated { .. } => "slot_allocated",
            Self::Transfer { .. } => "transfer",
            Self::EpochClosed { .. } => "epoch_closed",
            Self::SlotDigest { .. } => "slot_digest",
        }
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Receiver of [`AggregationEvent`]s.
pub trait AggregationObserver: Send + Sync {
    fn on_event(&self, event: &AggregationEvent);
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl AggregationObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &AggregationEvent) {}
}

/// Writes one JSON object per line.
pub struct JsonLinesObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> W {
        let mut out = self.out.into_inner();
        if let Err(err) = out.flush() {
            warn!(error = %err, "flushing diagnostics sink failed");
        }
        out
    }
}

impl<W: Write + Send> AggregationObserver for JsonLinesObserver<W> {
    fn on_event(&self, event: &AggregationEvent) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"));
        if let Err(err) = written {
            warn!(kind = event.kind_str(), error = %err, "dropping diagnostics event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AggregationEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events seen so far, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<AggregationEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the recorded events.
    pub fn drain(&self) -> Vec<AggregationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AggregationObserver for RecordingObserver {
    fn on_event(&self, event: &AggregationEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Seek, SeekFrom};

    use super::*;

    fn sample_events() -> Vec<AggregationEvent> {
        vec![
            AggregationEvent::OwnershipBuilt {
                files: 2,
                slots: 4,
                interval: 1,
                process_count: 4,
            },
            AggregationEvent::Transfer {
                direction: Direction::Write,
                rank: 1,
                target: 3,
                file: 0,
                variable: 0,
                slot: 2,
                target_offset: 64,
                bytes: 128,
                local: false,
            },
            AggregationEvent::EpochClosed {
                direction: Direction::Read,
                rank: 0,
                legs: 7,
                bytes: 896,
            },
        ]
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(&sample_events()[1]).expect("serialize");
        assert_eq!(json["event"], "transfer");
        assert_eq!(json["direction"], "write");
        assert_eq!(json["bytes"], 128);
    }

    #[test]
    fn test_noop_observer_accepts_events() {
        let observer = NoOpObserver;
        for event in sample_events() {
            observer.on_event(&event);
        }
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        assert!(observer.is_empty());
        for event in sample_events() {
            observer.on_event(&event);
        }
        let kinds: Vec<_> = observer.events().iter().map(AggregationEvent::kind_str).collect();
        assert_eq!(kinds, vec!["ownership_built", "transfer", "epoch_closed"]);
        assert_eq!(observer.drain().len(), 3);
        assert_eq!(observer.len(), 0);
    }

    #[test]
    fn test_json_lines_to_file() {
        let file = tempfile::tempfile().expect("tempfile");
        let observer = JsonLinesObserver::new(file);
        for event in sample_events() {
            observer.on_event(&event);
        }
        let mut file = observer.into_inner();
        file.seek(SeekFrom::Start(0)).expect("rewind");
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .expect("read back");
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).expect("json");
        assert_eq!(first["event"], "ownership_built");
        assert_eq!(first["process_count"], 4);
    }
}
