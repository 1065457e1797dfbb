//! Events raised by a keyword detector and the observer interfaces that
//! receive them.

use crate::engine::EngineDetection;
use crate::stream::{Index, Stream};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a keyword detector's processing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    /// Not yet reading, or the stream reached end-of-stream
    StreamClosed,

    /// Audio is flowing through the detector
    Active,

    /// Processing stopped after an overrun or engine failure
    Error,
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorState::StreamClosed => "STREAM_CLOSED",
            DetectorState::Active => "ACTIVE",
            DetectorState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One keyword hit, addressed in the index space of the stream it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub keyword: String,
    pub begin_index: Index,
    pub end_index: Index,
    /// Opaque engine-specific payload
    pub metadata: Option<Arc<[u8]>>,
}

impl DetectionEvent {
    /// Translate an engine result, reported relative to the first sample of a
    /// chunk, into absolute stream indices.
    pub fn from_engine(chunk_start: Index, detection: EngineDetection) -> Self {
        Self {
            begin_index: offset_index(chunk_start, detection.begin_offset),
            end_index: offset_index(chunk_start, detection.end_offset),
            keyword: detection.keyword,
            metadata: detection.metadata.map(Arc::<[u8]>::from),
        }
    }
}

fn offset_index(base: Index, offset: i64) -> Index {
    if offset >= 0 {
        base.saturating_add(offset.unsigned_abs())
    } else {
        base.saturating_sub(offset.unsigned_abs())
    }
}

/// Receives keyword detections.
///
/// Called synchronously on the detector's processing thread; long-running work
/// should be handed off elsewhere.
pub trait KeywordObserver: Send + Sync {
    fn on_keyword_detected(&self, stream: &Stream, event: &DetectionEvent);
}

/// Receives detector state transitions
pub trait DetectorStateObserver: Send + Sync {
    fn on_state_changed(&self, state: DetectorState);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(begin_offset: i64, end_offset: i64) -> EngineDetection {
        EngineDetection {
            keyword: "aether".to_string(),
            begin_offset,
            end_offset,
            metadata: Some(vec![1, 2, 3]),
        }
    }

    #[test]
    fn test_offsets_become_absolute() {
        let event = DetectionEvent::from_engine(10_000, detection(-2_480, 160));
        assert_eq!(event.begin_index, 7_520);
        assert_eq!(event.end_index, 10_160);
        assert_eq!(event.keyword, "aether");
        assert_eq!(event.metadata.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_offsets_before_stream_start_clamp_to_zero() {
        let event = DetectionEvent::from_engine(100, detection(-500, 50));
        assert_eq!(event.begin_index, 0);
        assert_eq!(event.end_index, 150);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DetectorState::StreamClosed.to_string(), "STREAM_CLOSED");
        assert_eq!(DetectorState::Active.to_string(), "ACTIVE");
        assert_eq!(DetectorState::Error.to_string(), "ERROR");
    }
}
