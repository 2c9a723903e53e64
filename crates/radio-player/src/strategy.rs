//! Playback strategy selection and decoder-error classification.

use std::sync::OnceLock;

use radio_proto::protocol::PlaybackStrategy;
use regex::RegexSet;

use crate::backend::PlatformCapabilities;
use crate::error::{DecoderError, DecoderErrorKind};

/// Where a session is in the metadata/plain state machine.
///
/// ```text
/// MetadataAttempt -> MetadataActive   (first metadata or element playing)
/// MetadataAttempt | MetadataActive -> FallbackPending -> FallbackPlain
/// ```
/// `FallbackPlain` is terminal and is the entry state when no decoder exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    MetadataAttempt,
    MetadataActive,
    /// Decoder torn down, replacement element not built yet.
    FallbackPending,
    FallbackPlain,
}

impl SessionPhase {
    pub fn strategy(self) -> PlaybackStrategy {
        match self {
            SessionPhase::MetadataAttempt | SessionPhase::MetadataActive => {
                PlaybackStrategy::MetadataAware
            }
            SessionPhase::FallbackPending | SessionPhase::FallbackPlain => PlaybackStrategy::Plain,
        }
    }

    pub fn is_metadata(self) -> bool {
        self.strategy() == PlaybackStrategy::MetadataAware
    }
}

/// Verdict on a decoder error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stream refused by origin policy: switch to plain playback.
    CrossOrigin,
    /// Fetch failed: switch to plain playback.
    Network,
    /// Neither; logged, no switch.
    Unclassified,
}

impl ErrorClass {
    pub fn triggers_fallback(self) -> bool {
        !matches!(self, ErrorClass::Unclassified)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    capabilities: PlatformCapabilities,
}

impl StrategySelector {
    pub fn new(capabilities: PlatformCapabilities) -> Self {
        Self { capabilities }
    }

    /// Initial phase for a new session.
    pub fn select(&self) -> SessionPhase {
        if self.capabilities.metadata_decoder {
            SessionPhase::MetadataAttempt
        } else {
            SessionPhase::FallbackPlain
        }
    }

    pub fn classify(&self, error: &DecoderError) -> ErrorClass {
        classify(error)
    }
}

const CROSS_ORIGIN_MARKERS: &[&str] = &[r"CORS", r"(?i)cross-origin"];
const NETWORK_MARKERS: &[&str] = &[r"TypeError", r"Failed to fetch", r"NetworkError"];

fn marker_sets() -> &'static (RegexSet, RegexSet) {
    static SETS: OnceLock<(RegexSet, RegexSet)> = OnceLock::new();
    SETS.get_or_init(|| {
        let build = |p: &[&str]| RegexSet::new(p).unwrap_or_else(|_| RegexSet::empty());
        (build(CROSS_ORIGIN_MARKERS), build(NETWORK_MARKERS))
    })
}

/// Structured kind first; the marker match over message and cause only runs
/// for decoders that report `Unknown`.
pub fn classify(error: &DecoderError) -> ErrorClass {
    match error.kind {
        DecoderErrorKind::CrossOrigin => return ErrorClass::CrossOrigin,
        DecoderErrorKind::Network => return ErrorClass::Network,
        DecoderErrorKind::Http(_) | DecoderErrorKind::Decode => return ErrorClass::Unclassified,
        DecoderErrorKind::Unknown => {}
    }

    let (cross_origin, network) = marker_sets();
    let texts = std::iter::once(error.message.as_str()).chain(error.cause.as_deref());
    let mut class = ErrorClass::Unclassified;
    for text in texts {
        if cross_origin.is_match(text) {
            return ErrorClass::CrossOrigin;
        }
        if network.is_match(text) {
            class = ErrorClass::Network;
        }
    }
    class
}
