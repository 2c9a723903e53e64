use std::collections::BTreeMap;
use std::sync::Arc;

use radio_proto::protocol::Command;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::{ElementId, SessionId};
use crate::error::{DecoderError, PlaybackError};
use crate::media_session::MediaAction;

/// In-band track metadata.  Transient: delivered to observers, never stored
/// beyond the current title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEvent {
    pub title: String,
    /// Every key/value pair of the metadata block as received.
    pub raw: BTreeMap<String, String>,
}

impl MetadataEvent {
    /// Build from a raw block, taking `StreamTitle` (or `title`) as the
    /// track title.  Blocks without a usable title yield `None`.
    pub fn from_raw(raw: BTreeMap<String, String>) -> Option<Self> {
        let title = raw
            .get("StreamTitle")
            .or_else(|| raw.get("title"))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && !t.trim_matches('-').trim().is_empty())?;
        Some(Self { title, raw })
    }
}

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum PlayerEvent {
    /// A command from the API, a playlist or the media-session router.
    Command(Command),
    /// A transport key from the system media surface.
    MediaAction(MediaAction),
    ElementPlaying {
        session: SessionId,
        element: ElementId,
    },
    ElementPlayFailed {
        session: SessionId,
        element: ElementId,
        error: PlaybackError,
    },
    DecoderMetadata {
        session: SessionId,
        metadata: MetadataEvent,
    },
    DecoderError {
        session: SessionId,
        error: DecoderError,
    },
    /// Settle delay after a decoder teardown elapsed.
    FallbackReady { session: SessionId },
    /// Delayed analysis-source bind for a metadata-aware session.
    ConnectSource { session: SessionId },
    Shutdown,
}

/// What observers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum PlayerNotification {
    StateChanged { is_playing: bool },
    Metadata { metadata: MetadataEvent },
}

/// Listener for the two observable streams.  Implementations run on the
/// controller loop and must return quickly.
pub trait PlayerObserver: Send + Sync {
    fn on_state_change(&self, _is_playing: bool) {}

    fn on_metadata(&self, _metadata: &MetadataEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Registered observers.  Several consumers (API, media bridge, tests) can
/// listen without replacing each other.
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Arc<dyn PlayerObserver>)>,
}

impl Observers {
    pub fn subscribe(&mut self, observer: Arc<dyn PlayerObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(i, _)| *i != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state_changed(&self, is_playing: bool) {
        for (_, o) in &self.entries {
            o.on_state_change(is_playing);
        }
    }

    pub fn metadata(&self, metadata: &MetadataEvent) {
        for (_, o) in &self.entries {
            o.on_metadata(metadata);
        }
    }
}

/// Forwards notifications onto a broadcast channel for async consumers.
pub struct BroadcastObserver {
    tx: broadcast::Sender<PlayerNotification>,
}

impl BroadcastObserver {
    pub fn new(tx: broadcast::Sender<PlayerNotification>) -> Self {
        Self { tx }
    }
}

impl PlayerObserver for BroadcastObserver {
    fn on_state_change(&self, is_playing: bool) {
        // no receivers is fine
        let _ = self
            .tx
            .send(PlayerNotification::StateChanged { is_playing });
    }

    fn on_metadata(&self, metadata: &MetadataEvent) {
        let _ = self.tx.send(PlayerNotification::Metadata {
            metadata: metadata.clone(),
        });
    }
}
