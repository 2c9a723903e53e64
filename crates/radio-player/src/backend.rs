//! The seam between the playback core and the audio stack.
//!
//! Backend calls are synchronous and never block: anything that completes
//! later (a play request, a decoder failure, new metadata) comes back as a
//! [`PlayerEvent`] tagged with the session that caused it, posted through the
//! [`EventSink`] handed to the backend.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{DecoderError, GraphError};
use crate::events::PlayerEvent;

/// Identifies one play-to-stop lifecycle.  Strictly increasing.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

/// What the runtime can do, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// A metadata-aware stream decoder exists.
    pub metadata_decoder: bool,
    /// A system now-playing surface exists.
    pub media_session: bool,
    /// PCM can be tapped for the analysis graph.
    pub analysis: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            metadata_decoder: true,
            media_session: true,
            analysis: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Cloneable path back into the controller loop.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PlayerEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: PlayerEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event sink: player loop gone");
        }
    }

    /// Non-async variant for synchronous backend code.  Drops the event when
    /// the queue is full.
    pub fn try_emit(&self, event: PlayerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("event sink: dropped event: {}", e);
        }
    }
}

/// A playback element: one stream at a time, its own volume.
pub trait MediaElement: Send {
    fn id(&self) -> ElementId;

    /// Request CORS-style read access to the content.  Without it the
    /// element plays but cannot feed the analysis graph.
    fn set_cross_origin(&mut self, anonymous: bool);

    fn set_src(&mut self, url: &str);

    fn src(&self) -> Option<&str>;

    fn load(&mut self);

    /// Start or resume.  Outcome arrives as `ElementPlaying` or
    /// `ElementPlayFailed` for `session`.
    fn play(&mut self, session: SessionId);

    fn pause(&mut self);

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    /// Stop and drop the current resource.
    fn unload(&mut self);

    /// Open a PCM source node on this element.
    fn create_source(&mut self) -> Result<Box<dyn SampleSource>, GraphError>;
}

/// PCM feed for the analyser.
pub trait SampleSource: Send {
    /// Append every sample that arrived since the last call (mono, -1..1).
    fn drain_into(&mut self, out: &mut Vec<f32>);

    fn disconnect(&mut self);
}

/// Processing context hosting the analyser and gain nodes.
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;

    fn resume(&mut self);

    fn set_output_gain(&mut self, gain: f32);
}

/// Metadata-capable decoder.  Drives the element it is attached to for the
/// lifetime of one session.
pub trait MetadataDecoder: Send {
    fn play(&mut self, element: &mut dyn MediaElement);

    fn stop(&mut self, element: &mut dyn MediaElement);

    /// Release the element; the decoder must not touch it afterwards.
    fn detach(&mut self, element: &mut dyn MediaElement);
}

pub trait AudioPlatform: Send {
    fn capabilities(&self) -> PlatformCapabilities;

    fn create_element(&mut self, sink: EventSink) -> Box<dyn MediaElement>;

    fn create_context(&mut self) -> Result<Box<dyn AudioContext>, GraphError>;

    fn create_decoder(
        &mut self,
        url: &str,
        session: SessionId,
        sink: EventSink,
    ) -> Result<Box<dyn MetadataDecoder>, DecoderError>;
}

/// A media element plus the taint flag the graph maintains for it.
pub struct ManagedElement {
    inner: Box<dyn MediaElement>,
    tainted: bool,
}

impl ManagedElement {
    pub fn new(inner: Box<dyn MediaElement>) -> Self {
        Self {
            inner,
            tainted: false,
        }
    }

    pub fn id(&self) -> ElementId {
        self.inner.id()
    }

    /// True once a source node has been bound to this element.  A tainted
    /// element is replaced, never re-bound.
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub(crate) fn mark_tainted(&mut self) {
        self.tainted = true;
    }

    pub fn get(&self) -> &dyn MediaElement {
        self.inner.as_ref()
    }

    pub fn get_mut(&mut self) -> &mut dyn MediaElement {
        self.inner.as_mut()
    }
}
