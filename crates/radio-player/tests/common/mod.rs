#![allow(dead_code)]

//! In-memory audio platform that records every backend call.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use radio_player::backend::{
    AudioContext, AudioPlatform, ContextState, ElementId, EventSink, MediaElement,
    MetadataDecoder, PlatformCapabilities, SampleSource, SessionId,
};
use radio_player::controller::{PlaybackController, PlayerContext, PlayerHandle, TrackNavigator};
use radio_player::error::{DecoderError, DecoderErrorKind, GraphError};
use radio_player::events::PlayerEvent;
use radio_player::media_session::SharedMediaSession;
use radio_proto::config::PlayerConfig;
use radio_proto::protocol::Station;

#[derive(Debug, Clone)]
pub struct ElementRecord {
    pub id: ElementId,
    pub src: Option<String>,
    pub volume: f32,
    pub cross_origin: bool,
    pub plays: Vec<SessionId>,
    pub pauses: usize,
    pub unloaded: bool,
    pub sources: usize,
}

#[derive(Debug, Clone)]
pub struct DecoderRecord {
    pub url: String,
    pub session: SessionId,
    pub plays: usize,
    pub stops: usize,
    pub detached: bool,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub elements: Vec<ElementRecord>,
    pub decoders: Vec<DecoderRecord>,
    pub contexts: usize,
    pub gain: Option<f32>,
    pub sources_disconnected: usize,
    /// Make `create_decoder` fail synchronously.
    pub refuse_decoders: bool,
    /// Make `create_source` report restricted content on every element.
    pub refuse_sources: bool,
}

impl FakeState {
    pub fn element(&self) -> &ElementRecord {
        self.elements.last().expect("controller always owns an element")
    }

    pub fn decoder(&self) -> &DecoderRecord {
        self.decoders.last().expect("no decoder created")
    }
}

pub type Shared = Arc<Mutex<FakeState>>;

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap()
}

pub struct FakePlatform {
    state: Shared,
    capabilities: PlatformCapabilities,
}

impl AudioPlatform for FakePlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn create_element(&mut self, sink: EventSink) -> Box<dyn MediaElement> {
        let mut st = lock(&self.state);
        let id = ElementId(st.elements.len() as u64 + 1);
        st.elements.push(ElementRecord {
            id,
            src: None,
            volume: 1.0,
            cross_origin: false,
            plays: Vec::new(),
            pauses: 0,
            unloaded: false,
            sources: 0,
        });
        Box::new(FakeElement {
            id,
            idx: st.elements.len() - 1,
            state: self.state.clone(),
            sink,
        })
    }

    fn create_context(&mut self) -> Result<Box<dyn AudioContext>, GraphError> {
        lock(&self.state).contexts += 1;
        Ok(Box::new(FakeContext {
            state: self.state.clone(),
            suspended: true,
        }))
    }

    fn create_decoder(
        &mut self,
        url: &str,
        session: SessionId,
        _sink: EventSink,
    ) -> Result<Box<dyn MetadataDecoder>, DecoderError> {
        let mut st = lock(&self.state);
        if st.refuse_decoders {
            return Err(DecoderError::new(DecoderErrorKind::Unknown, "decoder refused"));
        }
        st.decoders.push(DecoderRecord {
            url: url.to_string(),
            session,
            plays: 0,
            stops: 0,
            detached: false,
        });
        Ok(Box::new(FakeDecoder {
            idx: st.decoders.len() - 1,
            url: url.to_string(),
            session,
            state: self.state.clone(),
        }))
    }
}

struct FakeElement {
    id: ElementId,
    idx: usize,
    state: Shared,
    sink: EventSink,
}

impl FakeElement {
    fn with<R>(&self, f: impl FnOnce(&mut ElementRecord) -> R) -> R {
        f(&mut lock(&self.state).elements[self.idx])
    }
}

impl MediaElement for FakeElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn set_cross_origin(&mut self, anonymous: bool) {
        self.with(|e| e.cross_origin = anonymous);
    }

    fn set_src(&mut self, url: &str) {
        self.with(|e| {
            e.src = Some(url.to_string());
            e.unloaded = false;
        });
    }

    fn src(&self) -> Option<&str> {
        // only the decoder asks, and it always sets the source itself
        None
    }

    fn load(&mut self) {}

    fn play(&mut self, session: SessionId) {
        self.with(|e| e.plays.push(session));
        self.sink.try_emit(PlayerEvent::ElementPlaying {
            session,
            element: self.id,
        });
    }

    fn pause(&mut self) {
        self.with(|e| e.pauses += 1);
    }

    fn volume(&self) -> f32 {
        self.with(|e| e.volume)
    }

    fn set_volume(&mut self, volume: f32) {
        self.with(|e| e.volume = volume);
    }

    fn unload(&mut self) {
        self.with(|e| {
            e.src = None;
            e.unloaded = true;
        });
    }

    fn create_source(&mut self) -> Result<Box<dyn SampleSource>, GraphError> {
        let refused = lock(&self.state).refuse_sources;
        if refused || !self.with(|e| e.cross_origin) {
            return Err(GraphError::CrossOrigin);
        }
        self.with(|e| e.sources += 1);
        Ok(Box::new(FakeSource {
            state: self.state.clone(),
        }))
    }
}

struct FakeSource {
    state: Shared,
}

impl SampleSource for FakeSource {
    fn drain_into(&mut self, out: &mut Vec<f32>) {
        out.extend_from_slice(&[0.25; 64]);
    }

    fn disconnect(&mut self) {
        lock(&self.state).sources_disconnected += 1;
    }
}

struct FakeContext {
    state: Shared,
    suspended: bool,
}

impl AudioContext for FakeContext {
    fn state(&self) -> ContextState {
        if self.suspended {
            ContextState::Suspended
        } else {
            ContextState::Running
        }
    }

    fn resume(&mut self) {
        self.suspended = false;
    }

    fn set_output_gain(&mut self, gain: f32) {
        lock(&self.state).gain = Some(gain);
    }
}

struct FakeDecoder {
    idx: usize,
    url: String,
    session: SessionId,
    state: Shared,
}

impl MetadataDecoder for FakeDecoder {
    fn play(&mut self, element: &mut dyn MediaElement) {
        lock(&self.state).decoders[self.idx].plays += 1;
        element.set_src(&self.url);
        element.load();
        element.play(self.session);
    }

    fn stop(&mut self, element: &mut dyn MediaElement) {
        lock(&self.state).decoders[self.idx].stops += 1;
        element.pause();
    }

    fn detach(&mut self, _element: &mut dyn MediaElement) {
        lock(&self.state).decoders[self.idx].detached = true;
    }
}

/// Wraps around a fixed list.
pub struct ListNavigator(pub Vec<Station>);

impl TrackNavigator for ListNavigator {
    fn next(&self, current: Option<&Station>) -> Option<Station> {
        let idx = current
            .and_then(|c| self.0.iter().position(|s| s.stationuuid == c.stationuuid))
            .map(|i| (i + 1) % self.0.len())
            .unwrap_or(0);
        self.0.get(idx).cloned()
    }

    fn previous(&self, current: Option<&Station>) -> Option<Station> {
        let len = self.0.len();
        let idx = current
            .and_then(|c| self.0.iter().position(|s| s.stationuuid == c.stationuuid))
            .map(|i| (i + len - 1) % len)
            .unwrap_or(0);
        self.0.get(idx).cloned()
    }
}

pub struct Harness {
    pub handle: PlayerHandle,
    pub state: Shared,
    pub media: SharedMediaSession,
}

impl Harness {
    pub fn start(capabilities: PlatformCapabilities) -> Self {
        Self::start_with(capabilities, None)
    }

    pub fn start_with(
        capabilities: PlatformCapabilities,
        navigator: Option<Arc<dyn TrackNavigator>>,
    ) -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let platform = FakePlatform {
            state: state.clone(),
            capabilities,
        };
        let media = SharedMediaSession::new();
        let mut ctx = PlayerContext::new(Box::new(platform), PlayerConfig::default())
            .with_media_session(Box::new(media.clone()));
        if let Some(nav) = navigator {
            ctx = ctx.with_navigator(nav);
        }
        let (controller, handle) = PlaybackController::new(ctx);
        tokio::spawn(controller.run());
        Self {
            handle,
            state,
            media,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    pub async fn emit(&self, event: PlayerEvent) {
        self.handle.sink().emit(event).await;
        settle().await;
    }

    pub async fn decoder_error(&self, session: SessionId, kind: DecoderErrorKind, message: &str) {
        self.emit(PlayerEvent::DecoderError {
            session,
            error: DecoderError::new(kind, message),
        })
        .await;
    }
}

/// Let the controller drain its queue.  Time is paused in these tests, so
/// this only fires timers that are already due.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn station(uuid: &str) -> Station {
    Station {
        stationuuid: uuid.to_string(),
        name: format!("Station {}", uuid.to_uppercase()),
        url: format!("http://streams.example/{uuid}"),
        tags: "jazz".to_string(),
        country: "Norway".to_string(),
        ..Default::default()
    }
}
