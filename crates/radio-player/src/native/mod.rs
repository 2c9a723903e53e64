//! Desktop audio platform: mpv plays, an ICY reader supplies track titles,
//! ffmpeg taps PCM for the analyser.
//!
//! Each media element is its own mpv process, driven by an actor task that
//! receives the element's operations in order.  Dropping the element closes
//! the operation channel, which shuts the actor down and kills mpv.

mod icy;
mod pcm;

pub use icy::{parse_metadata, IcyDecoder, IcyMetadataReader};
pub use pcm::FfmpegSource;

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::{
    AudioContext, AudioPlatform, ContextState, ElementId, EventSink, MediaElement,
    MetadataDecoder, PlatformCapabilities, SampleSource, SessionId,
};
use crate::error::{DecoderError, DecoderErrorKind, GraphError, PlaybackError};
use crate::events::PlayerEvent;
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle};

static NEXT_ELEMENT: AtomicU64 = AtomicU64::new(1);

pub struct NativePlatform {
    client: Client,
    capabilities: PlatformCapabilities,
}

impl NativePlatform {
    /// Probe helper binaries and build the shared HTTP client.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("radio-web/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let capabilities = PlatformCapabilities {
            metadata_decoder: true,
            media_session: true,
            analysis: radio_proto::platform::find_ffmpeg_binary().is_some(),
        };
        if radio_proto::platform::find_mpv_binary().is_none() {
            warn!("native: mpv not found, playback will fail");
        }
        info!("native: capabilities {:?}", capabilities);
        Ok(Self {
            client,
            capabilities,
        })
    }
}

impl AudioPlatform for NativePlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn create_element(&mut self, sink: EventSink) -> Box<dyn MediaElement> {
        Box::new(MpvElement::spawn(sink, self.capabilities.analysis))
    }

    fn create_context(&mut self) -> Result<Box<dyn AudioContext>, GraphError> {
        Ok(Box::new(NativeContext { gain: 1.0 }))
    }

    fn create_decoder(
        &mut self,
        url: &str,
        session: SessionId,
        sink: EventSink,
    ) -> Result<Box<dyn MetadataDecoder>, DecoderError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DecoderError::new(
                DecoderErrorKind::Decode,
                format!("no ICY support for {}", url),
            ));
        }
        Ok(Box::new(IcyDecoder::new(
            self.client.clone(),
            url.to_string(),
            session,
            sink,
        )))
    }
}

/// mpv applies the element volume itself, so the context gain is advisory.
struct NativeContext {
    gain: f32,
}

impl AudioContext for NativeContext {
    fn state(&self) -> ContextState {
        ContextState::Running
    }

    fn resume(&mut self) {}

    fn set_output_gain(&mut self, gain: f32) {
        self.gain = gain;
        debug!("native: context gain {:.2}", self.gain);
    }
}

#[derive(Debug)]
enum ElementOp {
    Load(String),
    Play(SessionId),
    Pause,
    Volume(f32),
    Unload,
}

/// Handle side of an mpv-backed element.
pub struct MpvElement {
    id: ElementId,
    ops: mpsc::UnboundedSender<ElementOp>,
    src: Option<String>,
    /// Loaded URL, shared with the PCM tap.
    loaded: watch::Sender<Option<String>>,
    volume: f32,
    cross_origin: bool,
    analysis: bool,
}

impl MpvElement {
    fn spawn(sink: EventSink, analysis: bool) -> Self {
        let id = ElementId(NEXT_ELEMENT.fetch_add(1, Ordering::Relaxed));
        let (ops, rx) = mpsc::unbounded_channel();
        let volume = 1.0;
        tokio::spawn(run_element(id, rx, sink, volume));
        let (loaded, _) = watch::channel(None);
        Self {
            id,
            ops,
            src: None,
            loaded,
            volume,
            cross_origin: false,
            analysis,
        }
    }

    fn send(&self, op: ElementOp) {
        if self.ops.send(op).is_err() {
            debug!("native: element {:?} actor gone", self.id);
        }
    }
}

impl MediaElement for MpvElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn set_cross_origin(&mut self, anonymous: bool) {
        self.cross_origin = anonymous;
    }

    fn set_src(&mut self, url: &str) {
        self.src = Some(url.to_string());
    }

    fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    fn load(&mut self) {
        if let Some(url) = self.src.clone() {
            self.loaded.send_replace(Some(url.clone()));
            self.send(ElementOp::Load(url));
        }
    }

    fn play(&mut self, session: SessionId) {
        self.send(ElementOp::Play(session));
    }

    fn pause(&mut self) {
        self.send(ElementOp::Pause);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.send(ElementOp::Volume(self.volume));
    }

    fn unload(&mut self) {
        self.src = None;
        self.loaded.send_replace(None);
        self.send(ElementOp::Unload);
    }

    fn create_source(&mut self) -> Result<Box<dyn SampleSource>, GraphError> {
        if !self.cross_origin {
            return Err(GraphError::CrossOrigin);
        }
        if !self.analysis {
            return Err(GraphError::Unavailable("ffmpeg not found".into()));
        }
        FfmpegSource::spawn(self.loaded.subscribe())
            .map(|s| Box::new(s) as Box<dyn SampleSource>)
            .map_err(|e| GraphError::Unavailable(e.to_string()))
    }
}

/// State owned by the element actor.
struct ElementActor {
    id: ElementId,
    sink: EventSink,
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    events_tx: mpsc::Sender<MpvEvent>,
    url: Option<String>,
    /// What mpv currently has open.
    loaded: Option<String>,
    /// Session of the last play request, for reporting load errors.
    session: Option<SessionId>,
    volume: f32,
}

async fn run_element(
    id: ElementId,
    mut ops: mpsc::UnboundedReceiver<ElementOp>,
    sink: EventSink,
    volume: f32,
) {
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut actor = ElementActor {
        id,
        sink,
        driver: MpvDriver::new(id.0),
        handle: None,
        events_tx,
        url: None,
        loaded: None,
        session: None,
        volume,
    };

    loop {
        tokio::select! {
            op = ops.recv() => match op {
                Some(op) => actor.apply(op).await,
                None => break,
            },
            Some(evt) = events_rx.recv() => actor.on_mpv_event(evt).await,
        }
    }

    actor.driver.kill().await;
    debug!("native: element {:?} released", id);
}

impl ElementActor {
    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = self.handle.as_ref() {
            if self.driver.is_running() {
                return Ok(handle.clone());
            }
            warn!("native: mpv for {:?} died, relaunching", self.id);
        }
        let handle = self.driver.launch(self.volume, self.events_tx.clone()).await?;
        handle.observe().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn apply(&mut self, op: ElementOp) {
        match op {
            ElementOp::Load(url) => {
                // mpv opens the new url on the next play
                if self.loaded.as_deref() != Some(url.as_str()) {
                    if let Some(h) = self.handle.as_ref() {
                        let _ = h.stop().await;
                    }
                    self.loaded = None;
                }
                self.url = Some(url);
            }
            ElementOp::Play(session) => self.play(session).await,
            ElementOp::Pause => {
                if let Some(h) = self.handle.as_ref() {
                    if let Err(e) = h.set_pause(true).await {
                        debug!("native: pause failed: {}", e);
                    }
                }
            }
            ElementOp::Volume(v) => {
                self.volume = v;
                if let Some(h) = self.handle.as_ref() {
                    if let Err(e) = h.set_volume(v).await {
                        debug!("native: volume failed: {}", e);
                    }
                }
            }
            ElementOp::Unload => {
                self.url = None;
                self.loaded = None;
                self.session = None;
                if let Some(h) = self.handle.as_ref() {
                    let _ = h.stop().await;
                }
            }
        }
    }

    async fn play(&mut self, session: SessionId) {
        let Some(url) = self.url.clone() else {
            self.fail(session, PlaybackError::Rejected("no source set".into()))
                .await;
            return;
        };
        self.session = Some(session);

        let result: anyhow::Result<()> = async {
            let handle = self.ensure_handle().await?;
            if self.loaded.as_deref() != Some(url.as_str()) {
                handle.load(&url).await?;
                self.loaded = Some(url.clone());
            }
            handle.set_volume(self.volume).await?;
            handle.set_pause(false).await
        }
        .await;

        match result {
            Ok(()) => {
                self.sink
                    .emit(PlayerEvent::ElementPlaying {
                        session,
                        element: self.id,
                    })
                    .await
            }
            Err(e) => self.fail(session, PlaybackError::Backend(e.to_string())).await,
        }
    }

    async fn on_mpv_event(&mut self, evt: MpvEvent) {
        if !evt.is_load_error() {
            return;
        }
        self.loaded = None;
        let Some(session) = self.session.take() else {
            return;
        };
        let reason = evt.file_error().unwrap_or("load failed").to_string();
        warn!("native: element {:?} could not open stream: {}", self.id, reason);
        self.fail(session, PlaybackError::Unsupported(reason)).await;
    }

    async fn fail(&self, session: SessionId, error: PlaybackError) {
        self.sink
            .emit(PlayerEvent::ElementPlayFailed {
                session,
                element: self.id,
                error,
            })
            .await;
    }
}
