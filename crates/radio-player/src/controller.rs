/// PlaybackController: single-owner event loop for all playback state.
///
/// Everything that can change the session (API commands, media keys,
/// backend callbacks, timers) arrives as a [`PlayerEvent`] on one channel and
/// is handled in order.  Backends and timers never touch state directly;
/// every callback carries the [`SessionId`] that caused it and is dropped if
/// that session is no longer current.
///
/// After each mutation the controller publishes a fresh [`PlayerSnapshot`]
/// on a `watch` channel and notifies the registered observers.
use std::sync::Arc;
use std::time::Duration;

use radio_proto::config::PlayerConfig;
use radio_proto::protocol::{Command, PlaybackStrategy, PlayerSnapshot, Station};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{
    AudioPlatform, ElementId, EventSink, ManagedElement, MetadataDecoder, PlatformCapabilities,
    SessionId,
};
use crate::error::{DecoderError, PlaybackError, PlayerError};
use crate::events::{
    BroadcastObserver, MetadataEvent, ObserverId, Observers, PlayerEvent, PlayerNotification,
    PlayerObserver,
};
use crate::graph::{AnalyserTap, AnalysisGraph};
use crate::media_session::{
    MediaAction, MediaPlaybackState, MediaSessionBridge, MediaSessionRouter,
};
use crate::strategy::{SessionPhase, StrategySelector};

const EVENT_QUEUE: usize = 256;
const NOTIFY_QUEUE: usize = 64;

/// Picks the station for next/previous.  Selection policy lives with the
/// caller (playlist, favorites view).
pub trait TrackNavigator: Send + Sync {
    fn next(&self, current: Option<&Station>) -> Option<Station>;

    fn previous(&self, current: Option<&Station>) -> Option<Station>;
}

/// Everything the controller needs from its environment.
pub struct PlayerContext {
    pub platform: Box<dyn AudioPlatform>,
    pub capabilities: PlatformCapabilities,
    pub config: PlayerConfig,
    pub media_session: Option<Box<dyn MediaSessionBridge>>,
    pub navigator: Option<Arc<dyn TrackNavigator>>,
}

impl PlayerContext {
    pub fn new(platform: Box<dyn AudioPlatform>, config: PlayerConfig) -> Self {
        let capabilities = platform.capabilities();
        Self {
            platform,
            capabilities,
            config,
            media_session: None,
            navigator: None,
        }
    }

    pub fn with_media_session(mut self, bridge: Box<dyn MediaSessionBridge>) -> Self {
        self.media_session = Some(bridge);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn TrackNavigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }
}

/// One play-to-stop lifecycle.  Replaced wholesale on every `play()`.
struct Session {
    id: SessionId,
    station: Station,
    url: String,
    phase: SessionPhase,
    /// Element content readable by the graph.
    cors_capable: bool,
    song_title: Option<String>,
}

/// Cloneable control surface for tasks outside the loop.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerEvent>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    notify: broadcast::Sender<PlayerNotification>,
    tap: AnalyserTap,
}

impl PlayerHandle {
    pub async fn send(&self, cmd: Command) -> Result<(), PlayerError> {
        self.tx
            .send(PlayerEvent::Command(cmd))
            .await
            .map_err(|_| PlayerError::Closed)
    }

    pub async fn media_action(&self, action: MediaAction) -> Result<(), PlayerError> {
        self.tx
            .send(PlayerEvent::MediaAction(action))
            .await
            .map_err(|_| PlayerError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PlayerEvent::Shutdown).await;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerNotification> {
        self.notify.subscribe()
    }

    /// Sender side of the notification channel, for log forwarding.
    pub fn notifier(&self) -> broadcast::Sender<PlayerNotification> {
        self.notify.clone()
    }

    pub fn analyser(&self) -> AnalyserTap {
        self.tap.clone()
    }

    /// Raw event path, used by backends that live outside the controller.
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }
}

pub struct PlaybackController {
    ctx: PlayerContext,
    selector: StrategySelector,
    events_tx: mpsc::Sender<PlayerEvent>,
    events_rx: mpsc::Receiver<PlayerEvent>,
    element: ManagedElement,
    decoder: Option<Box<dyn MetadataDecoder>>,
    graph: AnalysisGraph,
    session: Option<Session>,
    last_session: SessionId,
    is_playing: bool,
    volume: f32,
    visualizer_available: bool,
    fallback_timer: Option<AbortHandle>,
    connect_timer: Option<AbortHandle>,
    observers: Observers,
    snapshot_tx: watch::Sender<PlayerSnapshot>,
    rev: u64,
}

impl PlaybackController {
    pub fn new(mut ctx: PlayerContext) -> (Self, PlayerHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (notify_tx, _) = broadcast::channel(NOTIFY_QUEUE);
        let volume = ctx.config.default_volume.clamp(0.0, 1.0);

        let mut element = ManagedElement::new(
            ctx.platform
                .create_element(EventSink::new(events_tx.clone())),
        );
        element.get_mut().set_volume(volume);

        let graph = AnalysisGraph::new(ctx.config.fft_size, ctx.config.smoothing, volume);
        let tap = graph.tap();

        let initial = PlayerSnapshot {
            volume,
            ..Default::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let mut observers = Observers::default();
        observers.subscribe(Arc::new(BroadcastObserver::new(notify_tx.clone())));

        let handle = PlayerHandle {
            tx: events_tx.clone(),
            snapshot: snapshot_rx,
            notify: notify_tx,
            tap,
        };
        let selector = StrategySelector::new(ctx.capabilities);
        let controller = Self {
            ctx,
            selector,
            events_tx,
            events_rx,
            element,
            decoder: None,
            graph,
            session: None,
            last_session: 0,
            is_playing: false,
            volume,
            visualizer_available: false,
            fallback_timer: None,
            connect_timer: None,
            observers,
            snapshot_tx,
            rev: 0,
        };
        (controller, handle)
    }

    pub fn subscribe(&mut self, observer: Arc<dyn PlayerObserver>) -> ObserverId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Run until a `Shutdown` event arrives.
    pub async fn run(mut self) {
        info!("player: starting event loop");
        while let Some(evt) = self.events_rx.recv().await {
            if matches!(evt, PlayerEvent::Shutdown) {
                info!("player: shutdown requested");
                break;
            }
            self.handle_event(evt);
        }
        self.stop();
    }

    pub fn handle_event(&mut self, evt: PlayerEvent) {
        match evt {
            PlayerEvent::Command(cmd) => self.handle_command(cmd),
            PlayerEvent::MediaAction(action) => self.handle_media_action(action),
            PlayerEvent::ElementPlaying { session, element } => {
                self.on_element_playing(session, element)
            }
            PlayerEvent::ElementPlayFailed {
                session,
                element,
                error,
            } => self.on_element_play_failed(session, element, error),
            PlayerEvent::DecoderMetadata { session, metadata } => {
                self.on_metadata(session, metadata)
            }
            PlayerEvent::DecoderError { session, error } => self.on_decoder_error(session, error),
            PlayerEvent::FallbackReady { session } => self.on_fallback_ready(session),
            PlayerEvent::ConnectSource { session } => self.on_connect_source(session),
            PlayerEvent::Shutdown => self.stop(),
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        debug!("player: command {:?}", cmd);
        match cmd {
            Command::Play { station } => self.play(station),
            Command::TogglePause => self.toggle(),
            Command::Stop => self.stop(),
            Command::Next => self.play_next(),
            Command::Prev => self.play_previous(),
            Command::Volume { value } => self.set_volume(value),
            Command::GetState => self.publish(),
        }
    }

    fn handle_media_action(&mut self, action: MediaAction) {
        if !self.ctx.capabilities.media_session {
            debug!("player: media action {:?} without a media surface", action);
            return;
        }
        match MediaSessionRouter::route(action, self.is_playing) {
            Some(cmd) => self.handle_command(cmd),
            None => debug!("player: media action {:?} is a no-op now", action),
        }
    }

    // ── public operations ────────────────────────────────────────────────────

    /// Start `station`, superseding whatever was playing.
    pub fn play(&mut self, station: Station) {
        let url = station.stream_url().trim().to_string();
        if url.is_empty() {
            warn!("player: station '{}' has no stream url", station.name);
            return;
        }

        self.cancel_timers();
        self.teardown_decoder();
        if let Err(e) = self.graph.ensure_initialized(self.ctx.platform.as_mut()) {
            warn!("player: analysis graph unavailable: {}", e);
        }

        self.last_session += 1;
        let id = self.last_session;
        let phase = self.selector.select();
        info!(
            "player: session {} '{}' ({:?}) {}",
            id, station.name, phase, url
        );
        self.session = Some(Session {
            id,
            station,
            url,
            phase,
            cors_capable: false,
            song_title: None,
        });
        self.visualizer_available = false;

        // optimistic: callers see "playing" before the stream connects
        self.set_playing(true);
        self.update_now_playing();

        match phase {
            SessionPhase::MetadataAttempt => self.start_metadata(),
            _ => self.start_plain(true),
        }
        self.publish();
    }

    pub fn toggle(&mut self) {
        let Some((id, phase)) = self.session.as_ref().map(|s| (s.id, s.phase)) else {
            debug!("player: toggle with nothing loaded");
            return;
        };
        // the outgoing element is detached; only the intent changes, and the
        // fallback element picks it up when the settle delay ends
        if phase == SessionPhase::FallbackPending {
            self.set_playing(!self.is_playing);
            self.publish();
            return;
        }
        if !self.is_playing && phase.is_metadata() && self.decoder.is_none() {
            // the decoder was dropped by a playback failure
            self.set_playing(true);
            self.start_metadata();
            self.publish();
            return;
        }
        if self.is_playing {
            self.element.get_mut().pause();
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.stop(self.element.get_mut());
            }
            self.set_playing(false);
        } else {
            self.element.get_mut().play(id);
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.play(self.element.get_mut());
            }
            self.set_playing(true);
        }
        self.publish();
    }

    /// Clamp to [0, 1] and apply to gain and element together.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!("player: ignoring volume {}", volume);
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.graph.set_gain(self.volume);
        self.element.get_mut().set_volume(self.volume);
        self.publish();
    }

    pub fn play_next(&mut self) {
        let current = self.session.as_ref().map(|s| &s.station);
        let next = self
            .ctx
            .navigator
            .as_ref()
            .and_then(|nav| nav.next(current));
        match next {
            Some(station) => self.play(station),
            None => debug!("player: no next station"),
        }
    }

    pub fn play_previous(&mut self) {
        let current = self.session.as_ref().map(|s| &s.station);
        let prev = self
            .ctx
            .navigator
            .as_ref()
            .and_then(|nav| nav.previous(current));
        match prev {
            Some(station) => self.play(station),
            None => debug!("player: no previous station"),
        }
    }

    /// Drop the session entirely.
    pub fn stop(&mut self) {
        self.cancel_timers();
        self.teardown_decoder();
        self.graph.unbind_source();
        {
            let el = self.element.get_mut();
            el.pause();
            el.unload();
        }
        if self.element.is_tainted() {
            self.replace_element();
        }
        let had_session = self.session.take().is_some();
        self.visualizer_available = false;
        if had_session || self.is_playing {
            self.set_playing(false);
        }
        if self.ctx.capabilities.media_session {
            if let Some(ms) = self.ctx.media_session.as_mut() {
                ms.clear();
            }
        }
        self.publish();
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let session = self.session.as_ref();
        PlayerSnapshot {
            rev: self.rev,
            station: session.map(|s| s.station.clone()),
            is_playing: self.is_playing,
            strategy: session
                .map(|s| s.phase.strategy())
                .unwrap_or(PlaybackStrategy::Plain),
            volume: self.volume,
            song_title: session.and_then(|s| s.song_title.clone()),
            visualizer_available: self.visualizer_available,
        }
    }

    pub fn analyser(&self) -> AnalyserTap {
        self.graph.tap()
    }

    // ── strategy paths ───────────────────────────────────────────────────────

    fn start_metadata(&mut self) {
        let Some((id, url)) = self.session.as_ref().map(|s| (s.id, s.url.clone())) else {
            return;
        };

        // a tainted element that lost its source can never feed the graph again
        if self.element.is_tainted() && self.graph.bound_element() != Some(self.element.id()) {
            self.graph.unbind_source();
            self.replace_element();
        }

        let sink = EventSink::new(self.events_tx.clone());
        match self.ctx.platform.create_decoder(&url, id, sink) {
            Ok(mut decoder) => {
                if let Some(s) = self.session.as_mut() {
                    s.cors_capable = true;
                }
                let el = self.element.get_mut();
                el.set_cross_origin(true);
                decoder.play(el);
                self.decoder = Some(decoder);
                self.visualizer_available =
                    self.graph.bound_element() == Some(self.element.id());
                let delay = self.ctx.config.source_connect_ms;
                self.connect_timer =
                    Some(self.schedule(delay, PlayerEvent::ConnectSource { session: id }));
            }
            Err(e) => {
                warn!("player: metadata decoder unavailable ({}), playing plain", e);
                self.start_plain(true);
            }
        }
    }

    /// Plain element playback on a brand new element.  `autoplay` is false
    /// when the user paused while the fallback was pending.
    fn start_plain(&mut self, autoplay: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.cors_capable = false;
        session.phase = SessionPhase::FallbackPlain;
        let (id, url) = (session.id, session.url.clone());
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }

        {
            let old = self.element.get_mut();
            old.pause();
            old.unload();
        }
        self.graph.unbind_source();
        self.replace_element();
        self.visualizer_available = false;

        let el = self.element.get_mut();
        el.set_src(&url);
        el.load();
        if autoplay {
            el.play(id);
        }
        debug!("player: session {} plain on {:?}", id, self.element.id());
    }

    fn replace_element(&mut self) {
        let sink = EventSink::new(self.events_tx.clone());
        let mut fresh = ManagedElement::new(self.ctx.platform.create_element(sink));
        fresh.get_mut().set_volume(self.volume);
        debug!(
            "player: element {:?} replaced by {:?}",
            self.element.id(),
            fresh.id()
        );
        self.element = fresh;
    }

    fn teardown_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let el = self.element.get_mut();
            decoder.stop(el);
            decoder.detach(el);
        }
    }

    // ── backend callbacks ────────────────────────────────────────────────────

    fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session)
    }

    fn on_element_playing(&mut self, session: SessionId, element: ElementId) {
        if !self.is_current(session) || element != self.element.id() {
            debug!("player: stale playing event from {:?}", element);
            return;
        }
        if let Some(s) = self.session.as_mut() {
            if s.phase == SessionPhase::MetadataAttempt {
                s.phase = SessionPhase::MetadataActive;
                debug!("player: session {} metadata path active", session);
                self.publish();
            }
        }
    }

    fn on_element_play_failed(
        &mut self,
        session: SessionId,
        element: ElementId,
        error: PlaybackError,
    ) {
        if !self.is_current(session) || element != self.element.id() {
            debug!("player: stale play failure from {:?}: {}", element, error);
            return;
        }
        if error.is_aborted() {
            debug!("player: play request superseded");
            return;
        }
        if matches!(self.session.as_ref().map(|s| s.phase), Some(SessionPhase::FallbackPending)) {
            debug!("player: element failure during fallback ignored: {}", error);
            return;
        }
        error!("player: playback failed: {}", error);
        self.teardown_decoder();
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
        self.set_playing(false);
        self.publish();
    }

    fn on_metadata(&mut self, session: SessionId, metadata: MetadataEvent) {
        let Some(s) = self.session.as_mut().filter(|s| s.id == session) else {
            debug!("player: stale metadata '{}'", metadata.title);
            return;
        };
        if !s.phase.is_metadata() {
            debug!("player: metadata after fallback dropped");
            return;
        }
        if self.decoder.is_none() {
            debug!("player: metadata from a torn down decoder dropped");
            return;
        }
        if s.phase == SessionPhase::MetadataAttempt {
            s.phase = SessionPhase::MetadataActive;
        }
        info!("player: now playing '{}'", metadata.title);
        s.song_title = Some(metadata.title.clone());
        self.observers.metadata(&metadata);
        self.update_now_playing();
        self.publish();
    }

    fn on_decoder_error(&mut self, session: SessionId, err: DecoderError) {
        let Some(phase) = self.session.as_ref().filter(|s| s.id == session).map(|s| s.phase) else {
            debug!("player: stale decoder error: {}", err);
            return;
        };
        if !phase.is_metadata() {
            debug!("player: decoder error after fallback ignored: {}", err);
            return;
        }

        let class = self.selector.classify(&err);
        if !class.triggers_fallback() {
            warn!(kind = "unclassified", cause = ?err.cause, "player: decoder error: {}", err);
            return;
        }

        warn!("player: decoder {:?} failure, falling back to plain: {}", class, err);
        self.teardown_decoder();
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
        if let Some(s) = self.session.as_mut() {
            s.phase = SessionPhase::FallbackPending;
            s.cors_capable = false;
        }
        let delay = self.ctx.config.fallback_settle_ms;
        self.fallback_timer = Some(self.schedule(delay, PlayerEvent::FallbackReady { session }));
        self.publish();
    }

    fn on_fallback_ready(&mut self, session: SessionId) {
        let pending = self
            .session
            .as_ref()
            .is_some_and(|s| s.id == session && s.phase == SessionPhase::FallbackPending);
        if !pending {
            debug!("player: stale fallback for session {}", session);
            return;
        }
        self.fallback_timer = None;
        self.start_plain(self.is_playing);
        self.publish();
    }

    fn on_connect_source(&mut self, session: SessionId) {
        self.connect_timer = None;
        let ready = self.session.as_ref().is_some_and(|s| {
            s.id == session && s.cors_capable && s.phase.is_metadata()
        }) && self.is_playing
            && self.decoder.is_some();
        if !ready {
            debug!("player: source connect for session {} skipped", session);
            return;
        }

        match self.graph.bind_source(&mut self.element) {
            Ok(()) => self.visualizer_available = true,
            Err(e) => {
                debug!("player: source bind failed: {}", e);
                if let Some(s) = self.session.as_mut() {
                    s.cors_capable = false;
                }
                self.visualizer_available = false;
            }
        }
        self.publish();
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    fn schedule(&self, delay_ms: u64, event: PlayerEvent) -> AbortHandle {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = tx.send(event).await;
        })
        .abort_handle()
    }

    fn cancel_timers(&mut self) {
        if let Some(t) = self.fallback_timer.take() {
            t.abort();
        }
        if let Some(t) = self.connect_timer.take() {
            t.abort();
        }
    }

    fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        self.observers.state_changed(playing);
        if self.ctx.capabilities.media_session {
            if let Some(ms) = self.ctx.media_session.as_mut() {
                ms.set_playback_state(MediaPlaybackState::from_playing(playing));
            }
        }
    }

    fn update_now_playing(&mut self) {
        if !self.ctx.capabilities.media_session {
            return;
        }
        let (Some(session), Some(ms)) = (self.session.as_ref(), self.ctx.media_session.as_mut())
        else {
            return;
        };
        ms.update_now_playing(&session.station, session.song_title.as_deref());
        ms.set_playback_state(MediaPlaybackState::from_playing(self.is_playing));
    }

    fn publish(&mut self) {
        self.rev += 1;
        let snap = self.snapshot();
        self.snapshot_tx.send_replace(snap);
    }
}
