//! Controller behaviour against the recording platform.  Time is paused so
//! the settle and source-connect delays are exact.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{settle, station, Harness, ListNavigator};
use radio_player::backend::{ElementId, PlatformCapabilities};
use radio_player::error::{DecoderErrorKind, PlaybackError};
use radio_player::events::{MetadataEvent, PlayerEvent, PlayerNotification};
use radio_player::media_session::{MediaAction, MediaPlaybackState};
use radio_proto::protocol::{Command, PlaybackStrategy};

fn metadata(title: &str) -> MetadataEvent {
    let mut raw = std::collections::BTreeMap::new();
    raw.insert("StreamTitle".to_string(), title.to_string());
    MetadataEvent::from_raw(raw).unwrap()
}

async fn play(h: &Harness, uuid: &str) {
    h.handle
        .send(Command::Play {
            station: station(uuid),
        })
        .await
        .unwrap();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_play_supersedes_first() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    play(&h, "b").await;

    {
        let st = h.state();
        assert_eq!(st.decoders.len(), 2);
        assert_eq!(st.decoders[0].stops, 1);
        assert!(st.decoders[0].detached);
        assert_eq!(st.decoders[1].url, "http://streams.example/b");
        assert!(!st.decoders[1].detached);
        assert_eq!(st.element().src.as_deref(), Some("http://streams.example/b"));
    }

    // late traffic from session 1 changes nothing
    let before = h.state().elements.len();
    h.emit(PlayerEvent::DecoderMetadata {
        session: 1,
        metadata: metadata("Old - Song"),
    })
    .await;
    h.decoder_error(1, DecoderErrorKind::CrossOrigin, "CORS").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snap = h.handle.snapshot();
    assert_eq!(snap.station.unwrap().stationuuid, "b");
    assert!(snap.is_playing);
    assert_eq!(snap.song_title, None);
    assert_eq!(snap.strategy, PlaybackStrategy::MetadataAware);
    assert_eq!(h.state().elements.len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_twice_restores_playing() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    assert!(h.handle.snapshot().is_playing);

    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(!h.handle.snapshot().is_playing);
    assert_eq!(h.media.get().playback_state, MediaPlaybackState::Paused);
    assert_eq!(h.state().decoder().stops, 1);

    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(h.handle.snapshot().is_playing);
    assert_eq!(h.media.get().playback_state, MediaPlaybackState::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_without_station_is_noop() {
    let h = Harness::start(PlatformCapabilities::default());
    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(!h.handle.snapshot().is_playing);
    assert!(h.state().element().plays.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_volume_applies_to_element_and_gain() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.handle.send(Command::Volume { value: 0.35 }).await.unwrap();
    settle().await;

    assert_eq!(h.state().element().volume, 0.35);
    assert_eq!(h.state().gain, Some(0.35));
    assert_eq!(h.handle.snapshot().volume, 0.35);

    h.handle.send(Command::Volume { value: 7.0 }).await.unwrap();
    settle().await;
    assert_eq!(h.state().element().volume, 1.0);
    assert_eq!(h.state().gain, Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn test_cross_origin_error_falls_back_to_new_element() {
    let h = Harness::start(PlatformCapabilities::default());
    let mut notes = h.handle.subscribe();
    h.handle.send(Command::Volume { value: 0.4 }).await.unwrap();
    play(&h, "a").await;
    let first = h.state().element().id;

    h.decoder_error(1, DecoderErrorKind::CrossOrigin, "blocked").await;
    // settle delay not elapsed yet
    assert_eq!(h.state().element().id, first);
    assert!(h.state().decoder().detached);

    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let st = h.state();
        let el = st.element();
        assert_ne!(el.id, first);
        assert_eq!(el.volume, 0.4);
        assert_eq!(el.src.as_deref(), Some("http://streams.example/a"));
        assert!(!el.cross_origin);
        assert_eq!(el.plays, vec![1]);
        assert!(st.elements[0].unloaded);
    }
    let snap = h.handle.snapshot();
    assert!(snap.is_playing);
    assert_eq!(snap.strategy, PlaybackStrategy::Plain);
    assert!(!snap.visualizer_available);

    // decoder is gone; its late metadata must not surface
    h.emit(PlayerEvent::DecoderMetadata {
        session: 1,
        metadata: metadata("Late - Title"),
    })
    .await;
    assert_eq!(h.handle.snapshot().song_title, None);
    while let Ok(note) = notes.try_recv() {
        assert!(!matches!(note, PlayerNotification::Metadata { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_marker_classified_network_error_falls_back() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.decoder_error(1, DecoderErrorKind::Unknown, "TypeError: Failed to fetch")
        .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.handle.snapshot().strategy, PlaybackStrategy::Plain);
    assert_eq!(h.state().elements.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_error_keeps_metadata_path() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.decoder_error(1, DecoderErrorKind::Unknown, "codec hiccup").await;
    h.decoder_error(1, DecoderErrorKind::Http(503), "HTTP 503").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.state().elements.len(), 1);
    assert!(!h.state().decoder().detached);
    assert_eq!(h.handle.snapshot().strategy, PlaybackStrategy::MetadataAware);
}

#[tokio::test(start_paused = true)]
async fn test_play_during_pending_fallback_cancels_it() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.decoder_error(1, DecoderErrorKind::Network, "NetworkError").await;
    play(&h, "b").await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let st = h.state();
    // no element was ever rebuilt for stream a
    assert_eq!(st.elements.len(), 1);
    assert_eq!(st.element().id, ElementId(1));
    assert_eq!(st.element().src.as_deref(), Some("http://streams.example/b"));
    drop(st);
    assert_eq!(h.handle.snapshot().strategy, PlaybackStrategy::MetadataAware);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_while_paused_does_not_autoplay() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.decoder_error(1, DecoderErrorKind::CrossOrigin, "CORS").await;
    h.handle.send(Command::TogglePause).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let st = h.state();
    assert_eq!(st.elements.len(), 2);
    assert!(st.element().plays.is_empty());
    drop(st);
    assert!(!h.handle.snapshot().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_during_pending_fallback() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    h.decoder_error(1, DecoderErrorKind::CrossOrigin, "CORS").await;

    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(!h.handle.snapshot().is_playing);
    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(h.handle.snapshot().is_playing);
    {
        let st = h.state();
        // the detached element is not restarted
        assert_eq!(st.elements.len(), 1);
        assert_eq!(st.elements[0].plays, vec![1]);
        assert_eq!(st.decoders.len(), 1);
        assert_eq!(st.decoder().plays, 1);
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let st = h.state();
    assert_eq!(st.elements.len(), 2);
    assert_eq!(st.elements[0].plays, vec![1]);
    assert_eq!(st.element().plays, vec![1]);
    drop(st);
    let snap = h.handle.snapshot();
    assert!(snap.is_playing);
    assert_eq!(snap.strategy, PlaybackStrategy::Plain);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_reaches_observers_and_media_session() {
    let h = Harness::start(PlatformCapabilities::default());
    let mut notes = h.handle.subscribe();
    play(&h, "a").await;
    h.emit(PlayerEvent::DecoderMetadata {
        session: 1,
        metadata: metadata("Artist - Track"),
    })
    .await;

    assert_eq!(h.handle.snapshot().song_title.as_deref(), Some("Artist - Track"));
    let now = h.media.get().metadata.unwrap();
    assert_eq!(now.title, "Artist - Track");
    assert_eq!(now.artist, "Station A");
    assert_eq!(now.album, "Norway");

    let mut saw_state = false;
    let mut saw_meta = false;
    while let Ok(note) = notes.try_recv() {
        match note {
            PlayerNotification::StateChanged { is_playing } => saw_state |= is_playing,
            PlayerNotification::Metadata { metadata } => {
                saw_meta = metadata.title == "Artist - Track"
            }
        }
    }
    assert!(saw_state && saw_meta);
}

#[tokio::test(start_paused = true)]
async fn test_source_binds_after_connect_delay() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    assert_eq!(h.state().element().sources, 0);
    assert!(h.state().element().cross_origin);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.state().element().sources, 1);
    assert!(h.handle.snapshot().visualizer_available);

    // analyser pulls from the bound source
    let tap = h.handle.analyser();
    let mut wave = vec![0u8; 64];
    tap.lock().unwrap().as_mut().unwrap().time_domain_data(&mut wave);
    assert!(wave.iter().all(|&b| b == 160));

    // same element, new station: the binding is kept, no second source
    play(&h, "b").await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.state().elements.len(), 1);
    assert_eq!(h.state().element().sources, 1);
}

#[tokio::test(start_paused = true)]
async fn test_refused_source_keeps_playing_without_visualizer() {
    let h = Harness::start(PlatformCapabilities::default());
    h.state().refuse_sources = true;
    play(&h, "a").await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snap = h.handle.snapshot();
    assert!(snap.is_playing);
    assert!(!snap.visualizer_available);
    assert_eq!(snap.strategy, PlaybackStrategy::MetadataAware);
    assert_eq!(h.state().element().sources, 0);
    assert!(!h.state().decoder().detached);

    // the failed bind left the element clean, so it is reused and binds later
    h.state().refuse_sources = false;
    play(&h, "b").await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.state().elements.len(), 1);
    assert_eq!(h.state().element().sources, 1);
    assert!(h.handle.snapshot().visualizer_available);
}

#[tokio::test(start_paused = true)]
async fn test_stop_replaces_tainted_element() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.handle.send(Command::Stop).await.unwrap();
    settle().await;

    {
        let st = h.state();
        assert_eq!(st.sources_disconnected, 1);
        assert_eq!(st.elements.len(), 2);
        assert!(st.elements[0].unloaded);
    }
    let snap = h.handle.snapshot();
    assert!(!snap.is_playing);
    assert!(snap.station.is_none());
    assert_eq!(h.media.get().metadata, None);
    assert_eq!(h.media.get().playback_state, MediaPlaybackState::None);
}

#[tokio::test(start_paused = true)]
async fn test_no_decoder_capability_plays_plain() {
    let caps = PlatformCapabilities {
        metadata_decoder: false,
        ..Default::default()
    };
    let h = Harness::start(caps);
    play(&h, "a").await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let st = h.state();
    assert!(st.decoders.is_empty());
    assert_eq!(st.element().plays, vec![1]);
    assert_eq!(st.element().sources, 0);
    drop(st);
    let snap = h.handle.snapshot();
    assert_eq!(snap.strategy, PlaybackStrategy::Plain);
    assert!(snap.is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_refused_decoder_falls_back_immediately() {
    let h = Harness::start(PlatformCapabilities::default());
    h.state().refuse_decoders = true;
    play(&h, "a").await;
    assert_eq!(h.handle.snapshot().strategy, PlaybackStrategy::Plain);
    assert_eq!(h.state().element().plays, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_play_failures() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    let element = h.state().element().id;

    h.emit(PlayerEvent::ElementPlayFailed {
        session: 1,
        element,
        error: PlaybackError::Aborted,
    })
    .await;
    assert!(h.handle.snapshot().is_playing);

    h.emit(PlayerEvent::ElementPlayFailed {
        session: 1,
        element,
        error: PlaybackError::Unsupported("no demuxer".into()),
    })
    .await;
    assert!(!h.handle.snapshot().is_playing);
    assert_eq!(h.media.get().playback_state, MediaPlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_play_failure_tears_down_decoder() {
    let h = Harness::start(PlatformCapabilities::default());
    play(&h, "a").await;
    let element = h.state().element().id;

    h.emit(PlayerEvent::ElementPlayFailed {
        session: 1,
        element,
        error: PlaybackError::Unsupported("no demuxer".into()),
    })
    .await;
    {
        let st = h.state();
        assert!(st.decoder().stops >= 1);
        assert!(st.decoder().detached);
    }

    h.emit(PlayerEvent::DecoderMetadata {
        session: 1,
        metadata: metadata("Late - Title"),
    })
    .await;
    let snap = h.handle.snapshot();
    assert!(!snap.is_playing);
    assert_eq!(snap.song_title, None);
    assert_ne!(
        h.media.get().metadata.map(|m| m.title),
        Some("Late - Title".to_string())
    );

    // the dropped connect timer never binds a source
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.state().element().sources, 0);

    // resuming starts a fresh decoder on the same session
    h.handle.send(Command::TogglePause).await.unwrap();
    settle().await;
    assert!(h.handle.snapshot().is_playing);
    let st = h.state();
    assert_eq!(st.decoders.len(), 2);
    assert_eq!(st.decoder().session, 1);
    assert_eq!(st.decoder().plays, 1);
    assert!(!st.decoder().detached);
}

#[tokio::test(start_paused = true)]
async fn test_media_keys_and_navigation() {
    let nav = Arc::new(ListNavigator(vec![station("a"), station("b"), station("c")]));
    let h = Harness::start_with(PlatformCapabilities::default(), Some(nav));

    h.handle.media_action(MediaAction::NextTrack).await.unwrap();
    settle().await;
    assert_eq!(h.handle.snapshot().station.unwrap().stationuuid, "a");

    h.handle.media_action(MediaAction::SeekForward).await.unwrap();
    settle().await;
    assert_eq!(h.handle.snapshot().station.unwrap().stationuuid, "b");

    h.handle.send(Command::Prev).await.unwrap();
    h.handle.send(Command::Prev).await.unwrap();
    settle().await;
    assert_eq!(h.handle.snapshot().station.unwrap().stationuuid, "c");

    h.handle.media_action(MediaAction::Play).await.unwrap();
    settle().await;
    assert!(h.handle.snapshot().is_playing);

    h.handle.media_action(MediaAction::Stop).await.unwrap();
    settle().await;
    let snap = h.handle.snapshot();
    assert!(!snap.is_playing);
    assert!(snap.station.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_media_keys_ignored_without_surface() {
    let caps = PlatformCapabilities {
        media_session: false,
        ..Default::default()
    };
    let h = Harness::start(caps);
    play(&h, "a").await;
    h.handle.media_action(MediaAction::Pause).await.unwrap();
    settle().await;
    assert!(h.handle.snapshot().is_playing);
    assert_eq!(h.media.get().metadata, None);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_rev_increases() {
    let h = Harness::start(PlatformCapabilities::default());
    let r0 = h.handle.snapshot().rev;
    play(&h, "a").await;
    let r1 = h.handle.snapshot().rev;
    h.handle.send(Command::GetState).await.unwrap();
    settle().await;
    assert!(r1 > r0);
    assert!(h.handle.snapshot().rev > r1);
}
