//! Bridge to a system now-playing surface (lock screen, car head unit, MPRIS
//! and the like) and the routing of its transport keys back into commands.

use std::sync::{Arc, Mutex};

use radio_proto::protocol::{Command, Station};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_ARTWORK: &str = "/icons/icon-512x512.png";
const ARTWORK_SIZES: [u32; 6] = [96, 128, 192, 256, 384, 512];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    pub src: String,
    pub sizes: String,
    #[serde(rename = "type")]
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Vec<Artwork>,
}

impl NowPlaying {
    /// With a song title the station moves to the artist line; without one
    /// the station is the title and its tags fill the artist line.
    pub fn new(station: &Station, song_title: Option<&str>) -> Self {
        let song_title = song_title.map(str::trim).filter(|t| !t.is_empty());
        let title = song_title.unwrap_or(&station.name).to_string();
        let artist = match song_title {
            Some(_) => station.name.clone(),
            None if !station.tags.trim().is_empty() => station.tags.clone(),
            None => "Radio Station".to_string(),
        };
        let album = if station.country.trim().is_empty() {
            "Internet Radio".to_string()
        } else {
            station.country.clone()
        };
        let src = if station.favicon.trim().is_empty() {
            DEFAULT_ARTWORK.to_string()
        } else {
            station.favicon.clone()
        };
        let artwork = ARTWORK_SIZES
            .iter()
            .map(|size| Artwork {
                src: src.clone(),
                sizes: format!("{size}x{size}"),
                mime: "image/png".to_string(),
            })
            .collect();
        Self {
            title,
            artist,
            album,
            artwork,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaPlaybackState {
    #[default]
    None,
    Playing,
    Paused,
}

impl MediaPlaybackState {
    pub fn from_playing(is_playing: bool) -> Self {
        if is_playing {
            MediaPlaybackState::Playing
        } else {
            MediaPlaybackState::Paused
        }
    }
}

/// Transport keys a media surface can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaAction {
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    SeekForward,
    SeekBackward,
}

impl MediaAction {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "play" => MediaAction::Play,
            "pause" => MediaAction::Pause,
            "stop" => MediaAction::Stop,
            "nexttrack" => MediaAction::NextTrack,
            "previoustrack" => MediaAction::PreviousTrack,
            "seekforward" => MediaAction::SeekForward,
            "seekbackward" => MediaAction::SeekBackward,
            _ => return None,
        })
    }
}

/// Maps transport keys onto commands given the current play state.
pub struct MediaSessionRouter;

impl MediaSessionRouter {
    /// Live streams cannot seek, so the seek keys step through stations.
    /// `Stop` pauses like the pause key; a full stop would drop the station.
    pub fn route(action: MediaAction, is_playing: bool) -> Option<Command> {
        match action {
            MediaAction::Play if !is_playing => Some(Command::TogglePause),
            MediaAction::Pause | MediaAction::Stop if is_playing => Some(Command::TogglePause),
            MediaAction::Play | MediaAction::Pause | MediaAction::Stop => None,
            MediaAction::NextTrack | MediaAction::SeekForward => Some(Command::Next),
            MediaAction::PreviousTrack | MediaAction::SeekBackward => Some(Command::Prev),
        }
    }
}

pub trait MediaSessionBridge: Send {
    fn update_now_playing(&mut self, station: &Station, song_title: Option<&str>);

    fn set_playback_state(&mut self, state: MediaPlaybackState);

    fn clear(&mut self);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaSessionState {
    pub metadata: Option<NowPlaying>,
    pub playback_state: MediaPlaybackState,
}

/// In-process media surface: keeps the last published state where the HTTP
/// API (or a test) can read it.
#[derive(Clone, Default)]
pub struct SharedMediaSession {
    state: Arc<Mutex<MediaSessionState>>,
}

impl SharedMediaSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> MediaSessionState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediaSessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl MediaSessionBridge for SharedMediaSession {
    fn update_now_playing(&mut self, station: &Station, song_title: Option<&str>) {
        let now = NowPlaying::new(station, song_title);
        debug!("media session: now playing '{}' / '{}'", now.title, now.artist);
        self.lock().metadata = Some(now);
    }

    fn set_playback_state(&mut self, state: MediaPlaybackState) {
        self.lock().playback_state = state;
    }

    fn clear(&mut self) {
        debug!("media session: cleared");
        *self.lock() = MediaSessionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> Station {
        Station {
            stationuuid: "u1".into(),
            name: "Jazz FM".into(),
            tags: "jazz,smooth".into(),
            country: "UK".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_now_playing_with_song() {
        let np = NowPlaying::new(&station(), Some("Miles Davis - So What"));
        assert_eq!(np.title, "Miles Davis - So What");
        assert_eq!(np.artist, "Jazz FM");
        assert_eq!(np.album, "UK");
        assert_eq!(np.artwork.len(), 6);
        assert_eq!(np.artwork[0].sizes, "96x96");
        assert_eq!(np.artwork[5].src, DEFAULT_ARTWORK);
    }

    #[test]
    fn test_now_playing_without_song() {
        let mut s = station();
        s.favicon = "http://x/icon.png".into();
        let np = NowPlaying::new(&s, None);
        assert_eq!(np.title, "Jazz FM");
        assert_eq!(np.artist, "jazz,smooth");
        assert_eq!(np.artwork[0].src, "http://x/icon.png");

        s.tags.clear();
        s.country.clear();
        let np = NowPlaying::new(&s, Some("  "));
        assert_eq!(np.artist, "Radio Station");
        assert_eq!(np.album, "Internet Radio");
    }

    #[test]
    fn test_route() {
        assert!(matches!(
            MediaSessionRouter::route(MediaAction::Play, false),
            Some(Command::TogglePause)
        ));
        assert!(MediaSessionRouter::route(MediaAction::Play, true).is_none());
        assert!(MediaSessionRouter::route(MediaAction::Stop, false).is_none());
        assert!(matches!(
            MediaSessionRouter::route(MediaAction::SeekForward, true),
            Some(Command::Next)
        ));
        assert!(matches!(
            MediaSessionRouter::route(MediaAction::SeekBackward, false),
            Some(Command::Prev)
        ));
    }

    #[test]
    fn test_shared_session_clear() {
        let mut ms = SharedMediaSession::new();
        ms.update_now_playing(&station(), None);
        ms.set_playback_state(MediaPlaybackState::Playing);
        assert!(ms.get().metadata.is_some());
        ms.clear();
        assert_eq!(ms.get(), MediaSessionState::default());
    }
}
