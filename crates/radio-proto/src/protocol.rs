use serde::{Deserialize, Serialize};

/// Commands accepted by the player core.  The HTTP API, the media-session
/// router and the playlist all speak this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station: Station },
    TogglePause,
    Stop,
    Next,
    Prev,
    Volume { value: f32 },
    GetState,
}

/// Which playback path the current session is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStrategy {
    /// ICY-aware decoder drives the element and reports track titles.
    MetadataAware,
    /// Bare element playback, no in-band metadata.
    #[default]
    Plain,
}

/// Serialisable view of the player.  `rev` is a monotonically increasing
/// counter bumped on every state change so pollers can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub station: Option<Station>,
    pub is_playing: bool,
    pub strategy: PlaybackStrategy,
    pub volume: f32,
    /// Last track title reported by the decoder for this session.
    pub song_title: Option<String>,
    /// False when the analysis source could not be bound (plain mode or a
    /// restricted stream).
    #[serde(default)]
    pub visualizer_available: bool,
}

/// A station as returned by the radio-browser directory.  Field names match
/// the directory JSON so favorites files round-trip unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Station {
    pub stationuuid: String,
    pub name: String,
    pub url: String,
    /// Directory-resolved stream URL (playlists already followed).
    pub url_resolved: String,
    /// Comma separated genre tags, e.g. "jazz,smooth jazz".
    pub tags: String,
    pub favicon: String,
    pub homepage: String,
    pub country: String,
    pub codec: String,
    pub bitrate: u32,
}

impl Station {
    /// URL handed to the audio backend: the resolved one when the directory
    /// supplied it.
    pub fn stream_url(&self) -> &str {
        if self.url_resolved.trim().is_empty() {
            &self.url
        } else {
            &self.url_resolved
        }
    }

    /// First tag, used as a short genre label.
    pub fn genre(&self) -> Option<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .find(|t| !t.is_empty())
    }

    /// "128 kbps • MP3" style technical summary.
    pub fn tech_info(&self) -> String {
        let mut parts = Vec::new();
        if self.bitrate > 0 {
            parts.push(format!("{} kbps", self.bitrate));
        }
        if !self.codec.is_empty() {
            parts.push(self.codec.clone());
        }
        parts.join(" • ")
    }
}

/// `{name, stationcount}` facet entry from the directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Facet {
    pub name: String,
    pub stationcount: u32,
}
