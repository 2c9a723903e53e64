//! Playback and metadata core for the radio-web player.
//!
//! The [`controller::PlaybackController`] owns every piece of mutable
//! playback state and is driven by [`events::PlayerEvent`]s; audio I/O lives
//! behind the [`backend::AudioPlatform`] seam so the core runs the same
//! against mpv or a test double.

pub mod backend;
pub mod controller;
pub mod error;
pub mod events;
pub mod graph;
pub mod media_session;
pub mod mpv;
pub mod native;
pub mod strategy;
pub mod visualizer;

pub use controller::{PlaybackController, PlayerContext, PlayerHandle, TrackNavigator};
pub use events::{MetadataEvent, PlayerEvent, PlayerNotification};
