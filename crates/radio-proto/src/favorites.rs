//! Favorites list and theme preference, persisted as small files in the data
//! dir.  Both stores are synchronous: every mutation is written through
//! immediately, the same way the browser build wrote to local storage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::Station;

#[derive(Debug, thiserror::Error)]
pub enum FavoritesError {
    /// Import payload was not a JSON array of station records.
    #[error("invalid favorites file format: {0}")]
    Format(String),
    #[error("no favorites to export")]
    Empty,
    #[error("favorites io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("favorites encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Ordered favorites list keyed by `stationuuid`.
pub struct FavoritesStore {
    path: PathBuf,
    stations: Vec<Station>,
}

impl FavoritesStore {
    /// Open the store, loading whatever is on disk.  A missing or unreadable
    /// file yields an empty list.
    pub fn open(path: PathBuf) -> Self {
        let stations = Self::read(&path);
        debug!("favorites: loaded {} from {}", stations.len(), path.display());
        Self { path, stations }
    }

    fn read(path: &Path) -> Vec<Station> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Station>>(&content) {
            Ok(list) => list,
            Err(e) => {
                warn!("favorites: ignoring unreadable {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Re-read the persisted list.
    pub fn load(&mut self) -> &[Station] {
        self.stations = Self::read(&self.path);
        &self.stations
    }

    /// Replace the list and persist it.
    pub fn save(&mut self, stations: Vec<Station>) -> Result<(), FavoritesError> {
        self.stations = stations;
        self.persist()
    }

    pub fn list(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.stations.iter().any(|s| s.stationuuid == uuid)
    }

    pub fn get(&self, uuid: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.stationuuid == uuid)
    }

    /// Add the station if absent, remove it if present.  Returns true when
    /// the station is a favorite afterwards.
    pub fn toggle(&mut self, station: &Station) -> Result<bool, FavoritesError> {
        let now_favorite = match self
            .stations
            .iter()
            .position(|s| s.stationuuid == station.stationuuid)
        {
            Some(idx) => {
                self.stations.remove(idx);
                false
            }
            None => {
                self.stations.push(station.clone());
                true
            }
        };
        self.persist()?;
        Ok(now_favorite)
    }

    /// Move the entry at `from` to `to` (drag-reorder).  Out of range indices
    /// are ignored.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), FavoritesError> {
        if from >= self.stations.len() || to >= self.stations.len() || from == to {
            return Ok(());
        }
        let item = self.stations.remove(from);
        self.stations.insert(to, item);
        self.persist()
    }

    /// Merge a JSON array of stations, skipping uuids already present.
    /// Returns how many entries were appended.  Nothing is merged when the
    /// payload is malformed.
    pub fn import_json(&mut self, text: &str) -> Result<usize, FavoritesError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FavoritesError::Format(e.to_string()))?;
        let serde_json::Value::Array(items) = value else {
            return Err(FavoritesError::Format("expected a JSON array".into()));
        };
        let imported: Vec<Station> = items
            .into_iter()
            .map(serde_json::from_value::<Station>)
            .collect::<Result<_, _>>()
            .map_err(|e| FavoritesError::Format(e.to_string()))?;

        let mut seen: HashSet<String> =
            self.stations.iter().map(|s| s.stationuuid.clone()).collect();
        let fresh: Vec<Station> = imported
            .into_iter()
            .filter(|s| seen.insert(s.stationuuid.clone()))
            .collect();
        let added = fresh.len();
        self.stations.extend(fresh);
        self.persist()?;
        info!(
            "favorites: imported {} new stations, total {}",
            added,
            self.stations.len()
        );
        Ok(added)
    }

    /// Pretty JSON of the current list.
    pub fn export_json(&self) -> Result<String, FavoritesError> {
        if self.stations.is_empty() {
            return Err(FavoritesError::Empty);
        }
        Ok(serde_json::to_string_pretty(&self.stations)?)
    }

    pub fn export_file_name(date: NaiveDate) -> String {
        format!("radio-favorites-{}.json", date.format("%Y-%m-%d"))
    }

    fn persist(&self) -> Result<(), FavoritesError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.stations)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn token(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            _ => None,
        }
    }
}

/// Single-token theme preference.
pub struct ThemeStore {
    path: PathBuf,
    theme: Theme,
}

impl ThemeStore {
    pub fn open(path: PathBuf) -> Self {
        let theme = std::fs::read_to_string(&path)
            .ok()
            .and_then(|t| Theme::from_token(&t))
            .unwrap_or_default();
        Self { path, theme }
    }

    pub fn get(&self) -> Theme {
        self.theme
    }

    pub fn set(&mut self, theme: Theme) -> Result<(), FavoritesError> {
        self.theme = theme;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, theme.token())?;
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<Theme, FavoritesError> {
        let next = match self.theme {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        };
        self.set(next)?;
        Ok(next)
    }
}
