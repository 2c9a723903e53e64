//! Next/previous selection.  A station is always played "from" a list: the
//! last search page or the favorites.  Navigation wraps around inside that
//! list.

use std::sync::{Mutex, MutexGuard};

use radio_player::TrackNavigator;
use radio_proto::protocol::Station;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    #[default]
    Search,
    Favorites,
}

#[derive(Default)]
struct Lists {
    search: Vec<Station>,
    favorites: Vec<Station>,
    active: ListSource,
}

impl Lists {
    fn active(&self) -> &[Station] {
        match self.active {
            ListSource::Search => &self.search,
            ListSource::Favorites => &self.favorites,
        }
    }
}

#[derive(Default)]
pub struct Playlist {
    lists: Mutex<Lists>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_search_results(&self, stations: Vec<Station>) {
        self.lock().search = stations;
    }

    pub fn set_favorites(&self, stations: Vec<Station>) {
        self.lock().favorites = stations;
    }

    pub fn active_source(&self) -> ListSource {
        self.lock().active
    }

    /// Find `uuid` in the search page, then the favorites, and make the
    /// list it was found in the active one.
    pub fn select(&self, uuid: &str) -> Option<Station> {
        let mut lists = self.lock();
        let found = [ListSource::Search, ListSource::Favorites]
            .into_iter()
            .find_map(|source| {
                let list = match source {
                    ListSource::Search => &lists.search,
                    ListSource::Favorites => &lists.favorites,
                };
                list.iter()
                    .find(|s| s.stationuuid == uuid)
                    .cloned()
                    .map(|s| (source, s))
            });
        let (source, station) = found?;
        debug!("playlist: {} selected from {:?}", uuid, source);
        lists.active = source;
        Some(station)
    }

    /// Like [`select`](Self::select) without changing the active list.
    pub fn find(&self, uuid: &str) -> Option<Station> {
        let lists = self.lock();
        lists
            .search
            .iter()
            .chain(lists.favorites.iter())
            .find(|s| s.stationuuid == uuid)
            .cloned()
    }

    fn step(&self, current: Option<&Station>, forward: bool) -> Option<Station> {
        let lists = self.lock();
        let list = lists.active();
        if list.is_empty() {
            return None;
        }
        let len = list.len();
        let idx = current
            .and_then(|c| list.iter().position(|s| s.stationuuid == c.stationuuid))
            .map(|i| if forward { (i + 1) % len } else { (i + len - 1) % len })
            .unwrap_or(0);
        list.get(idx).cloned()
    }
}

impl TrackNavigator for Playlist {
    fn next(&self, current: Option<&Station>) -> Option<Station> {
        self.step(current, true)
    }

    fn previous(&self, current: Option<&Station>) -> Option<Station> {
        self.step(current, false)
    }
}
