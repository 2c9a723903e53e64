use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use radio_player::media_session::{MediaAction, MediaSessionState, SharedMediaSession};
use radio_player::visualizer::{SvgCanvas, VisualFrame, VisualizerHandle, VisualizerMode};
use radio_player::PlayerHandle;
use radio_proto::directory::{DirectoryClient, SearchQuery};
use radio_proto::favorites::{FavoritesError, FavoritesStore, Theme, ThemeStore};
use radio_proto::protocol::{Command, Facet, PlayerSnapshot, Station};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::logging::LogBuffer;
use crate::playlist::{ListSource, Playlist};

#[derive(Clone)]
pub struct HttpState {
    pub player: PlayerHandle,
    pub playlist: Arc<Playlist>,
    pub directory: DirectoryClient,
    pub favorites: Arc<Mutex<FavoritesStore>>,
    pub theme: Arc<Mutex<ThemeStore>>,
    pub visualizer: VisualizerHandle,
    pub media: SharedMediaSession,
    pub logs: LogBuffer,
    pub page_size: u32,
}

impl HttpState {
    fn favorites(&self) -> MutexGuard<'_, FavoritesStore> {
        self.favorites.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn theme(&self) -> MutexGuard<'_, ThemeStore> {
        self.theme.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn command(&self, cmd: Command) -> StatusCode {
        if let Err(e) = self.player.send(cmd).await {
            error!("HTTP API: player unavailable: {}", e);
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        StatusCode::OK
    }

    async fn play(&self, station: Station) -> StatusCode {
        let uuid = station.stationuuid.clone();
        let status = self.command(Command::Play { station }).await;
        if status == StatusCode::OK && !uuid.is_empty() {
            let directory = self.directory.clone();
            tokio::spawn(async move { directory.send_click(&uuid).await });
        }
        status
    }
}

#[derive(Serialize)]
struct ApiState {
    player: PlayerSnapshot,
    media_session: MediaSessionState,
    playlist: ListSource,
    is_favorite: bool,
    theme: Theme,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchParams {
    q: String,
    country: String,
    tag: String,
    page: u32,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VisualizerParams {
    format: String,
}

#[derive(Serialize)]
struct VisualizerState {
    mode: VisualizerMode,
    frame: VisualFrame,
}

type ApiError = (StatusCode, String);

fn favorites_error(e: FavoritesError) -> ApiError {
    match e {
        FavoritesError::Format(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        FavoritesError::Empty => (StatusCode::NOT_FOUND, e.to_string()),
        FavoritesError::Io(_) | FavoritesError::Encode(_) => {
            error!("HTTP API: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/logs", get(get_logs))
        .route("/api/play", post(play))
        .route("/api/play/:uuid", post(play_uuid))
        .route("/api/toggle", post(toggle))
        .route("/api/stop", post(stop))
        .route("/api/next", post(next_station))
        .route("/api/prev", post(prev_station))
        .route("/api/volume/:pct", post(set_volume))
        .route("/api/media/:action", post(media_action))
        .route("/api/search", get(search))
        .route("/api/countries", get(countries))
        .route("/api/tags", get(tags))
        .route("/api/favorites", get(list_favorites).post(import_favorites))
        .route("/api/favorites/export", get(export_favorites))
        .route("/api/favorites/:uuid/toggle", post(toggle_favorite))
        .route("/api/theme", get(get_theme).post(set_theme))
        .route("/api/visualizer", get(get_visualizer))
        .route("/api/visualizer/mode", post(set_visualizer_mode))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API server listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let player = state.player.snapshot();
    let is_favorite = player
        .station
        .as_ref()
        .is_some_and(|s| state.favorites().contains(&s.stationuuid));
    Json(ApiState {
        media_session: state.media.get(),
        playlist: state.playlist.active_source(),
        is_favorite,
        theme: state.theme().get(),
        player,
    })
}

async fn get_logs(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.logs.snapshot())
}

async fn play(State(state): State<HttpState>, Json(station): Json<Station>) -> StatusCode {
    info!("HTTP API: Play {}", station.name);
    // keep next/prev on the list the station came from, if it came from one
    let _ = state.playlist.select(&station.stationuuid);
    state.play(station).await
}

async fn play_uuid(State(state): State<HttpState>, Path(uuid): Path<String>) -> StatusCode {
    info!("HTTP API: Play {}", uuid);
    match state.playlist.select(&uuid) {
        Some(station) => state.play(station).await,
        None => StatusCode::NOT_FOUND,
    }
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    state.command(Command::TogglePause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    state.command(Command::Stop).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    state.command(Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    state.command(Command::Prev).await
}

async fn set_volume(State(state): State<HttpState>, Path(pct): Path<i32>) -> StatusCode {
    let value = (pct as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", pct);
    state.command(Command::Volume { value }).await
}

async fn media_action(State(state): State<HttpState>, Path(token): Path<String>) -> StatusCode {
    let Some(action) = MediaAction::from_token(&token) else {
        return StatusCode::BAD_REQUEST;
    };
    match state.player.media_action(action).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn search(
    State(state): State<HttpState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<Station>> {
    let query = SearchQuery::page(
        &params.q,
        &params.country,
        &params.tag,
        params.page,
        state.page_size,
    );
    let stations = state.directory.search(&query).await;
    state.playlist.set_search_results(stations.clone());
    Json(stations)
}

async fn countries(State(state): State<HttpState>) -> Json<Vec<Facet>> {
    Json(state.directory.list_countries().await)
}

async fn tags(State(state): State<HttpState>) -> Json<Vec<Facet>> {
    Json(state.directory.list_tags().await)
}

async fn list_favorites(State(state): State<HttpState>) -> Json<Vec<Station>> {
    Json(state.favorites().list().to_vec())
}

async fn import_favorites(
    State(state): State<HttpState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut store = state.favorites();
    let added = store.import_json(&body).map_err(favorites_error)?;
    state.playlist.set_favorites(store.list().to_vec());
    info!("HTTP API: imported {} favorites", added);
    Ok(Json(serde_json::json!({ "imported": added, "total": store.len() })))
}

async fn export_favorites(State(state): State<HttpState>) -> Result<Response, ApiError> {
    let body = state.favorites().export_json().map_err(favorites_error)?;
    let file_name = FavoritesStore::export_file_name(chrono::Local::now().date_naive());
    let disposition = format!("attachment; filename=\"{}\"", file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn toggle_favorite(
    State(state): State<HttpState>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let known = state.favorites().get(&uuid).cloned();
    let station = known
        .or_else(|| state.playlist.find(&uuid))
        .or_else(|| {
            state
                .player
                .snapshot()
                .station
                .filter(|s| s.stationuuid == uuid)
        });
    let Some(station) = station else {
        warn!("HTTP API: favorite toggle for unknown station {}", uuid);
        return Err((StatusCode::NOT_FOUND, format!("unknown station {}", uuid)));
    };

    let mut store = state.favorites();
    let favorite = store.toggle(&station).map_err(favorites_error)?;
    state.playlist.set_favorites(store.list().to_vec());
    Ok(Json(serde_json::json!({ "favorite": favorite })))
}

async fn get_theme(State(state): State<HttpState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "theme": state.theme().get() }))
}

/// Body is a theme token; an empty body toggles.
async fn set_theme(
    State(state): State<HttpState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut store = state.theme();
    let theme = if body.trim().is_empty() {
        store.toggle().map_err(favorites_error)?
    } else {
        let theme = Theme::from_token(&body)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown theme {:?}", body.trim())))?;
        store.set(theme).map_err(favorites_error)?;
        theme
    };
    Ok(Json(serde_json::json!({ "theme": theme })))
}

async fn get_visualizer(
    State(state): State<HttpState>,
    Query(params): Query<VisualizerParams>,
) -> Response {
    let frame = state.visualizer.latest();
    if params.format == "svg" {
        let mut canvas = SvgCanvas::new();
        frame.draw(&mut canvas);
        return ([(header::CONTENT_TYPE, "image/svg+xml")], canvas.finish()).into_response();
    }
    Json(VisualizerState {
        mode: state.visualizer.mode(),
        frame,
    })
    .into_response()
}

/// Body is a mode token; an empty body toggles.
async fn set_visualizer_mode(
    State(state): State<HttpState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mode = if body.trim().is_empty() {
        state.visualizer.toggle_mode()
    } else {
        let mode = VisualizerMode::from_token(&body)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown mode {:?}", body.trim())))?;
        state.visualizer.set_mode(mode);
        mode
    };
    Ok(Json(serde_json::json!({ "mode": mode })))
}
