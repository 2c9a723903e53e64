mod http;
mod logging;
mod playlist;

use std::sync::{Arc, Mutex};

use clap::Parser;
use radio_player::media_session::SharedMediaSession;
use radio_player::native::NativePlatform;
use radio_player::visualizer::{self, Visualizer};
use radio_player::{PlaybackController, PlayerContext};
use radio_proto::config::Config;
use radio_proto::directory::DirectoryClient;
use radio_proto::favorites::{FavoritesStore, ThemeStore};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logging::{BroadcastMessage, LogBuffer};
use crate::playlist::Playlist;

#[derive(Parser, Debug)]
#[command(name = "radio-daemon", about = "Internet radio player with an HTTP API")]
struct Args {
    /// HTTP port; overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Use mpv and ffmpeg from PATH instead of the bundled copies.
    #[arg(long)]
    use_system_deps: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    radio_proto::platform::set_use_system_deps(args.use_system_deps);

    // channel first so the log layer can forward into it
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = radio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    logging::init(&log_path, broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let logs = LogBuffer::default();
    let _log_task = logs.collect(broadcast_rx);

    let mut config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    if let Some(port) = args.port {
        config.http.port = port;
    }

    let favorites = FavoritesStore::open(config.paths.favorites_file.clone());
    let theme = ThemeStore::open(config.paths.theme_file.clone());
    let playlist = Arc::new(Playlist::new());
    playlist.set_favorites(favorites.list().to_vec());

    let media = SharedMediaSession::new();
    let platform = NativePlatform::new()?;
    let ctx = PlayerContext::new(Box::new(platform), config.player.clone())
        .with_media_session(Box::new(media.clone()))
        .with_navigator(playlist.clone());
    let (controller, player) = PlaybackController::new(ctx);
    let _forward_task = logging::forward_player(player.subscribe(), broadcast_tx.clone());

    let cancel = CancellationToken::new();
    let viz = Visualizer::new(player.analyser(), &config.visualizer);
    let visualizer = visualizer::spawn(viz, config.visualizer.fps, cancel.child_token());

    if config.http.enabled {
        let state = http::HttpState {
            player: player.clone(),
            playlist,
            directory: DirectoryClient::new(&config.directory)?,
            favorites: Arc::new(Mutex::new(favorites)),
            theme: Arc::new(Mutex::new(theme)),
            visualizer: visualizer.clone(),
            media,
            logs,
            page_size: config.directory.page_size,
        };
        let _http_handle =
            http::start_server(config.http.bind_address.clone(), config.http.port, state);
    } else {
        info!("HTTP API disabled in config");
    }

    let shutdown = player.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.shutdown().await;
        }
    });

    info!("Daemon initialised, running player loop");
    controller.run().await;
    cancel.cancel();
    Ok(())
}
