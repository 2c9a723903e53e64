use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use radio_player::PlayerNotification;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str =
    "info,radio_daemon=debug,radio_player=debug,hyper_util=warn,reqwest=warn";
const LOG_HISTORY: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BroadcastMessage {
    Player(PlayerNotification),
    Log(String),
}

/// Forwards WARN and ERROR events to the broadcast channel.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut line = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut line));

        // nobody listening yet is fine
        let _ = self.sender.send(BroadcastMessage::Log(line));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// File log plus broadcast forwarding.  `RUST_LOG` overrides the filter.
pub fn init(log_path: &Path, sender: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer { sender })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();
    Ok(())
}

/// Last few warning/error lines, for `/api/logs`.
#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if lines.len() == LOG_HISTORY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Drain log messages off the channel until it closes.
    pub fn collect(
        &self,
        mut rx: broadcast::Receiver<BroadcastMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let buffer = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BroadcastMessage::Log(line)) => buffer.push(line),
                    Ok(BroadcastMessage::Player(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        buffer.push(format!("({} log lines dropped)", n));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Re-publish player notifications on the daemon channel.
pub fn forward_player(
    mut rx: broadcast::Receiver<PlayerNotification>,
    tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(note) => {
                    let _ = tx.send(BroadcastMessage::Player(note));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_keeps_latest() {
        let buf = LogBuffer::default();
        for i in 0..LOG_HISTORY + 5 {
            buf.push(format!("line {i}"));
        }
        let lines = buf.snapshot();
        assert_eq!(lines.len(), LOG_HISTORY);
        assert_eq!(lines[0], "line 5");
    }

    #[tokio::test]
    async fn test_collect_ignores_player_traffic() {
        let (tx, rx) = broadcast::channel(8);
        let buf = LogBuffer::default();
        let task = buf.collect(rx);
        tx.send(BroadcastMessage::Player(PlayerNotification::StateChanged { is_playing: true }))
            .unwrap();
        tx.send(BroadcastMessage::Log("12:00:00 [WARN] boom".into()))
            .unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(buf.snapshot(), vec!["12:00:00 [WARN] boom".to_string()]);
    }
}
