//! Shoutcast/Icecast in-band metadata.
//!
//! With `Icy-MetaData: 1` the server interleaves a metadata block after every
//! `icy-metaint` audio bytes: one length byte (×16), then that many bytes of
//! `Key='value';` pairs padded with NULs.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::Client;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::backend::{EventSink, MediaElement, MetadataDecoder, SessionId};
use crate::error::{DecoderError, DecoderErrorKind};
use crate::events::{MetadataEvent, PlayerEvent};

/// Incremental splitter for an ICY byte stream.  Feed chunks of any size;
/// get back the text of each complete, non-empty metadata block.
pub struct IcyMetadataReader {
    metaint: usize,
    state: ReadState,
}

enum ReadState {
    Audio { remaining: usize },
    Length,
    Meta { buf: Vec<u8>, remaining: usize },
}

impl IcyMetadataReader {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: ReadState::Audio { remaining: metaint },
        }
    }

    pub fn push(&mut self, mut data: &[u8]) -> Vec<String> {
        let mut blocks = Vec::new();
        while !data.is_empty() {
            match &mut self.state {
                ReadState::Audio { remaining } => {
                    let n = (*remaining).min(data.len());
                    *remaining -= n;
                    data = &data[n..];
                    if *remaining == 0 {
                        self.state = ReadState::Length;
                    }
                }
                ReadState::Length => {
                    let len = data[0] as usize * 16;
                    data = &data[1..];
                    self.state = if len == 0 {
                        ReadState::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        ReadState::Meta {
                            buf: Vec::with_capacity(len),
                            remaining: len,
                        }
                    };
                }
                ReadState::Meta { buf, remaining } => {
                    let n = (*remaining).min(data.len());
                    buf.extend_from_slice(&data[..n]);
                    *remaining -= n;
                    data = &data[n..];
                    if *remaining == 0 {
                        let text = String::from_utf8_lossy(buf)
                            .trim_end_matches('\0')
                            .trim()
                            .to_string();
                        if !text.is_empty() {
                            blocks.push(text);
                        }
                        self.state = ReadState::Audio {
                            remaining: self.metaint,
                        };
                    }
                }
            }
        }
        blocks
    }
}

/// `StreamTitle='Artist - Song';StreamUrl='';` → key/value map.
pub fn parse_metadata(text: &str) -> BTreeMap<String, String> {
    static PAIR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PAIR
        .get_or_init(|| Regex::new(r"(?s)(\w+)='(.*?)';").ok())
        .as_ref()
    else {
        return BTreeMap::new();
    };
    re.captures_iter(text)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Metadata-aware decoder: drives the element and reads the same stream for
/// ICY titles.
pub struct IcyDecoder {
    client: Client,
    url: String,
    session: SessionId,
    sink: EventSink,
    reader: Option<AbortHandle>,
    detached: bool,
}

impl IcyDecoder {
    pub fn new(client: Client, url: String, session: SessionId, sink: EventSink) -> Self {
        Self {
            client,
            url,
            session,
            sink,
            reader: None,
            detached: false,
        }
    }

    fn stop_reader(&mut self) {
        if let Some(task) = self.reader.take() {
            task.abort();
        }
    }
}

impl MetadataDecoder for IcyDecoder {
    fn play(&mut self, element: &mut dyn MediaElement) {
        if self.detached {
            return;
        }
        if element.src() != Some(self.url.as_str()) {
            element.set_src(&self.url);
            element.load();
        }
        element.play(self.session);

        if self.reader.is_none() {
            let task = tokio::spawn(read_metadata(
                self.client.clone(),
                self.url.clone(),
                self.session,
                self.sink.clone(),
            ));
            self.reader = Some(task.abort_handle());
        }
    }

    fn stop(&mut self, element: &mut dyn MediaElement) {
        self.stop_reader();
        if !self.detached {
            element.pause();
        }
    }

    fn detach(&mut self, _element: &mut dyn MediaElement) {
        self.stop_reader();
        self.detached = true;
    }
}

impl Drop for IcyDecoder {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

async fn read_metadata(client: Client, url: String, session: SessionId, sink: EventSink) {
    if let Err(error) = stream_titles(&client, &url, session, &sink).await {
        sink.emit(PlayerEvent::DecoderError { session, error }).await;
    }
}

async fn stream_titles(
    client: &Client,
    url: &str,
    session: SessionId,
    sink: &EventSink,
) -> Result<(), DecoderError> {
    let response = client
        .get(url)
        .header("Icy-MetaData", "1")
        .send()
        .await
        .map_err(network_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(DecoderError::new(
            DecoderErrorKind::Http(status.as_u16()),
            format!("stream answered HTTP {}", status),
        ));
    }

    let metaint = response
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0);
    let Some(metaint) = metaint else {
        debug!("icy: {} carries no in-band metadata", url);
        return Ok(());
    };
    info!("icy: session {} metaint={}", session, metaint);

    let mut reader = IcyMetadataReader::new(metaint);
    let mut last_title: Option<String> = None;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(network_error)?;
        for block in reader.push(&chunk) {
            let Some(metadata) = MetadataEvent::from_raw(parse_metadata(&block)) else {
                continue;
            };
            if last_title.as_deref() == Some(metadata.title.as_str()) {
                continue;
            }
            last_title = Some(metadata.title.clone());
            sink.emit(PlayerEvent::DecoderMetadata { session, metadata })
                .await;
        }
    }
    debug!("icy: stream for session {} ended", session);
    Ok(())
}

fn network_error(e: reqwest::Error) -> DecoderError {
    if e.is_decode() {
        return DecoderError::new(DecoderErrorKind::Decode, "stream body could not be decoded")
            .with_cause(e.to_string());
    }
    DecoderError::new(DecoderErrorKind::Network, "NetworkError: stream fetch failed")
        .with_cause(e.to_string())
}
