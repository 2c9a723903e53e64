//! PCM tap for the analyser: a side ffmpeg decode of whatever the element
//! has loaded, mono s16le at 44.1 kHz.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::SampleSource;

const SAMPLE_RATE: u32 = 44_100;
const READ_CHUNK: usize = 2048;
/// About a second of audio; older samples are dropped.
const MAX_BUFFERED: usize = SAMPLE_RATE as usize;

type Buffer = Arc<Mutex<VecDeque<f32>>>;

pub struct FfmpegSource {
    buffer: Buffer,
    cancel: CancellationToken,
}

impl FfmpegSource {
    /// Follow `url` for the life of the source, restarting ffmpeg whenever
    /// the element loads a new stream.
    pub fn spawn(url: watch::Receiver<Option<String>>) -> anyhow::Result<Self> {
        let binary =
            radio_proto::platform::find_ffmpeg_binary().context("ffmpeg binary not found")?;
        let buffer: Buffer = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_BUFFERED)));
        let cancel = CancellationToken::new();
        tokio::spawn(follow(binary, url, buffer.clone(), cancel.clone()));
        Ok(Self { buffer, cancel })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SampleSource for FfmpegSource {
    fn drain_into(&mut self, out: &mut Vec<f32>) {
        out.extend(self.lock().drain(..));
    }

    fn disconnect(&mut self) {
        self.cancel.cancel();
        self.lock().clear();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn follow(
    binary: PathBuf,
    mut url: watch::Receiver<Option<String>>,
    buffer: Buffer,
    cancel: CancellationToken,
) {
    loop {
        let current = url.borrow_and_update().clone();
        if let Some(current) = current {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = url.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                result = capture(&binary, &current, &buffer) => {
                    if let Err(e) = result {
                        debug!("pcm: capture of {} ended: {}", current, e);
                    }
                }
            }
        }
        // idle until the element loads something else
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = url.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("pcm: tap stopped");
}

async fn capture(binary: &Path, url: &str, buffer: &Buffer) -> anyhow::Result<()> {
    let rate = SAMPLE_RATE.to_string();
    let mut child = Command::new(binary)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-fflags",
            "nobuffer",
            "-probesize",
            "64k",
            "-i",
            url,
            "-vn",
            "-ac",
            "1",
            "-ar",
            &rate,
            "-f",
            "s16le",
            "pipe:1",
        ])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let mut stdout = child.stdout.take().context("ffmpeg stdout")?;

    let mut raw = vec![0u8; READ_CHUNK];
    let mut carry: Option<u8> = None;
    let mut samples = Vec::with_capacity(READ_CHUNK / 2 + 1);
    loop {
        let n = stdout.read(&mut raw).await?;
        if n == 0 {
            break;
        }
        samples.clear();
        decode_s16le(&raw[..n], &mut carry, &mut samples);
        let mut buf = buffer.lock().unwrap_or_else(|p| p.into_inner());
        buf.extend(samples.iter().copied());
        let excess = buf.len().saturating_sub(MAX_BUFFERED);
        buf.drain(..excess);
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited: {}", status);
    }
    Ok(())
}

/// Little-endian i16 → f32 in [-1, 1).  An odd trailing byte is kept in
/// `carry` for the next call.
fn decode_s16le(bytes: &[u8], carry: &mut Option<u8>, out: &mut Vec<f32>) {
    let mut bytes = bytes;
    if let Some(lo) = carry.take() {
        match bytes.split_first() {
            Some((hi, rest)) => {
                out.push(i16::from_le_bytes([lo, *hi]) as f32 / 32768.0);
                bytes = rest;
            }
            None => {
                *carry = Some(lo);
                return;
            }
        }
    }
    let mut pairs = bytes.chunks_exact(2);
    for pair in &mut pairs {
        out.push(i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);
    }
    if let [last] = pairs.remainder() {
        *carry = Some(*last);
    }
}
