//! Frame renderer over the analyser tap.
//!
//! Bars mode buckets the spectrum on a power curve so the low end, where
//! most musical energy sits, gets more bars than a linear split would give
//! it.  Wave mode draws the time-domain buffer as a polyline.

use std::fmt::Write as _;
use std::time::Duration;

use radio_proto::config::VisualizerConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::graph::{lock_tap, AnalyserTap};

const BAR_GAP: f32 = 1.0;
const PINK: Rgba = Rgba(236, 72, 153, 0.8);
const INDIGO: Rgba = Rgba(99, 102, 241, 0.8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualizerMode {
    #[default]
    Bars,
    Wave,
}

impl VisualizerMode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "bars" => Some(VisualizerMode::Bars),
            "wave" => Some(VisualizerMode::Wave),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            VisualizerMode::Bars => VisualizerMode::Wave,
            VisualizerMode::Wave => VisualizerMode::Bars,
        }
    }
}

/// Start bins for `bars` buckets over `len` bins: `floor((i/bars)^curve * len)`.
/// Bucket `i` spans `[start[i], start[i+1])`; the last one ends at `len`.
/// Every bucket covers at least one bin.
pub fn bucket_ranges(bars: usize, len: usize, curve: f64) -> Vec<(usize, usize)> {
    if bars == 0 || len == 0 {
        return Vec::new();
    }
    let edge = |i: usize| -> usize {
        let t = i as f64 / bars as f64;
        ((t.powf(curve) * len as f64).floor() as usize).min(len)
    };
    (0..bars)
        .map(|i| {
            let start = edge(i).min(len - 1);
            let end = if i + 1 == bars { len } else { edge(i + 1) };
            (start, end.max(start + 1).min(len))
        })
        .collect()
}

/// Arithmetic mean of each range.
pub fn bucket_values(data: &[u8], ranges: &[(usize, usize)]) -> Vec<u8> {
    ranges
        .iter()
        .map(|&(start, end)| {
            let slice = &data[start.min(data.len())..end.min(data.len())];
            if slice.is_empty() {
                return 0;
            }
            let sum: u32 = slice.iter().map(|&v| v as u32).sum();
            (sum / slice.len() as u32) as u8
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rgba(pub u8, pub u8, pub u8, pub f32);

impl Rgba {
    fn css(self) -> String {
        format!("rgba({},{},{},{})", self.0, self.1, self.2, self.3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Rgba),
    /// Vertical gradient, `bottom` at the rect's lower edge.
    Gradient { bottom: Rgba, top: Rgba },
}

/// 2D drawing target.  Coordinates are pixels, origin top-left.
pub trait Canvas {
    fn clear(&mut self, width: f32, height: f32);

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, paint: Paint);

    fn polyline(&mut self, points: &[(f32, f32)], line_width: f32, color: Rgba);
}

/// One rendered frame, independent of the drawing target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum VisualFrame {
    /// No analyser yet; the surface is just cleared.
    Empty { width: f32, height: f32 },
    Bars {
        width: f32,
        height: f32,
        /// Bucket means, 0..255.
        values: Vec<u8>,
    },
    Wave {
        width: f32,
        height: f32,
        points: Vec<(f32, f32)>,
    },
}

impl VisualFrame {
    pub fn draw(&self, canvas: &mut dyn Canvas) {
        match self {
            VisualFrame::Empty { width, height } => canvas.clear(*width, *height),
            VisualFrame::Bars {
                width,
                height,
                values,
            } => {
                canvas.clear(*width, *height);
                if values.is_empty() {
                    return;
                }
                let slot = width / values.len() as f32;
                let bar_w = (slot - BAR_GAP).max(1.0);
                for (i, v) in values.iter().enumerate() {
                    let h = *v as f32 / 255.0 * height;
                    if h <= 0.0 {
                        continue;
                    }
                    canvas.fill_rect(
                        i as f32 * slot,
                        height - h,
                        bar_w,
                        h,
                        Paint::Gradient {
                            bottom: PINK,
                            top: INDIGO,
                        },
                    );
                }
            }
            VisualFrame::Wave {
                width,
                height,
                points,
            } => {
                canvas.clear(*width, *height);
                canvas.polyline(points, 2.0, PINK);
            }
        }
    }
}

pub struct Visualizer {
    tap: AnalyserTap,
    mode: VisualizerMode,
    bars: usize,
    curve: f64,
    width: f32,
    height: f32,
    data: Vec<u8>,
}

impl Visualizer {
    pub fn new(tap: AnalyserTap, config: &VisualizerConfig) -> Self {
        Self {
            tap,
            mode: VisualizerMode::from_token(&config.mode).unwrap_or_default(),
            bars: config.bars.max(1),
            curve: config.curve,
            width: config.width as f32,
            height: config.height as f32,
            data: Vec::new(),
        }
    }

    pub fn mode(&self) -> VisualizerMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: VisualizerMode) {
        self.mode = mode;
    }

    pub fn toggle_mode(&mut self) -> VisualizerMode {
        self.mode = self.mode.toggled();
        self.mode
    }

    /// Produce the next frame.  Without an analyser the frame is empty.
    pub fn render(&mut self) -> VisualFrame {
        let (width, height) = (self.width, self.height);
        let mut guard = lock_tap(&self.tap);
        let Some(analyser) = guard.as_mut() else {
            return VisualFrame::Empty { width, height };
        };

        let len = analyser.frequency_bin_count();
        self.data.resize(len, 0);
        match self.mode {
            VisualizerMode::Bars => {
                analyser.frequency_data(&mut self.data);
                drop(guard);
                let ranges = bucket_ranges(self.bars, len, self.curve);
                VisualFrame::Bars {
                    width,
                    height,
                    values: bucket_values(&self.data, &ranges),
                }
            }
            VisualizerMode::Wave => {
                analyser.time_domain_data(&mut self.data);
                drop(guard);
                let slice = width / len.max(1) as f32;
                let mut points: Vec<(f32, f32)> = self
                    .data
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i as f32 * slice, *v as f32 / 128.0 * height / 2.0))
                    .collect();
                points.push((width, height / 2.0));
                VisualFrame::Wave {
                    width,
                    height,
                    points,
                }
            }
        }
    }
}

/// Renders into an SVG document.
#[derive(Default)]
pub struct SvgCanvas {
    width: f32,
    height: f32,
    body: String,
    gradients: usize,
}

impl SvgCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{body}</svg>"#,
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

impl Canvas for SvgCanvas {
    fn clear(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
        self.body.clear();
        self.gradients = 0;
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, paint: Paint) {
        let fill = match paint {
            Paint::Solid(c) => c.css(),
            Paint::Gradient { bottom, top } => {
                self.gradients += 1;
                let id = format!("g{}", self.gradients);
                let _ = write!(
                    self.body,
                    r#"<defs><linearGradient id="{id}" x1="0" y1="1" x2="0" y2="0"><stop offset="0" stop-color="{}"/><stop offset="1" stop-color="{}"/></linearGradient></defs>"#,
                    bottom.css(),
                    top.css()
                );
                format!("url(#{id})")
            }
        };
        let _ = write!(
            self.body,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}"/>"#
        );
    }

    fn polyline(&mut self, points: &[(f32, f32)], line_width: f32, color: Rgba) {
        let mut pts = String::with_capacity(points.len() * 12);
        for (x, y) in points {
            let _ = write!(pts, "{x:.1},{y:.1} ");
        }
        let _ = write!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{line_width}"/>"#,
            pts.trim_end(),
            color.css()
        );
    }
}

/// Control side of a running render loop.
#[derive(Clone)]
pub struct VisualizerHandle {
    mode: watch::Sender<VisualizerMode>,
    frames: watch::Receiver<VisualFrame>,
    cancel: CancellationToken,
}

impl VisualizerHandle {
    pub fn mode(&self) -> VisualizerMode {
        *self.mode.borrow()
    }

    /// Takes effect on the next frame.
    pub fn toggle_mode(&self) -> VisualizerMode {
        self.mode.send_modify(|m| *m = m.toggled());
        *self.mode.borrow()
    }

    pub fn set_mode(&self, mode: VisualizerMode) {
        self.mode.send_replace(mode);
    }

    pub fn latest(&self) -> VisualFrame {
        self.frames.borrow().clone()
    }

    pub fn frames(&self) -> watch::Receiver<VisualFrame> {
        self.frames.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Render `fps` frames a second until `cancel` fires.
pub fn spawn(mut visualizer: Visualizer, fps: u32, cancel: CancellationToken) -> VisualizerHandle {
    let (mode_tx, mode_rx) = watch::channel(visualizer.mode());
    let (frame_tx, frame_rx) = watch::channel(VisualFrame::Empty {
        width: visualizer.width,
        height: visualizer.height,
    });
    let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    visualizer.set_mode(*mode_rx.borrow());
                    frame_tx.send_replace(visualizer.render());
                }
            }
        }
        debug!("visualizer: render loop stopped");
    });

    VisualizerHandle {
        mode: mode_tx,
        frames: frame_rx,
        cancel,
    }
}
