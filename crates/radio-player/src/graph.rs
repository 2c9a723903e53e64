//! Analysis graph: one processing context, one analyser, one gain stage and at
//! most one bound source.
//!
//! The graph is built lazily on the first play and then lives as long as the
//! controller.  Only the source changes, and only when the media element it
//! was bound to is replaced.  The visualizer reads the analyser through an
//! [`AnalyserTap`] and never touches the topology.

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, info, warn};

use crate::backend::{
    AudioContext, AudioPlatform, ContextState, ElementId, ManagedElement, SampleSource,
};
use crate::error::GraphError;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Shared read handle on the analyser.  `None` until the graph is initialised.
pub type AnalyserTap = Arc<Mutex<Option<Analyser>>>;

/// Lock a tap, recovering from a poisoned lock; the analyser holds no
/// invariants a panicking reader could break.
pub fn lock_tap(tap: &AnalyserTap) -> MutexGuard<'_, Option<Analyser>> {
    tap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// FFT analyser with browser-compatible output scaling.
pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    /// Most recent `fft_size` samples, oldest first.
    history: Vec<f32>,
    smoothed: Vec<f32>,
    pending: Vec<f32>,
    source: Option<Box<dyn SampleSource>>,
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let window = blackman(fft_size);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            window,
            fft,
            history: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
            pending: Vec::new(),
            source: None,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn attach(&mut self, source: Box<dyn SampleSource>) {
        self.source = Some(source);
    }

    fn detach(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.disconnect();
        }
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Feed samples directly, bypassing the source.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if samples.len() >= self.fft_size {
            self.history
                .copy_from_slice(&samples[samples.len() - self.fft_size..]);
            return;
        }
        self.history.drain(..samples.len());
        self.history.extend_from_slice(samples);
    }

    fn pull(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        self.pending.clear();
        source.drain_into(&mut self.pending);
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.push_samples(&pending);
            self.pending = pending;
        }
    }

    /// Smoothed magnitude spectrum as bytes, one per bin.  Writes at most
    /// `min(out.len(), frequency_bin_count)` values.
    pub fn frequency_data(&mut self, out: &mut [u8]) {
        self.pull();

        let mut buf: Vec<Complex<f32>> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buf);

        let scale = 1.0 / self.fft_size as f32;
        let k = self.smoothing;
        for (prev, c) in self.smoothed.iter_mut().zip(&buf) {
            let mag = c.norm() * scale;
            *prev = k * *prev + (1.0 - k) * mag;
        }

        for (byte, mag) in out.iter_mut().zip(&self.smoothed) {
            let db = if *mag > 0.0 {
                20.0 * mag.log10()
            } else {
                MIN_DECIBELS
            };
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    /// Waveform as bytes centred on 128.
    pub fn time_domain_data(&mut self, out: &mut [u8]) {
        self.pull();
        let start = self.history.len().saturating_sub(out.len());
        for (byte, s) in out.iter_mut().zip(&self.history[start..]) {
            *byte = (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8;
        }
    }
}

fn blackman(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42_f32, 0.5_f32, 0.08_f32);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

pub struct AnalysisGraph {
    fft_size: usize,
    smoothing: f32,
    context: Option<Box<dyn AudioContext>>,
    tap: AnalyserTap,
    gain: f32,
    bound: Option<ElementId>,
}

impl AnalysisGraph {
    pub fn new(fft_size: usize, smoothing: f32, gain: f32) -> Self {
        Self {
            fft_size,
            smoothing,
            context: None,
            tap: Arc::new(Mutex::new(None)),
            gain: gain.clamp(0.0, 1.0),
            bound: None,
        }
    }

    pub fn tap(&self) -> AnalyserTap {
        self.tap.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Gain applied by the graph, `None` before initialisation.
    pub fn gain(&self) -> Option<f32> {
        self.context.as_ref().map(|_| self.gain)
    }

    pub fn bound_element(&self) -> Option<ElementId> {
        self.bound
    }

    /// Create the context, analyser and gain on first use; resume a
    /// suspended context on every later call.
    pub fn ensure_initialized(
        &mut self,
        platform: &mut dyn AudioPlatform,
    ) -> Result<(), GraphError> {
        if let Some(ctx) = self.context.as_mut() {
            if ctx.state() == ContextState::Suspended {
                debug!("graph: resuming suspended context");
                ctx.resume();
            }
            return Ok(());
        }

        let mut ctx = platform.create_context()?;
        if ctx.state() == ContextState::Suspended {
            ctx.resume();
        }
        ctx.set_output_gain(self.gain);
        self.context = Some(ctx);
        *lock_tap(&self.tap) = Some(Analyser::new(self.fft_size, self.smoothing));
        info!(
            "graph: initialised (fft_size={}, smoothing={})",
            self.fft_size, self.smoothing
        );
        Ok(())
    }

    /// Bind `element` as the analyser input.  A no-op when a source is
    /// already bound.  A restricted element is reported but leaves playback
    /// alone.
    pub fn bind_source(&mut self, element: &mut ManagedElement) -> Result<(), GraphError> {
        if self.context.is_none() {
            return Err(GraphError::NotInitialized);
        }
        if let Some(bound) = self.bound {
            debug!("graph: source already bound to {:?}", bound);
            return Ok(());
        }
        if element.is_tainted() {
            return Err(GraphError::Tainted(element.id()));
        }

        let source = match element.get_mut().create_source() {
            Ok(source) => source,
            Err(e) => {
                warn!("graph: cannot bind {:?}, visualizer off: {}", element.id(), e);
                return Err(e);
            }
        };
        element.mark_tainted();
        if let Some(analyser) = lock_tap(&self.tap).as_mut() {
            analyser.attach(source);
        }
        self.bound = Some(element.id());
        debug!("graph: bound source to {:?}", element.id());
        Ok(())
    }

    /// Disconnect and drop the current source.  Must run before the bound
    /// element is discarded.
    pub fn unbind_source(&mut self) {
        let Some(id) = self.bound.take() else {
            return;
        };
        if let Some(analyser) = lock_tap(&self.tap).as_mut() {
            analyser.detach();
        }
        debug!("graph: unbound source from {:?}", id);
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
        if let Some(ctx) = self.context.as_mut() {
            ctx.set_output_gain(self.gain);
        }
    }
}
