//! Synthesis nodes rendered by the [`AudioContext`](super::context::AudioContext).

use std::f64::consts::TAU;
use std::sync::Arc;

use super::param::AudioParam;

/// Handle to a node inside one audio context. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
}

/// Second-order filter using the RBJ cookbook coefficients.
#[derive(Debug, Clone)]
pub struct Biquad {
    pub kind: FilterType,
    pub frequency: AudioParam,
    q: f32,
    // cached coefficients for `cached_freq`
    cached_freq: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(kind: FilterType, frequency: f32) -> Self {
        Self {
            kind,
            frequency: AudioParam::new(frequency),
            q: std::f32::consts::FRAC_1_SQRT_2,
            cached_freq: f32::NAN,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn update_coefficients(&mut self, freq: f32, sample_rate: f32) {
        let nyquist = sample_rate * 0.5;
        let freq = freq.clamp(10.0, nyquist * 0.99);
        let w0 = std::f32::consts::TAU * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * self.q);

        let (b0, b1, b2) = match self.kind {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 * 0.5, b1, b1 * 0.5)
            }
            FilterType::Highpass => {
                let b1 = -(1.0 + cos_w0);
                (-b1 * 0.5, b1, -b1 * 0.5)
            }
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
        self.cached_freq = freq;
    }

    fn process(&mut self, input: f32, t: f64, sample_rate: f32) -> f32 {
        let freq = self.frequency.value_at(t);
        if freq != self.cached_freq {
            self.update_coefficients(freq, sample_rate);
        }
        let y = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Final mix bus of the context.
    Destination,
    Gain { gain: AudioParam },
    Filter(Biquad),
    /// Buffer playback; loops when `looping` is set.
    Noise {
        buffer: Arc<[f32]>,
        position: usize,
        looping: bool,
        start: Option<f64>,
    },
    /// Sine oscillator.
    Oscillator {
        frequency: AudioParam,
        phase: f64,
        start: Option<f64>,
        stop: Option<f64>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub(crate) inputs: Vec<NodeId>,
    /// Set once anything was connected into this node.
    pub(crate) had_input: bool,
    /// Drop this node once its inputs have all finished.
    pub(crate) release_when_silent: bool,
    pub(crate) ended: bool,
    pub(crate) output: f32,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            had_input: false,
            release_when_silent: false,
            ended: false,
            output: 0.0,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Noise { .. } | NodeKind::Oscillator { .. }
        )
    }

    /// Render one sample given the sum of this node's inputs.
    pub(crate) fn process(&mut self, input: f32, t: f64, sample_rate: f32) -> f32 {
        let out = match &mut self.kind {
            NodeKind::Destination => input,
            NodeKind::Gain { gain } => input * gain.value_at(t),
            NodeKind::Filter(biquad) => biquad.process(input, t, sample_rate),
            NodeKind::Noise {
                buffer,
                position,
                looping,
                start,
            } => match *start {
                Some(at) if t >= at && !self.ended => {
                    if *position >= buffer.len() {
                        if *looping && !buffer.is_empty() {
                            *position = 0;
                        } else {
                            self.ended = true;
                        }
                    }
                    if self.ended {
                        0.0
                    } else {
                        let sample = buffer[*position];
                        *position += 1;
                        sample
                    }
                }
                _ => 0.0,
            },
            NodeKind::Oscillator {
                frequency,
                phase,
                start,
                stop,
            } => {
                if let Some(stop_at) = *stop {
                    if t >= stop_at {
                        self.ended = true;
                    }
                }
                match *start {
                    Some(at) if t >= at && !self.ended => {
                        let sample = phase.sin() as f32;
                        let freq = frequency.value_at(t) as f64;
                        *phase = (*phase + TAU * freq / sample_rate as f64) % TAU;
                        sample
                    }
                    _ => 0.0,
                }
            }
        };
        self.output = out;
        out
    }

    /// Drop automation events that lie entirely in the past.
    pub(crate) fn prune(&mut self, t: f64) {
        match &mut self.kind {
            NodeKind::Gain { gain } => gain.prune(t),
            NodeKind::Filter(biquad) => biquad.frequency.prune(t),
            NodeKind::Oscillator { frequency, .. } => frequency.prune(t),
            NodeKind::Destination | NodeKind::Noise { .. } => {}
        }
    }
}
