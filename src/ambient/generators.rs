//! Per-category synthesis graphs. Each builder wires its nodes into the
//! session master gain and hands every persistent node and timer to the
//! session's [`CleanupRegistry`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use super::context::SharedContext;
use super::node::{FilterType, NodeId};
use super::rng::SharedRandom;
use super::schedule::{
    CHIRP_STOP_SECONDS, Cadence, CleanupRegistry, WaveSwell, chirp_gain, chirp_pitch, decay,
};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundCategory {
    Ocean,
    Rain,
    Birds,
    Chimes,
}

impl SoundCategory {
    #[cfg(test)]
    pub const ALL: [SoundCategory; 4] = [
        SoundCategory::Ocean,
        SoundCategory::Rain,
        SoundCategory::Birds,
        SoundCategory::Chimes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SoundCategory::Ocean => "ocean",
            SoundCategory::Rain => "rain",
            SoundCategory::Birds => "birds",
            SoundCategory::Chimes => "chimes",
        }
    }
}

impl fmt::Display for SoundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const OCEAN_WAVE_OFFSETS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(4),
];
pub const OCEAN_CADENCE: Cadence =
    Cadence::jittered(Duration::from_millis(5000), Duration::from_millis(3000));
pub const OCEAN_CUTOFF_HZ: f32 = 400.0;

pub const RAIN_HIGHPASS_HZ: f32 = 1000.0;
pub const RAIN_LOWPASS_HZ: f32 = 8000.0;
pub const RAIN_LEVEL: f32 = 0.15;
pub const DROPLET_CADENCE: Cadence = Cadence::fixed(Duration::from_millis(100));
const DROPLET_GATE: f32 = 0.7;
const DROPLET_PEAK: f32 = 0.02;
const DROPLET_SECONDS: f64 = 0.1;

pub const BIRD_CADENCE: Cadence = Cadence::fixed(Duration::from_millis(800));
const CHIRP_GATE: f32 = 0.6;
const SECOND_CHIRP_GATE: f32 = 0.5;
const THIRD_CHIRP_GATE: f32 = 0.7;

pub const CHIME_CADENCE: Cadence = Cadence::fixed(Duration::from_millis(1500));
/// C5 to C6.
pub const CHIME_FREQUENCIES: [f32; 6] = [523.25, 587.33, 659.25, 783.99, 880.0, 1046.5];
pub const CHIME_HARMONIC: f32 = 2.01;
const CHIME_GATE: f32 = 0.5;
const CHIME_PAIR_GATE: f32 = 0.7;

/// Everything a generator needs from its session.
#[derive(Clone)]
pub struct SynthEnv {
    pub ctx: SharedContext,
    pub master: NodeId,
    pub noise: Arc<[f32]>,
    pub rng: SharedRandom,
    pub registry: CleanupRegistry,
}

/// Uniform white noise in `[-1, 1)`, `seconds` long.
pub fn noise_buffer(sample_rate: u32, seconds: f32, rng: &SharedRandom) -> Arc<[f32]> {
    let len = (sample_rate as f32 * seconds).max(1.0) as usize;
    let samples: Vec<f32> = rng.with(|r| (0..len).map(|_| r.range(-1.0, 1.0)).collect());
    samples.into()
}

/// Build the graph for `category` into `env.master`.
pub fn build(category: SoundCategory, env: &SynthEnv) {
    debug!("building {} graph", category);
    match category {
        SoundCategory::Ocean => ocean(env),
        SoundCategory::Rain => rain(env),
        SoundCategory::Birds => birds(env),
        SoundCategory::Chimes => chimes(env),
    }
}

fn ocean(env: &SynthEnv) {
    for offset in OCEAN_WAVE_OFFSETS {
        if offset.is_zero() {
            spawn_wave(env);
        } else {
            let env_for_timer = env.clone();
            env.registry
                .after(offset, move || spawn_wave(&env_for_timer));
        }
    }
}

fn spawn_wave(env: &SynthEnv) {
    let (filter, gain) = {
        let mut ctx = lock(&env.ctx);
        if ctx.is_closed() {
            return;
        }
        let source = ctx.create_noise_source(env.noise.clone());
        let filter = ctx.create_filter(FilterType::Lowpass, OCEAN_CUTOFF_HZ);
        let gain = ctx.create_gain(0.0);
        ctx.connect(source, filter);
        ctx.connect(filter, gain);
        ctx.connect(gain, env.master);
        let now = ctx.current_time();
        ctx.start(source, now);
        env.registry.register_nodes(&[source, filter, gain]);
        (filter, gain)
    };

    swell(env, filter, gain);
    let env_for_timer = env.clone();
    env.registry.every(OCEAN_CADENCE, env.rng.clone(), move || {
        swell(&env_for_timer, filter, gain)
    });
}

fn swell(env: &SynthEnv, filter: NodeId, gain: NodeId) {
    let wave = WaveSwell::draw(&env.rng);
    let mut ctx = lock(&env.ctx);
    if ctx.is_closed() {
        return;
    }
    let now = ctx.current_time();
    if let Some(param) = ctx.gain_param(gain) {
        wave.apply_gain(param, now);
    }
    if let Some(param) = ctx.frequency_param(filter) {
        wave.apply_sweep(param, now);
    }
}

fn rain(env: &SynthEnv) {
    {
        let mut ctx = lock(&env.ctx);
        if ctx.is_closed() {
            return;
        }
        let source = ctx.create_noise_source(env.noise.clone());
        let highpass = ctx.create_filter(FilterType::Highpass, RAIN_HIGHPASS_HZ);
        let lowpass = ctx.create_filter(FilterType::Lowpass, RAIN_LOWPASS_HZ);
        let gain = ctx.create_gain(RAIN_LEVEL);
        ctx.connect(source, highpass);
        ctx.connect(highpass, lowpass);
        ctx.connect(lowpass, gain);
        ctx.connect(gain, env.master);
        let now = ctx.current_time();
        ctx.start(source, now);
        env.registry
            .register_nodes(&[source, highpass, lowpass, gain]);
    }

    let env_for_timer = env.clone();
    env.registry.every(DROPLET_CADENCE, env.rng.clone(), move || {
        if env_for_timer.rng.above(DROPLET_GATE) {
            droplet(&env_for_timer);
        }
    });
}

fn droplet(env: &SynthEnv) {
    let frequency = env.rng.range(2000.0, 4000.0);
    let mut ctx = lock(&env.ctx);
    if ctx.is_closed() {
        return;
    }
    let osc = ctx.create_oscillator(frequency);
    let gain = ctx.create_gain(DROPLET_PEAK);
    ctx.connect(osc, gain);
    ctx.connect(gain, env.master);
    ctx.release_when_silent(gain);

    let now = ctx.current_time();
    if let Some(param) = ctx.gain_param(gain) {
        decay(param, DROPLET_PEAK, now, DROPLET_SECONDS);
    }
    ctx.start(osc, now);
    ctx.stop(osc, now + DROPLET_SECONDS);
}

fn birds(env: &SynthEnv) {
    let env_for_timer = env.clone();
    env.registry.every(BIRD_CADENCE, env.rng.clone(), move || {
        let env = &env_for_timer;
        if !env.rng.above(CHIRP_GATE) {
            return;
        }
        chirp(env);
        if env.rng.above(SECOND_CHIRP_GATE) {
            let follow = env.clone();
            env.registry
                .after(Duration::from_millis(200), move || chirp(&follow));
        }
        if env.rng.above(THIRD_CHIRP_GATE) {
            let follow = env.clone();
            env.registry
                .after(Duration::from_millis(400), move || chirp(&follow));
        }
    });

    chirp(env);
    let follow = env.clone();
    env.registry
        .after(Duration::from_millis(500), move || chirp(&follow));
}

fn chirp(env: &SynthEnv) {
    let base = env.rng.range(2000.0, 4000.0);
    let mut ctx = lock(&env.ctx);
    if ctx.is_closed() {
        return;
    }
    let osc = ctx.create_oscillator(base);
    let gain = ctx.create_gain(0.0);
    ctx.connect(osc, gain);
    ctx.connect(gain, env.master);
    ctx.release_when_silent(gain);

    let now = ctx.current_time();
    if let Some(param) = ctx.frequency_param(osc) {
        chirp_pitch(param, base, now);
    }
    if let Some(param) = ctx.gain_param(gain) {
        chirp_gain(param, now);
    }
    ctx.start(osc, now);
    ctx.stop(osc, now + CHIRP_STOP_SECONDS);
}

fn chimes(env: &SynthEnv) {
    let env_for_timer = env.clone();
    env.registry.every(CHIME_CADENCE, env.rng.clone(), move || {
        let env = &env_for_timer;
        if !env.rng.above(CHIME_GATE) {
            return;
        }
        chime(env);
        if env.rng.above(CHIME_PAIR_GATE) {
            let follow = env.clone();
            env.registry
                .after(Duration::from_millis(100), move || chime(&follow));
        }
    });

    chime(env);
    let follow = env.clone();
    env.registry
        .after(Duration::from_millis(800), move || chime(&follow));
}

fn chime(env: &SynthEnv) {
    let fundamental = CHIME_FREQUENCIES[env.rng.index(CHIME_FREQUENCIES.len())];
    let mut ctx = lock(&env.ctx);
    if ctx.is_closed() {
        return;
    }
    let now = ctx.current_time();
    for (frequency, peak, seconds) in [
        (fundamental, 0.15, 3.0),
        (fundamental * CHIME_HARMONIC, 0.05, 2.0),
    ] {
        let osc = ctx.create_oscillator(frequency);
        let gain = ctx.create_gain(peak);
        ctx.connect(osc, gain);
        ctx.connect(gain, env.master);
        ctx.release_when_silent(gain);
        if let Some(param) = ctx.gain_param(gain) {
            decay(param, peak, now, seconds);
        }
        ctx.start(osc, now);
        ctx.stop(osc, now + seconds);
    }
}
