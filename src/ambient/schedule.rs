//! Envelope scheduling: jittered timers owned by a session's cleanup
//! registry, and the parameter envelopes the generators apply on each
//! trigger.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::node::NodeId;
use super::param::AudioParam;
use super::rng::SharedRandom;

/// Re-trigger period: a fixed base plus up to `jitter`, redrawn per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub base: Duration,
    pub jitter: Duration,
}

impl Cadence {
    pub const fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    pub const fn jittered(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    pub fn next_period(&self, rng: &SharedRandom) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        self.base + self.jitter.mul_f32(rng.next_unit())
    }
}

#[derive(Default)]
struct RegistryInner {
    timers: Vec<JoinHandle<()>>,
    nodes: Vec<NodeId>,
    cleared: bool,
}

/// Everything a playback session must release on teardown: persistent
/// nodes and every periodic or delayed timer.
///
/// Cloned into timer tasks so callbacks can register follow-ups. Once
/// [`cancel_timers`](Self::cancel_timers) ran, any new timer is aborted on
/// registration.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        crate::sync::lock(&self.inner)
    }

    pub fn register_nodes(&self, ids: &[NodeId]) {
        let mut inner = self.lock();
        if !inner.cleared {
            inner.nodes.extend_from_slice(ids);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut inner = self.lock();
        if inner.cleared {
            handle.abort();
            return;
        }
        inner.timers.retain(|h| !h.is_finished());
        inner.timers.push(handle);
    }

    /// Run `tick` repeatedly, sleeping one cadence period before each call.
    pub fn every(
        &self,
        cadence: Cadence,
        rng: SharedRandom,
        mut tick: impl FnMut() + Send + 'static,
    ) {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(cadence.next_period(&rng)).await;
                tick();
            }
        });
        self.track(handle);
    }

    /// Run `f` once after `delay`.
    pub fn after(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        self.track(handle);
    }

    /// Abort every timer and refuse new ones. Returns how many were still
    /// pending; a second call returns 0.
    pub fn cancel_timers(&self) -> usize {
        let mut inner = self.lock();
        inner.cleared = true;
        let mut pending = 0;
        for handle in inner.timers.drain(..) {
            if !handle.is_finished() {
                pending += 1;
            }
            handle.abort();
        }
        pending
    }

    pub fn take_nodes(&self) -> Vec<NodeId> {
        std::mem::take(&mut self.lock().nodes)
    }

    pub fn pending_timers(&self) -> usize {
        self.lock().timers.iter().filter(|h| !h.is_finished()).count()
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }
}

/// One ocean wave: swell in, ebb, fade out, with a matching filter sweep.
#[derive(Debug, Clone, Copy)]
pub struct WaveSwell {
    pub duration: f64,
}

impl WaveSwell {
    pub const MIN_SECONDS: f64 = 4.0;
    pub const SPREAD_SECONDS: f64 = 4.0;
    pub const PEAK: f32 = 0.3;
    pub const EBB: f32 = 0.1;

    pub fn draw(rng: &SharedRandom) -> Self {
        Self {
            duration: Self::MIN_SECONDS + rng.next_unit() as f64 * Self::SPREAD_SECONDS,
        }
    }

    pub fn apply_gain(&self, gain: &mut AudioParam, now: f64) {
        let d = self.duration;
        gain.set_value_at_time(0.0, now);
        gain.linear_ramp_to_value_at_time(Self::PEAK, now + d * 0.3);
        gain.linear_ramp_to_value_at_time(Self::EBB, now + d * 0.7);
        gain.linear_ramp_to_value_at_time(0.0, now + d);
    }

    pub fn apply_sweep(&self, cutoff: &mut AudioParam, now: f64) {
        let d = self.duration;
        cutoff.set_value_at_time(200.0, now);
        cutoff.linear_ramp_to_value_at_time(600.0, now + d * 0.3);
        cutoff.linear_ramp_to_value_at_time(300.0, now + d);
    }
}

pub const CHIRP_STOP_SECONDS: f64 = 0.3;

/// Warble over 200ms: up, dip, higher, back to base.
pub fn chirp_pitch(frequency: &mut AudioParam, base: f32, now: f64) {
    frequency.set_value_at_time(base, now);
    frequency.linear_ramp_to_value_at_time(base * 1.5, now + 0.05);
    frequency.linear_ramp_to_value_at_time(base * 1.2, now + 0.1);
    frequency.linear_ramp_to_value_at_time(base * 1.8, now + 0.15);
    frequency.linear_ramp_to_value_at_time(base, now + 0.2);
}

pub fn chirp_gain(gain: &mut AudioParam, now: f64) {
    gain.set_value_at_time(0.0, now);
    gain.linear_ramp_to_value_at_time(0.08, now + 0.02);
    gain.linear_ramp_to_value_at_time(0.05, now + 0.1);
    gain.linear_ramp_to_value_at_time(0.08, now + 0.15);
    gain.linear_ramp_to_value_at_time(0.0, now + 0.25);
}

/// Exponential fall from `peak` to near silence over `seconds`.
pub fn decay(gain: &mut AudioParam, peak: f32, now: f64, seconds: f64) {
    gain.set_value_at_time(peak, now);
    gain.exponential_ramp_to_value_at_time(0.001, now + seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::rng::SequenceRandom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cadence_stays_within_base_plus_jitter() {
        let rng = SharedRandom::thread();
        let cadence = Cadence::jittered(Duration::from_millis(5000), Duration::from_millis(3000));
        for _ in 0..100 {
            let period = cadence.next_period(&rng);
            assert!(period >= Duration::from_millis(5000));
            assert!(period < Duration::from_millis(8000));
        }
    }

    #[test]
    fn wave_swell_duration_in_range_and_envelope_bounded() {
        let rng = SharedRandom::thread();
        for _ in 0..50 {
            let swell = WaveSwell::draw(&rng);
            assert!(swell.duration >= 4.0 && swell.duration < 8.0);

            let mut gain = AudioParam::new(0.0);
            swell.apply_gain(&mut gain, 10.0);
            for step in 0..=80 {
                let v = gain.value_at(10.0 + step as f64 * 0.1);
                assert!((0.0..=WaveSwell::PEAK + 1e-6).contains(&v));
            }
            assert_eq!(gain.value_at(10.0 + swell.duration), 0.0);
        }
    }

    #[test]
    fn chirp_envelope_returns_to_silence() {
        let mut gain = AudioParam::new(0.0);
        chirp_gain(&mut gain, 1.0);
        assert!(gain.value_at(1.02) > 0.07);
        assert_eq!(gain.value_at(1.25), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_fires_and_cancels() {
        let registry = CleanupRegistry::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        registry.every(
            Cadence::fixed(Duration::from_millis(100)),
            SharedRandom::new(SequenceRandom::constant(0.0)),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(registry.pending_timers(), 1);

        assert_eq!(registry.cancel_timers(), 1);
        assert_eq!(registry.cancel_timers(), 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(registry.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_registered_after_clear_never_run() {
        let registry = CleanupRegistry::new();
        registry.cancel_timers();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        registry.after(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.pending_timers(), 0);
    }
}
