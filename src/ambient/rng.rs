//! Pluggable randomness for the ambient generators.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::sync::lock;

/// Source of uniform values in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_unit(&mut self) -> f32;

    /// Uniform value in `[low, high)`.
    fn range(&mut self, low: f32, high: f32) -> f32 {
        low + self.next_unit() * (high - low)
    }

    /// True with probability `1 - threshold` (a draw strictly above it).
    fn above(&mut self, threshold: f32) -> bool {
        self.next_unit() > threshold
    }

    /// Index in `0..len`; `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize {
        ((self.next_unit() * len as f32) as usize).min(len.saturating_sub(1))
    }
}

/// OS-seeded generator used at runtime.
pub struct ThreadRandom {
    rng: StdRng,
}

impl ThreadRandom {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl Default for ThreadRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ThreadRandom {
    fn next_unit(&mut self) -> f32 {
        self.rng.random::<f32>()
    }
}

/// Replays a fixed list of values, cycling when exhausted.
#[cfg(test)]
pub struct SequenceRandom {
    values: Vec<f32>,
    cursor: usize,
}

#[cfg(test)]
impl SequenceRandom {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, cursor: 0 }
    }

    /// Always returns the same value.
    pub fn constant(value: f32) -> Self {
        Self::new(vec![value])
    }
}

#[cfg(test)]
impl RandomSource for SequenceRandom {
    fn next_unit(&mut self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.cursor % self.values.len()];
        self.cursor = self.cursor.wrapping_add(1);
        value.clamp(0.0, 0.999_999)
    }
}

/// Random source shared between a session and its timer tasks.
#[derive(Clone)]
pub struct SharedRandom(Arc<Mutex<Box<dyn RandomSource>>>);

impl SharedRandom {
    pub fn new(source: impl RandomSource + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(source))))
    }

    pub fn thread() -> Self {
        Self::new(ThreadRandom::new())
    }

    /// Run `f` with exclusive access to the underlying source.
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn RandomSource) -> T) -> T {
        f(&mut **lock(&self.0))
    }

    pub fn next_unit(&self) -> f32 {
        self.with(|r| r.next_unit())
    }

    pub fn range(&self, low: f32, high: f32) -> f32 {
        self.with(|r| r.range(low, high))
    }

    pub fn above(&self, threshold: f32) -> bool {
        self.with(|r| r.above(threshold))
    }

    pub fn index(&self, len: usize) -> usize {
        self.with(|r| r.index(len))
    }
}
