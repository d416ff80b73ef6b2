//! Sample-accurate parameter automation.
//!
//! An [`AudioParam`] holds a default value plus a time-ordered list of
//! automation events. Evaluation follows the Web Audio rules: a ramp starts
//! from the event before it, the value holds after the last event, and an
//! exponential ramp cannot cross or start from zero.

/// One scheduled automation event. Times are in context seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    SetValue { time: f64, value: f32 },
    LinearRamp { time: f64, value: f32 },
    ExponentialRamp { time: f64, value: f32 },
}

impl Automation {
    fn time(&self) -> f64 {
        match *self {
            Automation::SetValue { time, .. }
            | Automation::LinearRamp { time, .. }
            | Automation::ExponentialRamp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            Automation::SetValue { value, .. }
            | Automation::LinearRamp { value, .. }
            | Automation::ExponentialRamp { value, .. } => value,
        }
    }
}

/// An automatable node parameter (gain, cutoff frequency, oscillator pitch).
#[derive(Debug, Clone)]
pub struct AudioParam {
    default: f32,
    events: Vec<Automation>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self {
            default: value,
            events: Vec::new(),
        }
    }

    /// Set the value immediately, dropping any pending automation.
    pub fn set_value(&mut self, value: f32) {
        self.default = value;
        self.events.clear();
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(Automation::LinearRamp {
            time: end_time,
            value,
        });
    }

    pub fn exponential_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(Automation::ExponentialRamp {
            time: end_time,
            value,
        });
    }

    /// Number of automation events still on the timeline.
    #[cfg(test)]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    // Events scheduled for the same instant keep their insertion order.
    fn insert(&mut self, event: Automation) {
        let at = self
            .events
            .iter()
            .position(|e| e.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(at, event);
    }

    /// Evaluate the parameter at context time `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        // Index of the first event strictly in the future.
        let next = self
            .events
            .iter()
            .position(|e| e.time() > t)
            .unwrap_or(self.events.len());

        let (t0, v0) = match next.checked_sub(1) {
            Some(prev) => (self.events[prev].time(), self.events[prev].value()),
            None => {
                // No anchor yet: hold the default until the first event.
                return self.default;
            }
        };

        let Some(upcoming) = self.events.get(next) else {
            return v0;
        };

        let t1 = upcoming.time();
        let span = t1 - t0;
        if span <= 0.0 {
            return v0;
        }
        let progress = ((t - t0) / span) as f32;

        match *upcoming {
            Automation::SetValue { .. } => v0,
            Automation::LinearRamp { value: v1, .. } => v0 + (v1 - v0) * progress,
            Automation::ExponentialRamp { value: v1, .. } => {
                if v0 == 0.0 || v0.signum() != v1.signum() {
                    v0
                } else {
                    v0 * (v1 / v0).powf(progress)
                }
            }
        }
    }

    /// Fold events that can no longer influence any time `>= t` into the
    /// default value.
    pub fn prune(&mut self, t: f64) {
        while self.events.len() >= 2 && self.events[1].time() <= t {
            self.default = self.events[0].value();
            self.events.remove(0);
        }
        if self.events.len() == 1 && self.events[0].time() <= t {
            self.default = self.events[0].value();
            self.events.clear();
        }
    }
}
