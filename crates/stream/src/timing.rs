use std::time::Duration;

use crate::error::StreamError;

/// Ticks between snapshots: `max(1, round(simulation_hz / snapshot_hz))`.
pub fn snapshot_interval_ticks(simulation_hz: f32, snapshot_hz: f32) -> Result<u64, StreamError> {
    if !(simulation_hz > 0.0) {
        return Err(StreamError::InvalidRate(simulation_hz));
    }
    if !(snapshot_hz > 0.0) {
        return Err(StreamError::InvalidRate(snapshot_hz));
    }
    Ok(((simulation_hz / snapshot_hz).round() as u64).max(1))
}

/// A wall-clock interval in whole ticks: `max(1, round(seconds * simulation_hz))`.
/// Used for keyframe spacing and migration retry.
pub fn seconds_to_ticks(seconds: f32, simulation_hz: f32) -> u64 {
    ((seconds * simulation_hz).round().max(0.0) as u64).max(1)
}

/// Fixed tick period for a simulation rate.
pub fn tick_period(simulation_hz: f32) -> Result<Duration, StreamError> {
    if !(simulation_hz > 0.0 && simulation_hz.is_finite()) {
        return Err(StreamError::InvalidRate(simulation_hz));
    }
    Ok(Duration::from_secs_f64(1.0 / simulation_hz as f64))
}

/// Rolling tick-duration history for instrumentation.
#[derive(Debug, Clone)]
pub struct TickTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
    overruns: u64,
    budget: Duration,
}

impl TickTimer {
    /// `budget` is the tick period; durations longer than it count as overruns.
    pub fn new(capacity: usize, budget: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
            overruns: 0,
            budget,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if dt > self.budget {
            self.overruns += 1;
            tracing::debug!(?dt, budget = ?self.budget, "tick overran budget");
        }
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn samples(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        self.samples().iter().sum::<Duration>() / count as u32
    }

    pub fn max(&self) -> Duration {
        self.samples().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.samples().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}
