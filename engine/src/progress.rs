//! Progress telemetry.
//!
//! `ProgressTelemetry` turns raw byte counters into a smoothed speed, a
//! percentage and an ETA. It is owned by the transfer loop and sampled after
//! every chunk, but only produces a snapshot once per configured interval.
//!
//! `SpeedHistory` is the bounded series behind a live speed graph. It lives on
//! the shared `TransferState` so the caller can read it at any time.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Weight of the newest interval in the exponential moving average
const SMOOTHING_ALPHA: f64 = 0.3;

/// ETAs are capped here so extreme speed drops never overflow a `Duration`
const MAX_ETA: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// One point of the speed graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Active (unpaused) time since the job started
    pub elapsed: Duration,
    /// Throughput over the last interval, bytes per second
    pub speed: f64,
    /// Cumulative percent complete, 0..=100
    pub percent: f64,
}

/// Fixed-capacity ring of progress samples with an auto-scaling ceiling.
#[derive(Debug, Clone)]
pub struct SpeedHistory {
    samples: VecDeque<ProgressSample>,
    capacity: usize,
    floor: f64,
    scale: f64,
}

impl SpeedHistory {
    /// `capacity` is the number of retained samples (at least 1);
    /// `floor` is the smallest graph ceiling in bytes per second.
    pub fn new(capacity: usize, floor: f64) -> Self {
        let capacity = capacity.max(1);
        let floor = if floor.is_finite() && floor > 0.0 { floor } else { 1.0 };
        SpeedHistory {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            floor,
            scale: floor,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: ProgressSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        // Rise to a new peak at once, fall back slowly.
        let target = self
            .samples
            .iter()
            .map(|s| s.speed)
            .filter(|s| s.is_finite())
            .fold(0.0_f64, f64::max);
        self.scale = if target > self.scale {
            target
        } else {
            self.scale * 0.95 + target * 0.05
        };
        self.scale = self.scale.max(self.floor);
    }

    pub fn samples(&self) -> Vec<ProgressSample> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current graph ceiling in bytes per second
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Sample speeds divided by the current ceiling, each in `[0, 1]`.
    pub fn normalized(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| {
                if s.speed.is_finite() {
                    (s.speed / self.scale).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.scale = self.floor;
    }
}

/// A point-in-time view of job progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: f64,
    /// Smoothed speed, bytes per second
    pub speed: f64,
    /// Speed over the last interval only, bytes per second
    pub instantaneous: f64,
    /// `None` while speed is unknown
    pub eta: Option<Duration>,
    /// Active (unpaused) time since the job started
    pub elapsed: Duration,
}

/// Smoothed speed and ETA over a stream of counter updates.
#[derive(Debug)]
pub struct ProgressTelemetry {
    interval: Duration,
    started: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
    last_at: Instant,
    last_done: u64,
    smoothed: Option<f64>,
}

impl ProgressTelemetry {
    pub fn new(interval: Duration, now: Instant) -> Self {
        ProgressTelemetry {
            interval,
            started: now,
            paused_total: Duration::ZERO,
            paused_at: None,
            last_at: now,
            last_done: 0,
            smoothed: None,
        }
    }

    /// Record the counters after a chunk.
    ///
    /// Returns a snapshot at most once per interval; `None` otherwise.
    pub fn record(&mut self, now: Instant, done: u64, total: u64) -> Option<ProgressSnapshot> {
        let dt = now.saturating_duration_since(self.last_at);
        if dt < self.interval || dt.is_zero() {
            return None;
        }

        let delta = done.saturating_sub(self.last_done);
        let instantaneous = delta as f64 / dt.as_secs_f64();
        let smoothed = match self.smoothed {
            Some(prev) => prev + SMOOTHING_ALPHA * (instantaneous - prev),
            None => instantaneous,
        };
        self.smoothed = Some(smoothed);
        self.last_at = now;
        self.last_done = done;

        Some(self.snapshot_at(now, done, total, instantaneous))
    }

    /// Snapshot without touching the smoothing state (used at file boundaries).
    pub fn snapshot(&self, now: Instant, done: u64, total: u64) -> ProgressSnapshot {
        self.snapshot_at(now, done, total, 0.0)
    }

    fn snapshot_at(&self, now: Instant, done: u64, total: u64, instantaneous: f64) -> ProgressSnapshot {
        let speed = self.smoothed.unwrap_or(0.0);
        ProgressSnapshot {
            percent: percent(done, total),
            speed,
            instantaneous,
            eta: eta(total.saturating_sub(done), speed),
            elapsed: self.active_elapsed(now),
        }
    }

    /// Note that the loop stopped for a pause.
    pub fn on_pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Note that the loop continues; paused time is excluded from speed and elapsed.
    pub fn on_resume(&mut self, now: Instant) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
        }
        self.last_at = now;
    }

    pub fn active_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }
}

/// Percent complete, clamped to `[0, 100]`. An empty job counts as complete.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Time left at `speed` bytes per second; `None` when speed is zero or undefined.
pub fn eta(remaining: u64, speed: f64) -> Option<Duration> {
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let secs = remaining as f64 / speed;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    if secs >= MAX_ETA.as_secs_f64() {
        return Some(MAX_ETA);
    }
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(speed: f64) -> ProgressSample {
        ProgressSample {
            elapsed: Duration::ZERO,
            speed,
            percent: 0.0,
        }
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn test_eta_unknown_for_zero_or_bad_speed() {
        assert_eq!(eta(100, 0.0), None);
        assert_eq!(eta(100, -5.0), None);
        assert_eq!(eta(100, f64::NAN), None);
        assert_eq!(eta(100, f64::INFINITY), None);
        assert_eq!(eta(100, 50.0), Some(Duration::from_secs(2)));
        assert_eq!(eta(u64::MAX, f64::MIN_POSITIVE), Some(MAX_ETA));
    }

    #[test]
    fn test_record_respects_interval() {
        let start = Instant::now();
        let mut telemetry = ProgressTelemetry::new(Duration::from_millis(100), start);

        assert!(telemetry
            .record(start + Duration::from_millis(10), 1_000, 10_000)
            .is_none());
        let snap = telemetry
            .record(start + Duration::from_millis(100), 1_000, 10_000)
            .expect("interval elapsed");
        assert_eq!(snap.percent, 10.0);
        assert!((snap.speed - 10_000.0).abs() < 1e-6);
        assert_eq!(snap.eta, Some(Duration::from_secs_f64(0.9)));
    }

    #[test]
    fn test_smoothing_damps_spikes() {
        let start = Instant::now();
        let step = Duration::from_millis(100);
        let mut telemetry = ProgressTelemetry::new(step, start);

        let mut done = 0;
        let mut at = start;
        for _ in 0..10 {
            done += 1_000;
            at += step;
            telemetry.record(at, done, 1_000_000);
        }
        // One interval ten times faster than the rest
        done += 10_000;
        at += step;
        let snap = telemetry.record(at, done, 1_000_000).unwrap();
        assert!(snap.instantaneous > 99_000.0);
        assert!(snap.speed < snap.instantaneous);
        assert!(snap.speed > 10_000.0);
        assert!(snap.eta.is_some());
    }

    #[test]
    fn test_pause_excluded_from_elapsed() {
        let start = Instant::now();
        let mut telemetry = ProgressTelemetry::new(Duration::from_millis(10), start);
        telemetry.on_pause(start + Duration::from_secs(1));
        telemetry.on_resume(start + Duration::from_secs(6));
        assert_eq!(
            telemetry.active_elapsed(start + Duration::from_secs(7)),
            Duration::from_secs(2)
        );
        // No bytes moved across the pause, so the first interval after resume is measured from resume
        let snap = telemetry
            .record(start + Duration::from_secs(7), 1_000, 2_000)
            .unwrap();
        assert!((snap.instantaneous - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = SpeedHistory::new(3, 1.0);
        for speed in [1.0, 2.0, 3.0, 4.0] {
            history.push(sample(speed));
        }
        let speeds: Vec<f64> = history.samples().iter().map(|s| s.speed).collect();
        assert_eq!(speeds, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_history_scale_rises_fast_and_decays_slowly() {
        let mut history = SpeedHistory::new(2, 10.0);
        history.push(sample(5.0));
        assert_eq!(history.scale(), 10.0);

        history.push(sample(100.0));
        assert_eq!(history.scale(), 100.0);

        // Peak drops out of the window; the ceiling only eases down
        history.push(sample(20.0));
        history.push(sample(20.0));
        assert!(history.scale() < 100.0);
        assert!(history.scale() > 20.0);

        let normalized = history.normalized();
        assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_history_clear_resets_scale() {
        let mut history = SpeedHistory::new(4, 10.0);
        history.push(sample(500.0));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.scale(), 10.0);
        assert_eq!(history.capacity(), 4);
    }
}
