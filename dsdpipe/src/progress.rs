//! Progress reporting: throttled snapshots with a cancel return channel.

use std::time::{Duration, Instant};

/// What the callback sees.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    /// 1-based current track number.
    pub track: u32,
    pub track_count: u32,
    /// Aggregate bytes written across every sink.
    pub bytes_written: u64,
    /// Percent of the current track, 0..=100.
    pub track_percent: f64,
    /// Percent of the whole run, non-decreasing, reaches 100 on success.
    pub total_percent: f64,
    /// Display title for the current track, when known.
    pub title: Option<String>,
}

/// Callback verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Cancel,
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot) -> ProgressAction + Send>;

/// Minimum spacing of timer-driven snapshots.
const MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Wraps the user callback: throttles timer emissions, forces boundary
/// emissions, and keeps `total_percent` monotone.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last_emit: Option<Instant>,
    high_water: f64,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        ProgressReporter {
            callback,
            last_emit: None,
            high_water: 0.0,
        }
    }

    /// Emit a snapshot; `force` bypasses the throttle (track boundaries,
    /// completion). Returns `Cancel` when the callback asks to stop.
    pub fn emit(&mut self, mut snapshot: ProgressSnapshot, force: bool) -> ProgressAction {
        let Some(callback) = self.callback.as_mut() else {
            return ProgressAction::Continue;
        };
        if !force {
            if let Some(last) = self.last_emit {
                if last.elapsed() < MIN_INTERVAL {
                    return ProgressAction::Continue;
                }
            }
        }
        snapshot.total_percent = snapshot.total_percent.clamp(self.high_water, 100.0);
        self.high_water = snapshot.total_percent;
        self.last_emit = Some(Instant::now());
        callback(&snapshot)
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
        self.high_water = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn timer_emissions_are_throttled() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut reporter = ProgressReporter::new(Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            ProgressAction::Continue
        })));

        for _ in 0..100 {
            reporter.emit(ProgressSnapshot::default(), false);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_emissions_bypass_the_throttle() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut reporter = ProgressReporter::new(Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            ProgressAction::Continue
        })));

        for _ in 0..5 {
            reporter.emit(ProgressSnapshot::default(), true);
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn total_percent_is_monotone() {
        let highs = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = highs.clone();
        let mut reporter = ProgressReporter::new(Some(Box::new(move |snapshot| {
            seen.lock().unwrap().push(snapshot.total_percent);
            ProgressAction::Continue
        })));

        for percent in [10.0, 5.0, 50.0, 40.0, 100.0, 99.0] {
            reporter.emit(
                ProgressSnapshot {
                    total_percent: percent,
                    ..Default::default()
                },
                true,
            );
        }
        let seen = highs.lock().unwrap();
        assert_eq!(&*seen, &[10.0, 10.0, 50.0, 50.0, 100.0, 100.0]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
