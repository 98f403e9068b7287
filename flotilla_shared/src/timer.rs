//! Tick-driven countdown timer.
//!
//! The match start countdown and turn deadline are driven by the simulation
//! tick rather than wall-clock callbacks, so tests advance them
//! deterministically with [`Timer::advance`].

use std::time::Duration;

/// What happened during one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerProgress {
    /// Whole intervals crossed during this advance.
    pub ticks: u32,
    /// The timer reached its duration during this advance. Reported once.
    pub completed: bool,
}

/// Counts toward a fixed duration in whole-interval steps.
#[derive(Debug, Clone)]
pub struct Timer {
    duration: Duration,
    interval: Duration,
    elapsed: Duration,
    countdown: bool,
    completed: bool,
}

impl Timer {
    /// One-second interval, counting up.
    pub fn new(duration: Duration) -> Self {
        Self::with_interval(duration, Duration::from_secs(1))
    }

    pub fn with_interval(duration: Duration, interval: Duration) -> Self {
        Self {
            duration,
            interval: interval.max(Duration::from_millis(1)),
            elapsed: Duration::ZERO,
            countdown: false,
            completed: false,
        }
    }

    /// Counts down instead of up; [`Timer::in_seconds`] reports remaining.
    pub fn countdown(duration: Duration) -> Self {
        let mut timer = Self::new(duration);
        timer.countdown = true;
        timer
    }

    /// Advances the timer and reports crossed intervals and completion.
    pub fn advance(&mut self, dt: Duration) -> TimerProgress {
        if self.completed {
            return TimerProgress::default();
        }

        let before = self.elapsed.as_millis() / self.interval.as_millis();
        self.elapsed = (self.elapsed + dt).min(self.duration);
        let after = self.elapsed.as_millis() / self.interval.as_millis();

        let completed = self.elapsed >= self.duration;
        self.completed = completed;

        TimerProgress {
            ticks: (after - before) as u32,
            completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Elapsed (count-up) or remaining (countdown) time in whole seconds.
    pub fn in_seconds(&self) -> u64 {
        let time = if self.countdown {
            self.duration.saturating_sub(self.elapsed)
        } else {
            self.elapsed
        };
        time.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_reports_remaining_seconds() {
        let mut timer = Timer::countdown(Duration::from_secs(3));
        assert_eq!(timer.in_seconds(), 3);

        let progress = timer.advance(Duration::from_secs(1));
        assert_eq!(progress.ticks, 1);
        assert!(!progress.completed);
        assert_eq!(timer.in_seconds(), 2);
    }

    #[test]
    fn completion_is_reported_once() {
        let mut timer = Timer::countdown(Duration::from_secs(2));

        let progress = timer.advance(Duration::from_secs(5));
        assert!(progress.completed);
        assert_eq!(timer.in_seconds(), 0);

        let progress = timer.advance(Duration::from_secs(1));
        assert!(!progress.completed);
        assert_eq!(progress.ticks, 0);
    }

    #[test]
    fn fractional_advances_accumulate() {
        let mut timer = Timer::new(Duration::from_secs(1));
        for _ in 0..9 {
            assert_eq!(timer.advance(Duration::from_millis(100)).ticks, 0);
        }
        let progress = timer.advance(Duration::from_millis(100));
        assert_eq!(progress.ticks, 1);
        assert!(progress.completed);
    }
}
