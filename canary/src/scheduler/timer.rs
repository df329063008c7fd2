use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Fixed-period ticker driving the scheduler loop.
pub(crate) struct Timer {
    interval: Interval,
    last_tick: Instant,
    interval_dur: Duration,
}

impl Timer {
    pub fn new(interval_dur: Duration) -> Self {
        let mut interval = interval(interval_dur);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            last_tick: Instant::now(),
            interval_dur,
        }
    }

    /// Wait for the next tick and return the time since the previous one.
    ///
    /// NOTE: The first tick completes immediately.
    pub async fn tick(&mut self) -> Duration {
        self.interval.tick().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        elapsed
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_interval() {
        let mut timer = Timer::new(Duration::from_millis(100));
        assert_eq!(timer.to_string(), "100ms");

        assert_eq!(timer.tick().await, Duration::ZERO);
        assert_eq!(timer.tick().await, Duration::from_millis(100));

        // A slow consumer delays the next tick instead of bursting.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(timer.tick().await, Duration::from_millis(250));
        assert_eq!(timer.tick().await, Duration::from_millis(100));
    }
}
