use std::time::Duration;

use tokio::time::Instant;

/// Waiting-time counter owned by one exchange: started at submit, stopped
/// on the first terminal transition.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeTimer {
    started: Instant,
    stopped: Option<Duration>,
}

impl ExchangeTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            stopped: None,
        }
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Time waited so far, or the frozen total once stopped.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.stopped.unwrap_or_else(|| self.started.elapsed())
    }

    /// Freeze the counter. Later calls keep the first value.
    pub fn stop(&mut self) -> Duration {
        *self.stopped.get_or_insert_with(|| self.started.elapsed())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stopped.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_elapsed() {
        let mut timer = ExchangeTimer::start();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(timer.is_running());
        assert_eq!(timer.stop(), Duration::from_millis(1500));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed(), Duration::from_millis(1500));
        assert_eq!(timer.stop(), Duration::from_millis(1500));
    }
}
