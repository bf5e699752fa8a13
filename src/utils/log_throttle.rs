use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Window during which repeated caller cancellations are logged only once.
pub const CANCELLATION_LOG_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Allows one log line per window.
///
/// The first call always logs. Later calls log again only once the window has fully
/// elapsed since the last emitted line; suppressed calls do not extend the window.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    last_logged: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_logged: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a line may be emitted now. Records the emission when it may.
    pub fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    pub fn should_log_at(&self, now: Instant) -> bool {
        let mut last_logged = match self.last_logged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last_logged {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                *last_logged = Some(now);
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(CANCELLATION_LOG_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_logs() {
        let throttle = LogThrottle::default();
        assert_eq!(throttle.window(), Duration::from_secs(3600));
        assert!(throttle.should_log_at(Instant::now()));
    }

    #[test]
    fn test_suppressed_within_window() {
        let throttle = LogThrottle::default();
        let start = Instant::now();

        assert!(throttle.should_log_at(start));
        assert!(!throttle.should_log_at(start + Duration::from_secs(1)));
        assert!(!throttle.should_log_at(start + Duration::from_secs(3599)));
        assert!(throttle.should_log_at(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_suppressed_calls_do_not_extend_window() {
        let throttle = LogThrottle::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(throttle.should_log_at(start));
        for secs in 1..10 {
            assert!(!throttle.should_log_at(start + Duration::from_secs(secs)));
        }
        assert!(throttle.should_log_at(start + Duration::from_secs(10)));
        assert!(!throttle.should_log_at(start + Duration::from_secs(15)));
    }
}
