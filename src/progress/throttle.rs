//! Rate limiting for progress notifications.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Throttle settings shared by every operation of a tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Minimum change in percentage points between two notifications
    pub min_percentage_delta: f64,
    /// Maximum notifications in any one-second window (0 disables the cap)
    pub max_notifications_per_second: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_percentage_delta: 1.0,
            max_notifications_per_second: 10,
        }
    }
}

/// Per-operation notification throttle.
///
/// A progress notification passes when the percentage moved by at least
/// `min_percentage_delta` since the last delivered one and fewer than
/// `max_notifications_per_second` were delivered in the last second.
/// Forced notifications (status changes) always pass and are counted.
#[derive(Debug, Clone)]
pub struct NotificationThrottle {
    config: ThrottleConfig,
    last_percentage: Option<f64>,
    sent: VecDeque<Instant>,
}

impl NotificationThrottle {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_percentage: None,
            sent: VecDeque::new(),
        }
    }

    /// Decide whether a progress notification at `percentage` goes out now.
    ///
    /// Records the notification when it passes.
    pub fn allow(&mut self, percentage: f64, now: Instant) -> bool {
        self.expire(now);

        if let Some(last) = self.last_percentage {
            if (percentage - last).abs() < self.config.min_percentage_delta {
                return false;
            }
        }
        let cap = self.config.max_notifications_per_second as usize;
        if cap > 0 && self.sent.len() >= cap {
            return false;
        }

        self.record(percentage, now);
        true
    }

    /// Record a notification that bypassed the throttle.
    pub fn force(&mut self, percentage: f64, now: Instant) {
        self.expire(now);
        self.record(percentage, now);
    }

    fn record(&mut self, percentage: f64, now: Instant) {
        self.last_percentage = Some(percentage);
        self.sent.push_back(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
