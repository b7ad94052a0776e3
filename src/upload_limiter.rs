use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of a rate-limit acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Admitted; quota left in the current window after this acquisition
    Admitted { remaining: u32 },
    /// Rejected; seconds until the current window expires
    Rejected { retry_after_secs: u64 },
}

struct Window {
    count: u32,
    started: Instant,
}

/// Per-user fixed-window counter for upload authorizations
///
/// The window starts at the first admitted request and resets once
/// `window` has elapsed, mirroring a cache entry expiring by TTL.
/// Acquisitions are an observable side effect: an admitted slot is not
/// returned if the caller later fails for an unrelated reason.
pub struct UploadRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<Uuid, Window>>,
}

impl UploadRateLimiter {
    /// Create a limiter admitting `limit` acquisitions per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take one slot for the user
    pub fn try_acquire(&self, user_id: Uuid) -> LimitDecision {
        self.try_acquire_at(user_id, Instant::now())
    }

    fn try_acquire_at(&self, user_id: Uuid, now: Instant) -> LimitDecision {
        let mut windows = self.windows.lock().unwrap();
        let entry = windows.entry(user_id).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.limit {
            let elapsed = now.duration_since(entry.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            return LimitDecision::Rejected { retry_after_secs };
        }

        entry.count += 1;
        LimitDecision::Admitted {
            remaining: self.limit - entry.count,
        }
    }

    /// Current counter value for a user (useful for testing)
    pub fn current_count(&self, user_id: Uuid) -> Option<u32> {
        let windows = self.windows.lock().unwrap();
        windows.get(&user_id).map(|w| w.count)
    }
}
