use std::sync::Mutex;

use chrono::Utc;

/// Wall-clock milliseconds clamped strictly increasing. Every stamp a
/// store hands out is greater than the previous one, so timestamp order
/// agrees with commit order even when the wall clock stalls or steps
/// backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<i64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut last = self.last.lock().expect("clock lock poisoned");
        let next = wall.max(*last + 1);
        *last = next;
        next
    }
}
