use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the `cr_time` / `ch_time` stamps, in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock that never hands out the same value twice, so successive
/// changes to a document always get increasing `ch_time` stamps.
#[derive(Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}
