use rand::Rng;
use std::time::{Duration, Instant};

/// A deadline that fires once `now >= deadline` and is renewed by drawing a
/// fresh duration. Used for both the election timer (randomized) and the
/// heartbeat timer (fixed), matching spec.md's timer model of a cooperative
/// loop that checks deadlines each pass rather than blocking on them.
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn new(duration: Duration) -> Deadline {
        Deadline {
            at: Instant::now() + duration,
        }
    }

    pub fn fired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn renew(&mut self, duration: Duration) {
        self.at = Instant::now() + duration;
    }
}

/// Draws a duration uniformly from `[lo, hi]`, used to pick a randomized
/// election timeout on each reset so that competing candidates' timers
/// diverge (spec.md §3, §8 scenario 6 "split vote recovery").
pub fn random_between(lo: Duration, hi: Duration) -> Duration {
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis() as u64;
    let ms = rand::thread_rng().gen_range(lo_ms..=hi_ms);
    Duration::from_millis(ms)
}
