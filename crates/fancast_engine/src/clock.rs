//! Monotonic process clock.
//!
//! All engine timestamps are nanoseconds since the clock was created (process
//! start, in practice). Wall time never enters the engine: publish stamps,
//! drop windows, full-since markers and keepalive liveness all use the same
//! origin, so differences are meaningful and never jump backwards.

use std::time::Instant;

#[derive(Debug)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}
