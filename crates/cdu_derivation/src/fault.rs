use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-key fault-confirmation timers. Mirrors the teacher's shared
/// `_fault_time` dictionaries: one timer per key, reused across whichever
/// abnormal branch currently holds and cleared only by the normal branch.
#[derive(Default)]
pub struct FaultTimers {
    started: Mutex<HashMap<String, Instant>>,
}

impl FaultTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since `key`'s abnormal condition first started. Starts
    /// the timer on the first call for a key (returning `Duration::ZERO`)
    /// so a single abnormal sample never confirms on its own.
    pub fn elapsed(&self, key: &str, now: Instant) -> Duration {
        let mut guard = self.started.lock().unwrap();
        match guard.get(key) {
            Some(&start) => now.duration_since(start),
            None => {
                guard.insert(key.to_string(), now);
                Duration::ZERO
            }
        }
    }

    pub fn clear(&self, key: &str) {
        self.started.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_never_confirms() {
        let timers = FaultTimers::new();
        let now = Instant::now();
        assert_eq!(timers.elapsed("fan_0", now), Duration::ZERO);
    }

    #[test]
    fn confirms_after_threshold_elapsed() {
        let timers = FaultTimers::new();
        let start = Instant::now();
        timers.elapsed("fan_0", start);
        let later = start + Duration::from_secs(9);
        assert!(timers.elapsed("fan_0", later) >= Duration::from_secs(8));
    }

    #[test]
    fn clearing_resets_the_start_point() {
        let timers = FaultTimers::new();
        let start = Instant::now();
        timers.elapsed("fan_0", start);
        timers.clear("fan_0");
        let later = start + Duration::from_secs(9);
        assert_eq!(timers.elapsed("fan_0", later), Duration::ZERO);
    }
}
