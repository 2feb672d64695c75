/// Which transport the scheduler is presently reading through. `update_mode`
/// is the sole writer of this value for a given scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Tcp,
    Rtu,
    None,
}

impl Mode {
    pub(crate) fn encode(self) -> u8 {
        match self {
            Mode::Tcp => 0,
            Mode::Rtu => 1,
            Mode::None => 2,
        }
    }

    pub(crate) fn decode(v: u8) -> Self {
        match v {
            0 => Mode::Tcp,
            1 => Mode::Rtu,
            _ => Mode::None,
        }
    }
}

/// Sleeps `duration`, re-checking `shutdown` every 100 ms so cancellation
/// latency never exceeds that chunk size.
pub(crate) fn sleep_chunked(duration: std::time::Duration, shutdown: &std::sync::atomic::AtomicBool) {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    let chunk = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
