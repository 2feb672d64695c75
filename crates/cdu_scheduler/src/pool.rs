use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Long-lived named worker threads running `body` in a loop until
/// shutdown is requested. `shutdown()` waits up to `join_timeout` for
/// every thread to exit; anything still running after that is detached
/// rather than blocking the caller forever.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<F>(name_prefix: &str, count: usize, body: F) -> Self
    where
        F: Fn(usize, &AtomicBool) + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let body = Arc::new(body);
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let shutdown = shutdown.clone();
            let body = body.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{name_prefix}-{i}"))
                .spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) {
                        body(i, &shutdown);
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        Self { shutdown, handles }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Signals shutdown and joins every worker, waiting at most
    /// `join_timeout` in total. Threads that don't exit in time are
    /// detached (dropping the handle without joining).
    pub fn shutdown(mut self, join_timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        let deadline = std::time::Instant::now() + join_timeout;
        for handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                drop(handle); // detach: still running, not worth blocking on
                continue;
            }
            // std::thread has no timed join; a short poll loop approximates
            // a bounded wait without pulling in an extra dependency.
            let mut waited = Duration::ZERO;
            let step = Duration::from_millis(10);
            while !handle.is_finished() && waited < remaining {
                std::thread::sleep(step);
                waited += step;
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                drop(handle);
            }
        }
    }
}
