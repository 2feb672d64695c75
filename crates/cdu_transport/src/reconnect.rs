use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;

/// What a [`ReconnectSupervisor`] drives: disconnect-then-reconnect on
/// whichever transport it's bound to.
pub trait ReconnectTarget: Send + Sync {
    fn connect(&self) -> Result<bool, TransportError>;
    fn disconnect(&self);
}

/// One per transport. Level-triggered: `trigger_reconnect` is safe
/// to call repeatedly — it's a no-op while inactive or already
/// reconnecting, never an event queue that backs up.
pub struct ReconnectSupervisor {
    target: Arc<dyn ReconnectTarget>,
    active: AtomicBool,
    is_reconnecting: AtomicBool,
    attempts: AtomicU32,
    interval: Duration,
    shutdown: AtomicBool,
    on_success: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl ReconnectSupervisor {
    pub fn new(target: Arc<dyn ReconnectTarget>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            target,
            active: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            interval,
            shutdown: AtomicBool::new(false),
            on_success: Mutex::new(Vec::new()),
        })
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting.load(Ordering::SeqCst)
    }

    /// Fires (in registration order) once a reconnect attempt succeeds.
    /// Registered once at bootstrap, matching the map's callback contract.
    pub fn on_reconnected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_success.lock().unwrap().push(Arc::new(callback));
    }

    /// Called by pollers/writers on a read/write failure. No-op if the
    /// supervisor is inactive or an attempt is already in flight;
    /// otherwise spawns a dedicated thread that retries with backoff
    /// until it succeeds or shutdown is requested.
    pub fn trigger_reconnect(self: &Arc<Self>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self.is_reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let spawned = std::thread::Builder::new()
            .name("ReconnectSupervisor".to_string())
            .spawn(move || this.attempt_loop());
        if let Err(e) = spawned {
            log::error!("failed to spawn reconnect thread: {e}");
            self.is_reconnecting.store(false, Ordering::SeqCst);
        }
    }

    fn attempt_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                self.is_reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            self.target.disconnect();
            match self.target.connect() {
                Ok(true) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.is_reconnecting.store(false, Ordering::SeqCst);
                    log::info!("transport reconnected");
                    for cb in self.on_success.lock().unwrap().iter() {
                        cb();
                    }
                    return;
                }
                Ok(false) => {
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    log::warn!("reconnect attempt errored: {e}");
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                }
            }
            std::thread::sleep(self.interval);
        }
    }
}
