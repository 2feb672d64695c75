use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdu_config::task::{CommOperationType, CommType, TaskDescriptor, TaskLevel};
use cdu_registers::RawRegisterImage;
use cdu_transport::{BatchIo, ReconnectSupervisor, Transport, TransportManager, MAX_RETRY_READ};

use crate::mode::{sleep_chunked, Mode};
use crate::pool::WorkerPool;
use crate::queue::PriorityTaskQueue;

/// A task descriptor plus the scheduler-owned mutable state around it:
/// when it's next due to run.
#[derive(Clone)]
pub struct ScheduledTask {
    pub descriptor: TaskDescriptor,
    pub next_run: Instant,
}

fn priority_of(level: TaskLevel) -> i32 {
    match level {
        TaskLevel::High => 0,
        TaskLevel::Low => 1,
    }
}

/// Executes periodic PCBA read (and scheduled write) tasks across whichever
/// transport is presently healthy. The hardest subcomponent: a
/// mode-watchdog ticks independently of task execution so a worker stuck
/// inside a slow TCP read can never stall forward progress.
pub struct PollingScheduler {
    transport: Arc<TransportManager>,
    raw: Arc<RawRegisterImage>,
    queue: Arc<PriorityTaskQueue<ScheduledTask>>,
    tcp_reconnect: Arc<ReconnectSupervisor>,
    rtu_reconnect: Arc<ReconnectSupervisor>,
    current_mode: AtomicU8,
    worker_count: usize,
}

impl PollingScheduler {
    pub fn new(
        transport: Arc<TransportManager>,
        raw: Arc<RawRegisterImage>,
        tcp_reconnect: Arc<ReconnectSupervisor>,
        rtu_reconnect: Arc<ReconnectSupervisor>,
        tasks: Vec<TaskDescriptor>,
        worker_count: usize,
    ) -> Self {
        let queue = Arc::new(PriorityTaskQueue::new());
        let now = Instant::now();
        for descriptor in tasks {
            let priority = priority_of(descriptor.communication_level_type);
            queue.put_task(
                ScheduledTask { descriptor, next_run: now },
                priority,
            );
        }
        Self {
            transport,
            raw,
            queue,
            tcp_reconnect,
            rtu_reconnect,
            current_mode: AtomicU8::new(Mode::None.encode()),
            worker_count,
        }
    }

    pub fn queue(&self) -> Arc<PriorityTaskQueue<ScheduledTask>> {
        self.queue.clone()
    }

    /// Sole writer of `current_mode`. Preference: TCP, then RTU, then none
    /// (pausing the scheduler). Logs transitions exactly once and, when
    /// leaving TCP while it is unhealthy, forcibly closes the TCP client
    /// under its mutex to unblock any worker parked in a blocking read.
    pub fn update_mode(&self) -> Mode {
        let new_mode = if self.transport.is_connected_tcp() {
            Mode::Tcp
        } else if self.transport.is_connected_rtu() {
            Mode::Rtu
        } else {
            Mode::None
        };
        let old_mode = Mode::decode(self.current_mode.swap(new_mode.encode(), Ordering::SeqCst));
        if old_mode != new_mode {
            if old_mode == Mode::Tcp {
                self.transport.force_close_tcp();
            }
            log::info!("polling scheduler mode: {old_mode:?} -> {new_mode:?}");
            match new_mode {
                Mode::None => self.queue.pause(),
                _ if old_mode == Mode::None => self.queue.resume(),
                _ => {}
            }
        }
        new_mode
    }

    pub fn current_mode(&self) -> Mode {
        Mode::decode(self.current_mode.load(Ordering::SeqCst))
    }

    /// Launches `worker_count` polling workers plus a mode-watchdog that
    /// ticks every 200 ms. Returns the handles so the caller can shut them
    /// down in bounded time.
    pub fn start(self: &Arc<Self>) -> (WorkerPool, std::thread::JoinHandle<()>) {
        self.update_mode();
        let scheduler = self.clone();
        let pool = WorkerPool::spawn("polling-worker", self.worker_count, move |_, shutdown| {
            scheduler.worker_tick(shutdown);
        });

        let watchdog_shutdown = pool.shutdown_flag();
        let scheduler = self.clone();
        let watchdog = std::thread::Builder::new()
            .name("polling-mode-watchdog".to_string())
            .spawn(move || {
                while !watchdog_shutdown.load(Ordering::SeqCst) {
                    scheduler.update_mode();
                    std::thread::sleep(Duration::from_millis(200));
                }
            })
            .expect("failed to spawn mode watchdog");

        (pool, watchdog)
    }

    fn worker_tick(&self, shutdown: &AtomicBool) {
        let Some(mut task) = self.queue.get_task(Duration::from_millis(200)) else {
            return;
        };
        let now = Instant::now();
        if task.next_run > now {
            sleep_chunked(task.next_run - now, shutdown);
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
        }
        self.queue.wait_if_paused();
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let priority = priority_of(task.descriptor.communication_level_type);
        let mode = self.update_mode();
        if mode == Mode::None {
            task.next_run = Instant::now() + Duration::from_millis(200);
            self.queue.put_task(task, priority);
            return;
        }

        match self.execute(&task.descriptor, mode) {
            Ok(()) => {
                if task.descriptor.communication_operation_type == CommOperationType::Continuous {
                    task.next_run = Instant::now() + Duration::from_millis(task.descriptor.interval);
                    self.queue.put_task(task, priority);
                }
            }
            Err(e) => {
                log::warn!("polling task '{}' failed on {mode:?}: {e}", task.descriptor.name);
                match mode {
                    Mode::Tcp => {
                        self.transport.force_close_tcp();
                        self.tcp_reconnect.trigger_reconnect();
                    }
                    Mode::Rtu => {
                        self.transport.force_close_rtu();
                        self.rtu_reconnect.trigger_reconnect();
                    }
                    Mode::None => {}
                }
                self.update_mode();
                task.next_run = Instant::now() + Duration::from_millis(task.descriptor.interval.max(200));
                self.queue.put_task(task, priority);
            }
        }
    }

    fn execute(&self, descriptor: &TaskDescriptor, mode: Mode) -> Result<(), cdu_transport::TransportError> {
        let transport = match mode {
            Mode::Tcp => Transport::Tcp,
            Mode::Rtu => Transport::Rtu,
            Mode::None => unreachable!("caller never executes with mode None"),
        };
        let slave = match transport {
            Transport::Tcp => self.transport.tcp_slave(),
            Transport::Rtu => self.transport.rtu_slave(),
        };
        let _ = slave; // slave id is baked into the connected client context

        match descriptor.communication_type {
            CommType::Read => {
                if descriptor.is_bit {
                    let bits = BatchIo::read_coils(
                        &self.transport,
                        transport,
                        descriptor.start_address,
                        descriptor.length,
                        MAX_RETRY_READ,
                    )?;
                    self.raw.update_coils(descriptor.start_address, &bits);
                } else {
                    let regs = BatchIo::read_holding_registers(
                        &self.transport,
                        transport,
                        descriptor.start_address,
                        descriptor.length,
                        MAX_RETRY_READ,
                    )?;
                    self.raw.update_registers(descriptor.start_address, &regs);
                }
            }
            CommType::Write => {
                // Scheduled writes replay whatever the raw cache last held
                // for this range (e.g. periodic re-assertion tasks).
                if descriptor.is_bit {
                    let bits = self.raw.coils(descriptor.start_address, descriptor.length);
                    BatchIo::write_coils(
                        &self.transport,
                        transport,
                        descriptor.start_address,
                        &bits,
                        MAX_RETRY_READ,
                    )?;
                } else {
                    let regs = self.raw.registers(descriptor.start_address, descriptor.length);
                    BatchIo::write_registers(
                        &self.transport,
                        transport,
                        descriptor.start_address,
                        &regs,
                        MAX_RETRY_READ,
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_transport::{RtuConfig, TcpConfig};

    fn descriptor(name: &str, level: TaskLevel) -> TaskDescriptor {
        TaskDescriptor {
            name: name.to_string(),
            communication_type: CommType::Read,
            communication_operation_type: CommOperationType::Continuous,
            communication_level_type: level,
            is_bit: false,
            interval: 500,
            start_address: 528,
            length: 32,
        }
    }

    #[test]
    fn mode_is_none_with_no_connections_and_queue_pauses() {
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let raw = Arc::new(RawRegisterImage::new());
        let tcp_sup = ReconnectSupervisor::new(
            Arc::new(cdu_transport::TcpTarget(transport.clone())),
            Duration::from_secs(1),
        );
        let rtu_sup = ReconnectSupervisor::new(
            Arc::new(cdu_transport::RtuTarget(transport.clone())),
            Duration::from_secs(1),
        );
        let scheduler = Arc::new(PollingScheduler::new(
            transport,
            raw,
            tcp_sup,
            rtu_sup,
            vec![descriptor("fan_status", TaskLevel::High)],
            1,
        ));
        assert_eq!(scheduler.update_mode(), Mode::None);
        assert!(scheduler.queue.is_paused());
    }

    #[test]
    fn high_priority_tasks_dequeue_before_low() {
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let raw = Arc::new(RawRegisterImage::new());
        let tcp_sup = ReconnectSupervisor::new(
            Arc::new(cdu_transport::TcpTarget(transport.clone())),
            Duration::from_secs(1),
        );
        let rtu_sup = ReconnectSupervisor::new(
            Arc::new(cdu_transport::RtuTarget(transport.clone())),
            Duration::from_secs(1),
        );
        let scheduler = PollingScheduler::new(
            transport,
            raw,
            tcp_sup,
            rtu_sup,
            vec![descriptor("low", TaskLevel::Low), descriptor("high", TaskLevel::High)],
            1,
        );
        let first = scheduler.queue.get_task(Duration::from_millis(10)).unwrap();
        assert_eq!(first.descriptor.name, "high");
    }
}
