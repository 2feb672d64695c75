use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdu_config::task::{CommOperationType, CommType, TaskDescriptor, TaskLevel};
use cdu_registers::RawRegisterImage;
use cdu_transport::{BatchIo, ReconnectSupervisor, Transport, TransportManager, MAX_RETRY_READ};

use crate::mode::sleep_chunked;
use crate::pool::WorkerPool;
use crate::polling::ScheduledTask;
use crate::queue::PriorityTaskQueue;

const HEARTBEAT_TASK_NAME: &str = "rtu_heartbeat";

/// Slow periodic tasks, defaulting to TCP, plus the RTU heartbeat used as
/// a liveness probe. Shares the same queue abstraction as the
/// polling scheduler but with simpler transport affinity: everything goes
/// over TCP except the pinned heartbeat.
pub struct LowFrequencyScheduler {
    transport: Arc<TransportManager>,
    raw: Arc<RawRegisterImage>,
    queue: Arc<PriorityTaskQueue<ScheduledTask>>,
    tcp_reconnect: Arc<ReconnectSupervisor>,
    rtu_reconnect: Arc<ReconnectSupervisor>,
    heartbeat_descriptor: TaskDescriptor,
    rtu_heartbeat_enabled: AtomicBool,
    worker_count: usize,
}

impl LowFrequencyScheduler {
    pub fn new(
        transport: Arc<TransportManager>,
        raw: Arc<RawRegisterImage>,
        tcp_reconnect: Arc<ReconnectSupervisor>,
        rtu_reconnect: Arc<ReconnectSupervisor>,
        tasks: Vec<TaskDescriptor>,
        heartbeat_descriptor: TaskDescriptor,
        worker_count: usize,
    ) -> Arc<Self> {
        let queue = Arc::new(PriorityTaskQueue::new());
        let now = Instant::now();
        for descriptor in tasks {
            queue.put_task(ScheduledTask { descriptor, next_run: now }, 1);
        }
        queue.put_task(
            ScheduledTask {
                descriptor: heartbeat_descriptor.clone(),
                next_run: now,
            },
            0,
        );

        let scheduler = Arc::new(Self {
            transport,
            raw,
            queue,
            tcp_reconnect,
            rtu_reconnect,
            heartbeat_descriptor,
            rtu_heartbeat_enabled: AtomicBool::new(true),
            worker_count,
        });

        let enable_on_reconnect = scheduler.clone();
        scheduler.rtu_reconnect.on_reconnected(move || {
            enable_on_reconnect.on_rtu_reconnected();
        });

        scheduler
    }

    pub fn queue(&self) -> Arc<PriorityTaskQueue<ScheduledTask>> {
        self.queue.clone()
    }

    /// Re-instantiates and enqueues the heartbeat task if it isn't already
    /// enabled. Idempotent: multiple reconnect callbacks don't pile
    /// up duplicate heartbeat entries.
    fn on_rtu_reconnected(&self) {
        if self
            .rtu_heartbeat_enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::info!("rtu heartbeat recovered, re-enqueuing");
            self.queue.put_task(
                ScheduledTask {
                    descriptor: self.heartbeat_descriptor.clone(),
                    next_run: Instant::now(),
                },
                0,
            );
        }
    }

    fn on_rtu_heartbeat_lost(&self) {
        if self
            .rtu_heartbeat_enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            log::warn!("rtu heartbeat lost, disabling until reconnect");
            self.transport.force_close_rtu();
            self.rtu_reconnect.trigger_reconnect();
            self.queue.retain(|task| task.descriptor.name != HEARTBEAT_TASK_NAME);
        }
    }

    pub fn start(self: &Arc<Self>) -> WorkerPool {
        let scheduler = self.clone();
        WorkerPool::spawn("low-frequency-worker", self.worker_count, move |_, shutdown| {
            scheduler.worker_tick(shutdown);
        })
    }

    fn worker_tick(&self, shutdown: &AtomicBool) {
        let Some(mut task) = self.queue.get_task(Duration::from_millis(500)) else {
            return;
        };
        let now = Instant::now();
        if task.next_run > now {
            sleep_chunked(task.next_run - now, shutdown);
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
        }

        let is_heartbeat = task.descriptor.name == HEARTBEAT_TASK_NAME;
        let transport = if is_heartbeat { Transport::Rtu } else { Transport::Tcp };

        match self.execute(&task.descriptor, transport) {
            Ok(()) => {
                if task.descriptor.communication_operation_type == CommOperationType::Continuous {
                    task.next_run = Instant::now() + Duration::from_millis(task.descriptor.interval);
                    self.queue.put_task(task, if is_heartbeat { 0 } else { 1 });
                }
            }
            Err(e) => {
                log::warn!("low-frequency task '{}' failed: {e}", task.descriptor.name);
                if is_heartbeat {
                    self.on_rtu_heartbeat_lost();
                } else {
                    self.tcp_reconnect.trigger_reconnect();
                    task.next_run = Instant::now() + Duration::from_millis(task.descriptor.interval.max(1000));
                    self.queue.put_task(task, 1);
                }
            }
        }
    }

    fn execute(&self, descriptor: &TaskDescriptor, transport: Transport) -> Result<(), cdu_transport::TransportError> {
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
                if descriptor.is_bit {
                    let bits = self.raw.coils(descriptor.start_address, descriptor.length);
                    BatchIo::write_coils(&self.transport, transport, descriptor.start_address, &bits, MAX_RETRY_READ)?;
                } else {
                    let regs = self.raw.registers(descriptor.start_address, descriptor.length);
                    BatchIo::write_registers(&self.transport, transport, descriptor.start_address, &regs, MAX_RETRY_READ)?;
                }
            }
        }
        Ok(())
    }
}

pub fn default_heartbeat_descriptor() -> TaskDescriptor {
    TaskDescriptor {
        name: HEARTBEAT_TASK_NAME.to_string(),
        communication_type: CommType::Read,
        communication_operation_type: CommOperationType::Continuous,
        communication_level_type: TaskLevel::Low,
        is_bit: true,
        interval: 5000,
        start_address: 0,
        length: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_transport::{RtuConfig, TcpConfig};

    #[test]
    fn heartbeat_is_seeded_and_pinned_to_rtu_by_name() {
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let raw = Arc::new(RawRegisterImage::new());
        let tcp_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::TcpTarget(transport.clone())), Duration::from_secs(1));
        let rtu_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::RtuTarget(transport.clone())), Duration::from_secs(1));
        let scheduler = LowFrequencyScheduler::new(
            transport,
            raw,
            tcp_sup,
            rtu_sup,
            vec![],
            default_heartbeat_descriptor(),
            1,
        );
        let task = scheduler.queue.get_task(Duration::from_millis(10)).unwrap();
        assert_eq!(task.descriptor.name, HEARTBEAT_TASK_NAME);
    }

    #[test]
    fn losing_heartbeat_disables_and_removes_it_once() {
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let raw = Arc::new(RawRegisterImage::new());
        let tcp_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::TcpTarget(transport.clone())), Duration::from_secs(60));
        let rtu_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::RtuTarget(transport.clone())), Duration::from_secs(60));
        let scheduler = LowFrequencyScheduler::new(
            transport,
            raw,
            tcp_sup,
            rtu_sup,
            vec![],
            default_heartbeat_descriptor(),
            1,
        );
        // drain the seeded heartbeat so retain() operates on an empty queue
        let _ = scheduler.queue.get_task(Duration::from_millis(10));
        scheduler.on_rtu_heartbeat_lost();
        assert!(!scheduler.rtu_heartbeat_enabled.load(Ordering::SeqCst));
        scheduler.on_rtu_heartbeat_lost();
        assert!(!scheduler.rtu_heartbeat_enabled.load(Ordering::SeqCst));
    }
}
