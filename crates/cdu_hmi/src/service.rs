use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cdu_registers::ProcessedRegisterMap;
use tokio_modbus::prelude::*;
use tokio_modbus::server::Service;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Serves FC1/FC3/FC4 reads and FC5/FC6/FC15/FC16 writes directly out of a
/// [`ProcessedRegisterMap`], grounded in the teacher's `DynamicModbusSlaveContext`.
/// Reads never fail (out-of-range addresses come back as zero/false); any
/// other function code is an illegal-function exception.
pub struct RegisterMapService {
    processed: Arc<ProcessedRegisterMap>,
    read_count: AtomicU64,
    last_beat: Mutex<Instant>,
}

impl RegisterMapService {
    pub fn new(processed: Arc<ProcessedRegisterMap>) -> Self {
        Self {
            processed,
            read_count: AtomicU64::new(0),
            last_beat: Mutex::new(Instant::now()),
        }
    }

    fn heartbeat(&self) {
        let mut last = self.last_beat.lock().unwrap();
        let elapsed = last.elapsed();
        if elapsed >= HEARTBEAT_INTERVAL {
            let count = self.read_count.swap(0, Ordering::SeqCst);
            let rps = count as f64 / elapsed.as_secs_f64();
            log::info!("HMI read heartbeat: count={count}, rps={rps:.1}");
            *last = Instant::now();
        }
    }
}

impl Service for RegisterMapService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadCoils(addr, cnt) => {
                self.read_count.fetch_add(1, Ordering::Relaxed);
                self.heartbeat();
                Ok(Response::ReadCoils(self.processed.get_coils(addr, cnt)))
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.read_count.fetch_add(1, Ordering::Relaxed);
                self.heartbeat();
                Ok(Response::ReadHoldingRegisters(self.processed.get_registers(addr, cnt)))
            }
            Request::ReadInputRegisters(addr, cnt) => {
                self.read_count.fetch_add(1, Ordering::Relaxed);
                self.heartbeat();
                Ok(Response::ReadInputRegisters(self.processed.get_registers(addr, cnt)))
            }
            Request::WriteSingleCoil(addr, value) => {
                self.processed.set_coil(addr, value, true);
                Ok(Response::WriteSingleCoil(addr, value))
            }
            Request::WriteMultipleCoils(addr, values) => {
                for (i, v) in values.iter().enumerate() {
                    self.processed.set_coil(addr + i as u16, *v, true);
                }
                Ok(Response::WriteMultipleCoils(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => {
                self.processed.set_register(addr, value, true);
                Ok(Response::WriteSingleRegister(addr, value))
            }
            Request::WriteMultipleRegisters(addr, values) => {
                for (i, v) in values.iter().enumerate() {
                    self.processed.set_register(addr + i as u16, *v, true);
                }
                Ok(Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            other => {
                log::debug!("HMI request ignored: {other:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_registers::address;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    #[test]
    fn write_single_register_lands_in_the_map_and_fires_callbacks() {
        let processed = Arc::new(ProcessedRegisterMap::new());
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let hit2 = hit.clone();
        processed.on_register_write(move |_, _| hit2.store(true, Ordering::SeqCst));
        let service = RegisterMapService::new(processed.clone());

        let fut = service.call(Request::WriteSingleRegister(address::PUMP_DUTY_WRITE, 3000));
        rt().block_on(fut).unwrap();

        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), 3000);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn read_holding_registers_reflects_current_map_state() {
        let processed = Arc::new(ProcessedRegisterMap::new());
        processed.set_register(address::CONTROL_MODE, 2, false);
        let service = RegisterMapService::new(processed.clone());

        let fut = service.call(Request::ReadHoldingRegisters(address::CONTROL_MODE, 1));
        match rt().block_on(fut).unwrap() {
            Response::ReadHoldingRegisters(values) => assert_eq!(values, vec![2]),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn unsupported_function_is_an_illegal_function_exception() {
        let processed = Arc::new(ProcessedRegisterMap::new());
        let service = RegisterMapService::new(processed);
        let fut = service.call(Request::ReadExceptionStatus);
        assert_eq!(rt().block_on(fut), Err(ExceptionCode::IllegalFunction));
    }
}
