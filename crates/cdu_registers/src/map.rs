use std::ops::Range;
use std::sync::{Arc, Mutex, RwLock};

use crate::address::{self, COIL_COUNT, REGISTER_COUNT};

type CoilCallback = Arc<dyn Fn(u16, bool) + Send + Sync>;
type RegisterCallback = Arc<dyn Fn(u16, u16) + Send + Sync>;

/// Dense coil/register image the HMI and REST surfaces are built on top of.
///
/// Storage uses a `RwLock<Vec<_>>` per kind (many concurrent readers, one
/// writer at a time) rather than a map-global lock, keeping locks scoped
/// per operation instead of map-global. The callback lists
/// are append-only after bootstrap, so they live behind a plain
/// `Mutex` taken only to iterate, never held across a callback invocation.
pub struct ProcessedRegisterMap {
    coils: RwLock<Vec<bool>>,
    registers: RwLock<Vec<u16>>,
    coil_callbacks: Mutex<Vec<CoilCallback>>,
    register_callbacks: Mutex<Vec<RegisterCallback>>,
    coil_write_ranges: Vec<Range<u16>>,
    register_write_ranges: Vec<Range<u16>>,
}

impl ProcessedRegisterMap {
    pub fn new() -> Self {
        let mut map = Self {
            coils: RwLock::new(vec![false; COIL_COUNT as usize]),
            registers: RwLock::new(vec![0u16; REGISTER_COUNT as usize]),
            coil_callbacks: Mutex::new(Vec::new()),
            register_callbacks: Mutex::new(Vec::new()),
            coil_write_ranges: vec![
                address::WRITE_ENABLE..address::WRITE_ENABLE + 1,
                address::FAN_SWITCH_WRITE..address::FAN_SWITCH_WRITE + address::FAN_SWITCH_WRITE_LEN,
                address::PUMP_SWITCH_WRITE..address::PUMP_SWITCH_WRITE + address::PUMP_SWITCH_WRITE_LEN,
                address::IO_OUTPUT_WRITE..address::IO_OUTPUT_WRITE + address::IO_OUTPUT_WRITE_LEN,
                address::FAN_BATCH..address::FAN_BATCH + 1,
                address::PUMP_BATCH..address::PUMP_BATCH + 1,
                address::IO_OUTPUT_BATCH..address::IO_OUTPUT_BATCH + 1,
            ],
            register_write_ranges: vec![
                address::CONTROL_MODE..address::CONTROL_MODE + 1,
                address::TARGET_FLOW..address::TARGET_FLOW + 1,
                address::TARGET_TEMP..address::TARGET_TEMP + 1,
                address::TARGET_DP..address::TARGET_DP + 1,
                address::FAN_DUTY_WRITE..address::FAN_DUTY_WRITE + address::FAN_BLOCK_LEN,
                address::PUMP_DUTY_WRITE..address::PUMP_DUTY_WRITE + address::PUMP_BLOCK_LEN,
                address::PV_DUTY_WRITE..address::PV_DUTY_WRITE + address::PV_BLOCK_LEN,
                address::FAN_BATCH_DUTY..address::FAN_BATCH_DUTY + 1,
                address::PUMP_BATCH_DUTY..address::PUMP_BATCH_DUTY + 1,
                address::PV_BATCH_DUTY..address::PV_BATCH_DUTY + 1,
            ],
        };
        address::apply_defaults(&mut map);
        map
    }

    /// Registers a callback fired (in registration order) for every coil
    /// write in a declared write range. Intended to be called exactly once
    /// per callback, at bootstrap.
    pub fn on_coil_write<F>(&self, callback: F)
    where
        F: Fn(u16, bool) + Send + Sync + 'static,
    {
        self.coil_callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn on_register_write<F>(&self, callback: F)
    where
        F: Fn(u16, u16) + Send + Sync + 'static,
    {
        self.register_callbacks.lock().unwrap().push(Arc::new(callback));
    }

    fn coil_in_write_range(&self, address: u16) -> bool {
        self.coil_write_ranges.iter().any(|r| r.contains(&address))
    }

    fn register_in_write_range(&self, address: u16) -> bool {
        self.register_write_ranges.iter().any(|r| r.contains(&address))
    }

    /// Stores `value` at `address` (silently ignored if out of range); fires
    /// registered coil callbacks iff `trigger_callback` and (the address is
    /// in a declared write range, or `force`).
    pub fn set_coil(&self, address: u16, value: bool, trigger_callback: bool) {
        self.set_coil_inner(address, value, trigger_callback, false)
    }

    /// Like [`Self::set_coil`], but callbacks fire regardless of the
    /// write-range check.
    pub fn set_coil_forced(&self, address: u16, value: bool, trigger_callback: bool) {
        self.set_coil_inner(address, value, trigger_callback, true)
    }

    fn set_coil_inner(&self, address: u16, value: bool, trigger_callback: bool, force: bool) {
        if (address as usize) >= self.coils.read().unwrap().len() {
            return;
        }
        self.coils.write().unwrap()[address as usize] = value;
        if trigger_callback && (force || self.coil_in_write_range(address)) {
            // Snapshot the callback list and release the lock before
            // invoking: a callback may itself call set_coil/set_register
            // (the batch writers do), and this mutex is not reentrant.
            let callbacks: Vec<CoilCallback> = self.coil_callbacks.lock().unwrap().clone();
            for cb in &callbacks {
                cb(address, value);
            }
        }
    }

    pub fn set_register(&self, address: u16, value: u16, trigger_callback: bool) {
        if (address as usize) >= self.registers.read().unwrap().len() {
            return;
        }
        self.registers.write().unwrap()[address as usize] = value;
        if trigger_callback && self.register_in_write_range(address) {
            let callbacks: Vec<RegisterCallback> = self.register_callbacks.lock().unwrap().clone();
            for cb in &callbacks {
                cb(address, value);
            }
        }
    }

    pub fn get_coil(&self, address: u16) -> bool {
        self.coils
            .read()
            .unwrap()
            .get(address as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn get_register(&self, address: u16) -> u16 {
        self.registers
            .read()
            .unwrap()
            .get(address as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn get_coils(&self, start: u16, count: u16) -> Vec<bool> {
        let guard = self.coils.read().unwrap();
        (start..start.saturating_add(count))
            .map(|a| guard.get(a as usize).copied().unwrap_or(false))
            .collect()
    }

    pub fn get_registers(&self, start: u16, count: u16) -> Vec<u16> {
        let guard = self.registers.read().unwrap();
        (start..start.saturating_add(count))
            .map(|a| guard.get(a as usize).copied().unwrap_or(0))
            .collect()
    }
}

impl Default for ProcessedRegisterMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn defaults_match_spec() {
        let map = ProcessedRegisterMap::new();
        assert_eq!(map.get_register(address::CONTROL_MODE), 1);
        assert_eq!(map.get_register(address::TARGET_FLOW), 500);
        assert_eq!(map.get_register(address::TARGET_TEMP), 250);
        assert_eq!(map.get_register(address::TARGET_DP), 50);
        assert_eq!(map.get_register(address::PV_DUTY_WRITE), 10000);
    }

    #[test]
    fn callback_fires_only_inside_write_range() {
        let map = ProcessedRegisterMap::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        map.on_register_write(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        // Outside any write range: read-only fan duty read block.
        map.set_register(address::FAN_DUTY_READ, 42, true);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Inside the pump duty write block.
        map.set_register(address::PUMP_DUTY_WRITE, 3000, true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_requires_trigger_flag() {
        let map = ProcessedRegisterMap::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        map.on_coil_write(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        map.set_coil(address::FAN_SWITCH_WRITE, true, false);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        map.set_coil(address::FAN_SWITCH_WRITE, true, true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_coil_write_fires_outside_range() {
        let map = ProcessedRegisterMap::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        map.on_coil_write(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        // Fan switch *read* coil is not a write range.
        map.set_coil(address::FAN_SWITCH_READ, true, true);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        map.set_coil_forced(address::FAN_SWITCH_READ, true, true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_addresses_read_as_zero() {
        let map = ProcessedRegisterMap::new();
        assert_eq!(map.get_register(65535), 0);
        assert!(!map.get_coil(60000));
    }
}
