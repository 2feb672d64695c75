use std::collections::HashMap;
use std::sync::Mutex;

/// Raw PCBA-native register/coil cache, written only by the polling
/// scheduler and read only by the derivation pipeline. A single
/// map-global lock is acceptable here — there is one scheduler
/// cluster and reads are cheap snapshots.
#[derive(Default)]
pub struct RawRegisterImage {
    registers: Mutex<HashMap<u16, u16>>,
    coils: Mutex<HashMap<u16, bool>>,
}

impl RawRegisterImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a contiguous block of registers starting at `start`. Only
    /// writes addresses whose value actually changed, mirroring the
    /// teacher's change-suppressing `update_registers`.
    pub fn update_registers(&self, start: u16, values: &[u16]) {
        let mut guard = self.registers.lock().unwrap();
        for (i, &v) in values.iter().enumerate() {
            let addr = start + i as u16;
            if guard.get(&addr) != Some(&v) {
                guard.insert(addr, v);
            }
        }
    }

    pub fn update_coils(&self, start: u16, values: &[bool]) {
        let mut guard = self.coils.lock().unwrap();
        for (i, &v) in values.iter().enumerate() {
            let addr = start + i as u16;
            if guard.get(&addr) != Some(&v) {
                guard.insert(addr, v);
            }
        }
    }

    pub fn register(&self, address: u16) -> u16 {
        self.registers.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    pub fn coil(&self, address: u16) -> bool {
        self.coils.lock().unwrap().get(&address).copied().unwrap_or(false)
    }

    pub fn registers(&self, start: u16, count: u16) -> Vec<u16> {
        let guard = self.registers.lock().unwrap();
        (start..start.saturating_add(count))
            .map(|a| guard.get(&a).copied().unwrap_or(0))
            .collect()
    }

    pub fn coils(&self, start: u16, count: u16) -> Vec<bool> {
        let guard = self.coils.lock().unwrap();
        (start..start.saturating_add(count))
            .map(|a| guard.get(&a).copied().unwrap_or(false))
            .collect()
    }
}
