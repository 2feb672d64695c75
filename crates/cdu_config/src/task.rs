use serde::Deserialize;

/// `communication_type`: which direction the task moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommType {
    Read,
    Write,
}

/// `communication_operation_type`: continuous tasks re-enqueue themselves
/// on success; one-shot tasks run exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommOperationType {
    Continuous,
    OneShot,
}

/// `communication_level_type`: which scheduler pool owns the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLevel {
    Low,
    High,
}

/// One row of `communication_task.json` / `low_frequency_task.json`.
///
/// `next_run` is deliberately not part of this type: it is scheduler-owned
/// mutable state, not configuration, and lives on the runtime task item
/// the scheduler builds from this descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub communication_type: CommType,
    pub communication_operation_type: CommOperationType,
    pub communication_level_type: TaskLevel,
    #[serde(default)]
    pub is_bit: bool,
    pub interval: u64,
    pub start_address: u16,
    pub length: u16,
}
