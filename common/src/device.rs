use thiserror::Error;

use crate::types::Switch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    pub value: String,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{action} command for {device} failed: {reason}")]
    Command {
        action: &'static str,
        device: String,
        reason: String,
    },
    #[error("no reading available for sensor {0}")]
    NoReading(String),
    #[error("reading for sensor {sensor} is {age_secs}s old")]
    Stale { sensor: String, age_secs: u64 },
    #[error("device controller unavailable: {0}")]
    Unavailable(String),
}

/// Actuators and sensors the climate engine drives. Both calls are
/// synchronous and must not block for long; the engine logs every failure
/// and carries on.
pub trait DeviceController: Send + Sync {
    fn cmd(&self, action: Switch, device: &str) -> Result<(), DeviceError>;

    fn get(&self, sensor: &str) -> Result<SensorReading, DeviceError>;
}
