pub mod commands;
pub mod config;
pub mod device;
pub mod engine;
pub mod policy;
pub mod recipe;
pub mod resolver;
pub mod state;
pub mod topics;
pub mod types;

pub use commands::{ClimateCommand, CommandError, CommandRequest};
pub use config::{ClimateConfig, MqttConfig};
pub use device::{DeviceController, DeviceError, SensorReading};
pub use engine::tick;
pub use policy::PolicyError;
pub use recipe::{ClockTime, Phase, Recipe, RecipeError, TimeOfDay, TimeWindow};
pub use resolver::{resolve_phase_index, resolve_step_values, StepValues};
pub use state::{ClimateState, StatusError, STATUS_ERROR};
pub use topics::*;
pub use types::{Actuator, ActuatorHistory, RunMode, Switch};
