use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    On,
    #[default]
    Off,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

pub const GROW_LIGHT: &str = "grow_light";
pub const VENT_FAN: &str = "vent_fan";
pub const AIR_HEATER: &str = "air_heat";
pub const AIR_TEMP_SENSOR: &str = "air_temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    GrowLight,
    VentFan,
    AirHeater,
}

impl Actuator {
    pub const ALL: [Actuator; 3] = [Self::GrowLight, Self::VentFan, Self::AirHeater];

    /// Name the device collaborator knows this actuator by.
    pub fn device_name(self) -> &'static str {
        match self {
            Self::GrowLight => GROW_LIGHT,
            Self::VentFan => VENT_FAN,
            Self::AirHeater => AIR_HEATER,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::GrowLight => "grow light",
            Self::VentFan => "vent fan",
            Self::AirHeater => "air heater",
        }
    }
}

/// On flag plus the epoch-second timestamps of the last transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorHistory {
    pub on: bool,
    pub last_on_time: Option<i64>,
    pub last_off_time: Option<i64>,
}

impl ActuatorHistory {
    pub fn record(&mut self, switch: Switch, now: i64) {
        match switch {
            Switch::On => {
                self.on = true;
                self.last_on_time = Some(now);
            }
            Switch::Off => {
                self.on = false;
                self.last_off_time = Some(now);
            }
        }
    }

    /// Seconds since the last "on" transition, if there ever was one.
    pub fn secs_since_on(&self, now: i64) -> Option<i64> {
        self.last_on_time.map(|last| now.saturating_sub(last))
    }
}
