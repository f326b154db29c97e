use std::fmt::{Display, Write};

use chrono::{DateTime, FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{
    recipe::{Phase, Recipe},
    types::{Actuator, ActuatorHistory, RunMode},
};

const SECS_PER_DAY: i64 = 86_400;

pub const STATUS_ERROR: &str = "Error - can't show state";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("phase index {index} is outside the recipe's {phases} phases")]
    PhaseOutOfRange { index: usize, phases: usize },
    #[error("timestamp {0} cannot be displayed")]
    TimestampOutOfRange(i64),
    #[error(transparent)]
    Format(#[from] std::fmt::Error),
}

/// Full runtime state of the climate controller. This is also the persisted
/// state document, so every field tolerates being absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateState {
    pub run_mode: RunMode,
    pub recipe: Option<Recipe>,
    pub recipe_start_time: Option<i64>,
    pub cur_day: Option<i64>,
    pub cur_hour: Option<u32>,
    pub cur_min: Option<u32>,
    pub cur_phase_index: Option<usize>,
    pub cur_time: i64,

    pub grow_light: ActuatorHistory,
    pub vent_fan: ActuatorHistory,
    pub air_heater: ActuatorHistory,
    pub cur_air_temp: Option<f32>,

    pub last_log_time: i64,
    pub log_cycle: bool,
    pub last_state_file_update_time: i64,
}

impl ClimateState {
    pub fn actuator(&self, actuator: Actuator) -> &ActuatorHistory {
        match actuator {
            Actuator::GrowLight => &self.grow_light,
            Actuator::VentFan => &self.vent_fan,
            Actuator::AirHeater => &self.air_heater,
        }
    }

    pub fn actuator_mut(&mut self, actuator: Actuator) -> &mut ActuatorHistory {
        match actuator {
            Actuator::GrowLight => &mut self.grow_light,
            Actuator::VentFan => &mut self.vent_fan,
            Actuator::AirHeater => &mut self.air_heater,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_mode == RunMode::On
    }

    pub fn start(&mut self, day_index: u32, now: i64) {
        self.cur_day = Some(i64::from(day_index));
        self.run_mode = RunMode::On;
        self.recipe_start_time = Some(now.saturating_sub(i64::from(day_index) * SECS_PER_DAY));
    }

    pub fn stop(&mut self) {
        self.run_mode = RunMode::Off;
        self.recipe_start_time = None;
    }

    /// Actuator controllers come up with their outputs off, so a restored
    /// state must not claim anything is running. Histories are kept.
    pub fn reset_actuators(&mut self) {
        for actuator in Actuator::ALL {
            self.actuator_mut(actuator).on = false;
        }
    }

    pub fn refresh_clock<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) {
        self.cur_hour = Some(now.hour());
        self.cur_min = Some(now.minute());
        self.cur_time = now.timestamp();
        self.cur_day = self
            .recipe_start_time
            .map(|start| self.cur_time.saturating_sub(start).div_euclid(SECS_PER_DAY));
    }

    pub fn update_log_cycle(&mut self, min_log_period_secs: u64) {
        let period = i64::try_from(min_log_period_secs).unwrap_or(i64::MAX);
        if self.cur_time.saturating_sub(self.last_log_time) >= period {
            self.last_log_time = self.cur_time;
            self.log_cycle = true;
        } else {
            self.log_cycle = false;
        }
    }

    pub fn active_phase(&self) -> Option<&Phase> {
        let recipe = self.recipe.as_ref()?;
        recipe.phases.get(self.cur_phase_index?)
    }

    /// Decides whether a state write is due and, if so, stamps the attempt
    /// time before any I/O happens so a failing disk is not retried every
    /// tick.
    pub fn claim_state_write(&mut self, now: i64, min_interval_secs: u64, force: bool) -> bool {
        let interval = i64::try_from(min_interval_secs).unwrap_or(i64::MAX);
        if force || now >= self.last_state_file_update_time.saturating_add(interval) {
            self.last_state_file_update_time = now;
            true
        } else {
            false
        }
    }

    /// Human readable snapshot. Never mutates and never fails; an
    /// inconsistent state renders as [`STATUS_ERROR`].
    pub fn status(&self, offset: &FixedOffset) -> String {
        self.render_status(offset).unwrap_or_else(|err| {
            error!("show state failed: {err}");
            STATUS_ERROR.to_string()
        })
    }

    fn render_status(&self, offset: &FixedOffset) -> Result<String, StatusError> {
        let mut s = String::new();

        writeln!(s, "Mode: {}", self.run_mode.as_str())?;
        writeln!(
            s,
            "Recipe id: {}",
            show(self.recipe.as_ref().map(|recipe| recipe.id.as_str()))
        )?;
        writeln!(
            s,
            "Recipe start time: {}",
            show_date(self.recipe_start_time, offset)?
        )?;
        writeln!(s, "Current day index: {}", show(self.cur_day))?;
        writeln!(s, "Current hour: {}", show(self.cur_hour))?;
        writeln!(s, "Current minute: {}", show(self.cur_min))?;

        if let (Some(recipe), Some(index)) = (&self.recipe, self.cur_phase_index) {
            let phase = recipe
                .phases
                .get(index)
                .ok_or(StatusError::PhaseOutOfRange {
                    index,
                    phases: recipe.phases.len(),
                })?;
            writeln!(s, "Current phase: {}", phase.name)?;
        }
        writeln!(s, "Current phase index: {}", show(self.cur_phase_index))?;

        writeln!(s, "Grow light on: {}", self.grow_light.on)?;
        writeln!(
            s,
            "Last grow light on time: {}",
            show_date(self.grow_light.last_on_time, offset)?
        )?;
        writeln!(
            s,
            "Last grow light off time: {}",
            show_date(self.grow_light.last_off_time, offset)?
        )?;

        writeln!(s, "Vent fan on: {}", self.vent_fan.on)?;
        writeln!(
            s,
            "Last vent fan on time: {}",
            show_date(self.vent_fan.last_on_time, offset)?
        )?;
        writeln!(
            s,
            "Last vent fan off time: {}",
            show_date(self.vent_fan.last_off_time, offset)?
        )?;

        writeln!(s, "Air heater on: {}", self.air_heater.on)?;
        writeln!(s, "Air temperature: {}", show(self.cur_air_temp))?;
        writeln!(
            s,
            "Air heater last on time: {}",
            show_date(self.air_heater.last_on_time, offset)?
        )?;
        writeln!(
            s,
            "Air heater last off time: {}",
            show_date(self.air_heater.last_off_time, offset)?
        )?;

        writeln!(
            s,
            "Last state file write: {}",
            show_date(Some(self.last_state_file_update_time), offset)?
        )?;

        Ok(s)
    }
}

fn show<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |value| value.to_string())
}

fn show_date(epoch: Option<i64>, offset: &FixedOffset) -> Result<String, StatusError> {
    let Some(epoch) = epoch else {
        return Ok("None".to_string());
    };
    let date = DateTime::from_timestamp(epoch, 0).ok_or(StatusError::TimestampOutOfRange(epoch))?;
    Ok(date
        .with_timezone(offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string())
}
