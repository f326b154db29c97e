use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    device::DeviceController,
    resolver::{resolve_step_values, StepValues},
    state::ClimateState,
    types::{Actuator, ActuatorHistory, Switch},
};

pub const LIGHT_INTENSITY: &str = "light_intensity";
pub const AIR_FLUSH: &str = "air_flush";
pub const AIR_TEMPERATURE: &str = "air_temperature";

/// Narrowest accepted heater band. The air temperature sensor is not precise
/// enough to hold anything tighter without the heater chattering.
pub const MIN_HEATER_BAND_C: f64 = 2.0;
pub const HEATER_MAX_RUN_SECS: i64 = 30 * 60;
pub const HEATER_LONG_RUN_SECS: i64 = 29 * 60;
pub const HEATER_REST_SECS: i64 = 5 * 60;
pub const HEATER_MIN_ON_SPACING_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("step {category} is missing field {field}")]
    MissingField { category: String, field: String },
    #[error("field {field} of step {category} is not a number")]
    NotANumber { category: String, field: String },
}

pub fn lighting_decision(values: Option<&StepValues>, light: &ActuatorHistory) -> Option<Switch> {
    let wants_on = values
        .and_then(|values| values.get("value"))
        .and_then(|value| value.as_f64())
        == Some(1.0);

    match (wants_on, light.on) {
        (true, false) => Some(Switch::On),
        (false, true) => Some(Switch::Off),
        _ => None,
    }
}

/// Duty cycle: run for `duration` minutes every `interval` minutes.
pub fn vent_decision(
    values: Option<&StepValues>,
    fan: &ActuatorHistory,
    now: i64,
) -> Result<Option<Switch>, PolicyError> {
    let Some(values) = values else {
        return Ok(fan.on.then_some(Switch::Off));
    };

    let interval = values.number("interval")?;
    let duration = values.number("duration")?;

    // Recipe wants flushing but there is no flush history yet: start a cycle.
    let Some(elapsed) = fan.secs_since_on(now) else {
        return Ok(Some(Switch::On));
    };
    let elapsed = elapsed as f64;

    if fan.on && elapsed > duration * 60.0 {
        Ok(Some(Switch::Off))
    } else if !fan.on && elapsed > interval * 60.0 {
        Ok(Some(Switch::On))
    } else {
        Ok(None)
    }
}

/// Hysteresis control between `low_limit` and `low_limit + mid`, followed by
/// the run-time, rest and start-spacing safety rules.
pub fn heater_decision(
    values: Option<&StepValues>,
    heater: &ActuatorHistory,
    air_temp: Option<f32>,
    now: i64,
    log_cycle: bool,
) -> Result<Option<Switch>, PolicyError> {
    let mut wanted = None;

    match values {
        Some(values) => {
            let low = values.number("low_limit")?;
            let high = values.number("high_limit")?;

            if high - low >= MIN_HEATER_BAND_C {
                let mid = (high + low) / 2.0;

                match air_temp.map(f64::from) {
                    Some(temp) if temp < low && !heater.on => wanted = Some(Switch::On),
                    Some(temp) if temp > low + mid && heater.on => wanted = Some(Switch::Off),
                    Some(_) => {}
                    None => {
                        if log_cycle {
                            warn!("no air temperature available, the heater will be kept off");
                        }
                        wanted = Some(Switch::Off);
                    }
                }
            } else if log_cycle {
                error!(
                    "illegal air temperature limits {low}..{high}: the high limit must be at least \
                     {MIN_HEATER_BAND_C} degrees above the low limit"
                );
            }
        }
        None => {
            if log_cycle {
                info!("no air temperature instructions found");
            }
            wanted = Some(Switch::Off);
        }
    }

    if heater.on
        && heater
            .secs_since_on(now)
            .is_some_and(|elapsed| elapsed > HEATER_MAX_RUN_SECS)
    {
        wanted = Some(Switch::Off);
    }

    if !heater.on {
        if let (Some(last_on), Some(last_off)) = (heater.last_on_time, heater.last_off_time) {
            let run_secs = last_off.saturating_sub(last_on);
            if run_secs > HEATER_LONG_RUN_SECS && now.saturating_sub(last_off) < HEATER_REST_SECS {
                wanted = Some(Switch::Off);
            }
        }
    }

    let decision = match wanted {
        Some(Switch::On) if !heater.on => heater
            .secs_since_on(now)
            .map_or(true, |elapsed| elapsed >= HEATER_MIN_ON_SPACING_SECS)
            .then_some(Switch::On),
        Some(Switch::Off) if heater.on => Some(Switch::Off),
        _ => None,
    };

    Ok(decision)
}

/// Records the transition in the state and sends it to the device. A failed
/// command is logged; the history keeps the intended state so the next
/// transition is still timed from it.
pub fn switch_actuator(
    state: &mut ClimateState,
    actuator: Actuator,
    switch: Switch,
    now: i64,
    devices: &dyn DeviceController,
) {
    state.actuator_mut(actuator).record(switch, now);
    info!("turning the {} {}", actuator.label(), switch.as_str());

    if let Err(err) = devices.cmd(switch, actuator.device_name()) {
        error!("{} command failed: {err}", actuator.label());
    }
}

pub fn force_off(
    state: &mut ClimateState,
    actuator: Actuator,
    now: i64,
    devices: &dyn DeviceController,
) {
    if state.actuator(actuator).on {
        switch_actuator(state, actuator, Switch::Off, now, devices);
    }
}

pub fn check_lights(
    state: &mut ClimateState,
    devices: &dyn DeviceController,
) -> Result<(), PolicyError> {
    let now = state.cur_time;
    let values = resolve_step_values(state, LIGHT_INTENSITY, &["value"]);
    if let Some(switch) = lighting_decision(values.as_ref(), &state.grow_light) {
        switch_actuator(state, Actuator::GrowLight, switch, now, devices);
    }
    Ok(())
}

pub fn check_vent_fan(
    state: &mut ClimateState,
    devices: &dyn DeviceController,
) -> Result<(), PolicyError> {
    let now = state.cur_time;
    let values = resolve_step_values(state, AIR_FLUSH, &["interval", "duration"]);
    if let Some(switch) = vent_decision(values.as_ref(), &state.vent_fan, now)? {
        switch_actuator(state, Actuator::VentFan, switch, now, devices);
    }
    Ok(())
}

pub fn check_air_temperature(
    state: &mut ClimateState,
    devices: &dyn DeviceController,
) -> Result<(), PolicyError> {
    let now = state.cur_time;
    let values = resolve_step_values(state, AIR_TEMPERATURE, &["low_limit", "high_limit"]);
    let decision = heater_decision(
        values.as_ref(),
        &state.air_heater,
        state.cur_air_temp,
        now,
        state.log_cycle,
    )?;
    if let Some(switch) = decision {
        switch_actuator(state, Actuator::AirHeater, switch, now, devices);
    }
    Ok(())
}
