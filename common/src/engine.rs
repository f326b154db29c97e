use chrono::{DateTime, TimeZone};
use tracing::{error, warn};

use crate::{
    device::{DeviceController, DeviceError},
    policy::{check_air_temperature, check_lights, check_vent_fan, force_off, PolicyError},
    resolver::resolve_phase_index,
    state::ClimateState,
    types::{Actuator, AIR_TEMP_SENSOR},
};

type Check = fn(&mut ClimateState, &dyn DeviceController) -> Result<(), PolicyError>;

/// One control pass over lighting, ventilation and heating.
pub fn tick<Tz: TimeZone>(
    state: &mut ClimateState,
    now: &DateTime<Tz>,
    devices: &dyn DeviceController,
    min_log_period_secs: u64,
) {
    if !state.is_running() {
        park_actuators(state, now.timestamp(), devices);
        return;
    }

    state.refresh_clock(now);
    state.update_log_cycle(min_log_period_secs);
    refresh_phase(state);
    refresh_air_temp(state, devices);

    // Order matters: heating reads history the earlier checks may have
    // written during this tick.
    let checks: [(Actuator, Check); 3] = [
        (Actuator::GrowLight, check_lights),
        (Actuator::VentFan, check_vent_fan),
        (Actuator::AirHeater, check_air_temperature),
    ];
    for (actuator, check) in checks {
        supervise(state, actuator, check, devices);
    }
}

/// A stopped controller leaves nothing running.
fn park_actuators(state: &mut ClimateState, now: i64, devices: &dyn DeviceController) {
    for actuator in Actuator::ALL {
        force_off(state, actuator, now, devices);
    }
}

fn supervise(
    state: &mut ClimateState,
    actuator: Actuator,
    check: Check,
    devices: &dyn DeviceController,
) {
    if let Err(err) = check(state, devices) {
        if state.log_cycle {
            error!("{} check failed, switching it off: {err}", actuator.label());
        }
        let now = state.cur_time;
        force_off(state, actuator, now, devices);
    }
}

fn refresh_phase(state: &mut ClimateState) {
    let phase_index = state
        .recipe
        .as_ref()
        .and_then(|recipe| resolve_phase_index(state.cur_day, &recipe.phases));

    if phase_index.is_none() && state.log_cycle {
        match &state.recipe {
            None => error!("no recipe is loaded, the climate controller cannot run without one"),
            Some(recipe) => error!(
                "recipe {} does not apply to day {:?}, it may be over",
                recipe.id, state.cur_day
            ),
        }
    }

    state.cur_phase_index = phase_index;
}

fn refresh_air_temp(state: &mut ClimateState, devices: &dyn DeviceController) {
    match devices.get(AIR_TEMP_SENSOR) {
        Ok(reading) => match reading.value.trim().parse::<f32>() {
            Ok(temp) if temp.is_finite() => state.cur_air_temp = Some(temp),
            _ => {
                if state.log_cycle {
                    warn!(
                        "cannot read air temperature, value returned by source is {:?}",
                        reading.value
                    );
                }
            }
        },
        Err(err @ DeviceError::Stale { .. }) => {
            if state.log_cycle {
                warn!("dropping air temperature: {err}");
            }
            state.cur_air_temp = None;
        }
        Err(err) => {
            if state.log_cycle {
                warn!("cannot read air temperature: {err}");
            }
        }
    }
}
