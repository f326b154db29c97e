use serde_json::{Map, Value};
use tracing::warn;

use crate::{policy::PolicyError, recipe::Phase, state::ClimateState};

/// Returns the index of the phase whose cumulative day range contains
/// `day_index`, or `None` once the recipe is over.
pub fn resolve_phase_index(day_index: Option<i64>, phases: &[Phase]) -> Option<usize> {
    let day = u64::try_from(day_index?).ok()?;
    let mut offset = 0u64;

    for (index, phase) in phases.iter().enumerate() {
        let end = offset + u64::from(phase.cycles);
        if (offset..end).contains(&day) {
            return Some(index);
        }
        offset = end;
    }

    None
}

/// Payload fields picked out of the matching time window.
#[derive(Debug, Clone, PartialEq)]
pub struct StepValues {
    category: String,
    values: Map<String, Value>,
}

impl StepValues {
    pub fn new(category: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            category: category.into(),
            values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn number(&self, field: &str) -> Result<f64, PolicyError> {
        let value = self
            .values
            .get(field)
            .ok_or_else(|| PolicyError::MissingField {
                category: self.category.clone(),
                field: field.to_string(),
            })?;

        value.as_f64().ok_or_else(|| PolicyError::NotANumber {
            category: self.category.clone(),
            field: field.to_string(),
        })
    }
}

/// Looks up the first window of `category` in the active phase that contains
/// the current hour and minute and returns the requested fields from it.
pub fn resolve_step_values(
    state: &ClimateState,
    category: &str,
    field_names: &[&str],
) -> Option<StepValues> {
    let phase = state.active_phase()?;

    let Some(windows) = phase.step.get(category) else {
        if state.log_cycle {
            warn!("phase {} has no {category} steps", phase.name);
        }
        return None;
    };

    if windows.is_empty() {
        if state.log_cycle {
            warn!("there are no recipe steps for {category}");
        }
        return None;
    }

    let (hour, minute) = (state.cur_hour?, state.cur_min?);
    let window = windows.iter().find(|window| window.contains(hour, minute))?;

    let mut values = Map::new();
    for &field in field_names {
        match window.values.get(field) {
            Some(value) => {
                values.insert(field.to_string(), value.clone());
            }
            None if state.log_cycle => warn!("cannot find value {field} in step {category}"),
            None => {}
        }
    }

    Some(StepValues::new(category, values))
}
