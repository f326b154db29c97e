use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe is not a valid recipe document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid time of day {0:?}")]
    InvalidTime(String),
    #[error("phase {index} has no name")]
    UnnamedPhase { index: usize },
}

/// Time of day as written in a recipe: either a fractional hour (`7.5`) or a
/// clock string (`"07:30"`, `"7"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeOfDay {
    Hour(f64),
    Clock(String),
}

/// Normalized time of day. `minute` is `None` for hour-only clock strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeOfDay", into = "TimeOfDay")]
pub struct ClockTime {
    pub hour: u32,
    pub minute: Option<u32>,
}

impl ClockTime {
    pub fn new(hour: u32, minute: Option<u32>) -> Result<Self, RecipeError> {
        let time = Self { hour, minute };
        if hour > 24 || minute.is_some_and(|minute| minute > 59) {
            return Err(RecipeError::InvalidTime(time.to_string()));
        }
        Ok(time)
    }

    fn from_hours(hours: f64) -> Result<Self, RecipeError> {
        if !hours.is_finite() || !(0.0..=24.0).contains(&hours) {
            return Err(RecipeError::InvalidTime(hours.to_string()));
        }
        let hour = hours.trunc();
        let minute = ((hours - hour) * 60.0).round().min(59.0);
        Self::new(hour as u32, Some(minute as u32))
    }

    fn from_clock(raw: &str) -> Result<Self, RecipeError> {
        let invalid = || RecipeError::InvalidTime(raw.to_string());
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let number = |part: &str| part.trim().parse::<u32>().map_err(|_| invalid());

        match parts.as_slice() {
            [hour] => Self::new(number(hour)?, None),
            [hour, minute] => Self::new(number(hour)?, Some(number(minute)?)),
            _ => Err(invalid()),
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.minute {
            Some(minute) => write!(f, "{}:{minute:02}", self.hour),
            None => write!(f, "{}", self.hour),
        }
    }
}

impl TryFrom<TimeOfDay> for ClockTime {
    type Error = RecipeError;

    fn try_from(value: TimeOfDay) -> Result<Self, Self::Error> {
        match value {
            TimeOfDay::Hour(hours) => Self::from_hours(hours),
            TimeOfDay::Clock(raw) => Self::from_clock(&raw),
        }
    }
}

impl From<ClockTime> for TimeOfDay {
    fn from(value: ClockTime) -> Self {
        TimeOfDay::Clock(value.to_string())
    }
}

/// One time-bounded rule for a control category. Category specific fields
/// (`value`, `interval`, `low_limit`, ...) are kept as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl TimeWindow {
    /// Whether `hour:minute` falls inside the window. Start times without a
    /// minute count from the top of the hour; end times without a minute
    /// include the whole final hour.
    pub fn contains(&self, hour: u32, minute: u32) -> bool {
        let start = (self.start_time.hour, self.start_time.minute.unwrap_or(0));
        let past_start = (hour, minute) >= start;

        let before_or_at_end = match self.end_time.minute {
            Some(end_minute) => (hour, minute) <= (self.end_time.hour, end_minute),
            None => hour <= self.end_time.hour,
        };

        past_start && before_or_at_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub cycles: u32,
    #[serde(default)]
    pub step: BTreeMap<String, Vec<TimeWindow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl Recipe {
    pub fn from_json(raw: &[u8]) -> Result<Self, RecipeError> {
        let recipe: Recipe = serde_json::from_slice(raw)?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> Result<(), RecipeError> {
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(RecipeError::UnnamedPhase { index });
            }
        }
        Ok(())
    }

    pub fn total_cycles(&self) -> u64 {
        self.phases.iter().map(|phase| u64::from(phase.cycles)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASIL: &str = r#"{
        "id": "basil-v2",
        "phases": [
            {
                "name": "germination",
                "cycles": 7,
                "step": {
                    "light_intensity": [
                        {"start_time": 6, "end_time": "21:30", "value": 1}
                    ],
                    "air_flush": [
                        {"start_time": "0", "end_time": 24, "interval": 60, "duration": 5}
                    ]
                }
            },
            {
                "name": "growth",
                "cycles": 30,
                "step": {
                    "air_temperature": [
                        {"start_time": 7.5, "end_time": 19.25, "low_limit": 18, "high_limit": 24}
                    ]
                }
            }
        ]
    }"#;

    fn window(start: ClockTime, end: ClockTime) -> TimeWindow {
        TimeWindow {
            start_time: start,
            end_time: end,
            values: Map::new(),
        }
    }

    #[test]
    fn parses_recipe_document() {
        let recipe = Recipe::from_json(BASIL.as_bytes()).unwrap();

        assert_eq!(recipe.id, "basil-v2");
        assert_eq!(recipe.phases.len(), 2);
        assert_eq!(recipe.total_cycles(), 37);

        let light = &recipe.phases[0].step["light_intensity"][0];
        assert_eq!(light.start_time, ClockTime::new(6, Some(0)).unwrap());
        assert_eq!(light.end_time, ClockTime::new(21, Some(30)).unwrap());
        assert_eq!(light.values.get("value"), Some(&Value::from(1)));

        let flush = &recipe.phases[0].step["air_flush"][0];
        assert_eq!(flush.start_time, ClockTime::new(0, None).unwrap());
    }

    #[test]
    fn fractional_hours_round_to_the_nearest_minute() {
        let time: ClockTime = serde_json::from_str("7.5").unwrap();
        assert_eq!(time, ClockTime::new(7, Some(30)).unwrap());

        let time: ClockTime = serde_json::from_str("6.99").unwrap();
        assert_eq!(time, ClockTime::new(6, Some(59)).unwrap());

        let time: ClockTime = serde_json::from_str("19.25").unwrap();
        assert_eq!(time, ClockTime::new(19, Some(15)).unwrap());
    }

    #[test]
    fn rejects_out_of_range_times() {
        assert!(serde_json::from_str::<ClockTime>("\"25:00\"").is_err());
        assert!(serde_json::from_str::<ClockTime>("\"07:75\"").is_err());
        assert!(serde_json::from_str::<ClockTime>("\"7:30:00\"").is_err());
        assert!(serde_json::from_str::<ClockTime>("\"seven\"").is_err());
        assert!(serde_json::from_str::<ClockTime>("-1").is_err());
    }

    #[test]
    fn rejects_unnamed_phase() {
        let raw = r#"{"id": "x", "phases": [{"name": " ", "cycles": 1}]}"#;
        let err = Recipe::from_json(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, RecipeError::UnnamedPhase { index: 0 }));
    }

    #[test]
    fn serializes_times_back_to_clock_strings() {
        let recipe = Recipe::from_json(BASIL.as_bytes()).unwrap();
        let json = serde_json::to_value(&recipe).unwrap();

        let light = &json["phases"][0]["step"]["light_intensity"][0];
        assert_eq!(light["start_time"], Value::from("6:00"));
        assert_eq!(light["end_time"], Value::from("21:30"));
        assert_eq!(light["value"], Value::from(1));
        assert_eq!(
            json["phases"][0]["step"]["air_flush"][0]["start_time"],
            Value::from("0")
        );

        let reparsed: Recipe = serde_json::from_value(json).unwrap();
        assert_eq!(reparsed, recipe);
    }

    #[test]
    fn window_bounds_compare_hour_and_minute_together() {
        let window = window(
            ClockTime::new(7, Some(30)).unwrap(),
            ClockTime::new(18, Some(15)).unwrap(),
        );

        assert!(!window.contains(7, 29));
        assert!(window.contains(7, 30));
        assert!(window.contains(8, 10));
        assert!(window.contains(18, 15));
        assert!(!window.contains(18, 16));
    }

    #[test]
    fn hour_only_end_includes_the_whole_final_hour() {
        let window = window(
            ClockTime::new(6, None).unwrap(),
            ClockTime::new(18, None).unwrap(),
        );

        assert!(!window.contains(5, 59));
        assert!(window.contains(6, 0));
        assert!(window.contains(18, 59));
        assert!(!window.contains(19, 0));
    }
}
