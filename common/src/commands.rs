use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("you must supply a cmd (e.g. 'start')")]
    MissingAction,
    #[error("illegal command: {0}. please specify 'start', 'stop' or 'load_recipe'")]
    UnknownAction(String),
    #[error("day_index must be a whole number of days starting at 0, got {0}")]
    InvalidDayIndex(String),
}

/// Command as it arrives from the host: an action name plus optional
/// keyword arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub day_index: Option<Value>,
    #[serde(default)]
    pub recipe_file: Option<String>,
}

impl CommandRequest {
    pub fn action(action: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClimateCommand {
    Start { day_index: u32 },
    Stop,
    LoadRecipe { recipe_file: Option<String> },
}

impl ClimateCommand {
    pub fn parse(request: &CommandRequest) -> Result<Self, CommandError> {
        let action = request
            .action
            .as_deref()
            .map(str::trim)
            .filter(|action| !action.is_empty())
            .ok_or(CommandError::MissingAction)?;

        match action {
            "start" => Ok(Self::Start {
                day_index: parse_day_index(request.day_index.as_ref())?,
            }),
            "stop" => Ok(Self::Stop),
            "load_recipe" | "lr" => Ok(Self::LoadRecipe {
                recipe_file: request
                    .recipe_file
                    .as_deref()
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(str::to_string),
            }),
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }
}

fn parse_day_index(value: Option<&Value>) -> Result<u32, CommandError> {
    let Some(value) = value else {
        return Ok(0);
    };

    let parsed = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        Value::Null => Some(0),
        _ => None,
    };

    parsed
        .and_then(|day| u32::try_from(day).ok())
        .ok_or_else(|| CommandError::InvalidDayIndex(value.to_string()))
}

pub fn help(prefix: &str) -> String {
    let cmd_pre = format!("{prefix}.");
    let pad = " ".repeat(cmd_pre.len());

    let mut s = String::new();
    s.push_str(&format!(
        "{cmd_pre}help()                     - Displays this help page.\n"
    ));
    s.push_str(&format!(
        "{cmd_pre}cmd('start', day_index=n)  - Start a recipe on the designated day (0 based). If no day_index is\n"
    ));
    s.push_str(&format!(
        "{pad}                             supplied then start on day 0.\n"
    ));
    s.push_str(&format!(
        "{pad}                             e.g. {prefix}.cmd('start', day_index=2) to start a recipe at the 3rd day.\n"
    ));
    s.push_str(&format!("{cmd_pre}cmd('load_recipe'|'lr',\n"));
    s.push_str(&format!(
        "{pad}    recipe_file=path)      - Load a recipe file. If no recipe_file argument is given\n"
    ));
    s.push_str(&format!(
        "{pad}                             then load the default recipe file from the configuration.\n"
    ));
    s.push_str(&format!(
        "{pad}                             e.g. {prefix}.cmd('lr', recipe_file='climate_recipes/test1.rcp')\n"
    ));
    s.push_str(&format!(
        "{cmd_pre}cmd('stop')                - Stop the current recipe.\n"
    ));
    s.push_str(&format!(
        "{cmd_pre}state()                    - Show climate controller state.\n"
    ));
    s.push_str(&format!(
        "{cmd_pre}recipe()                   - Show the loaded recipe.\n"
    ));
    s
}
