use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use climate_common::{ClimateConfig, ClimateState, Recipe};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const DATA_DIR_ENV: &str = "CLIMATE_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "./.climate";
const CONFIG_FILE: &str = "config.json";

/// File-backed storage for recipes, the persisted controller state and the
/// configuration. Relative paths resolve against the data directory.
#[derive(Clone)]
pub struct ClimateStore {
    data_dir: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl ClimateStore {
    pub fn new(data_dir: PathBuf, state_file: &str) -> Self {
        let state_path = resolve_in(&data_dir, state_file);
        Self {
            data_dir: Arc::new(data_dir),
            state_path: Arc::new(state_path),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn data_dir_from_env() -> PathBuf {
        std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_in(&self.data_dir, path)
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Reads and validates a recipe. Any failure is logged and reported as
    /// `None`; a missing recipe is a normal condition.
    pub async fn load_recipe(&self, path: &str) -> Option<Recipe> {
        let full_path = self.resolve(path);
        let raw = match tokio::fs::read(&full_path).await {
            Ok(raw) => raw,
            Err(err) => {
                error!("cannot read recipe file {}: {err}", full_path.display());
                return None;
            }
        };

        match Recipe::from_json(&raw) {
            Ok(recipe) => {
                info!(
                    "loaded recipe {} ({} phases, {} days) from {}",
                    recipe.id,
                    recipe.phases.len(),
                    recipe.total_cycles(),
                    full_path.display()
                );
                Some(recipe)
            }
            Err(err) => {
                error!("invalid recipe file {}: {err}", full_path.display());
                None
            }
        }
    }

    /// Reads the persisted state. Missing or unreadable state means the
    /// caller keeps its defaults.
    pub async fn load_state(&self) -> Option<ClimateState> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref();
        match tokio::fs::read(path).await {
            Ok(raw) => match serde_json::from_slice::<ClimateState>(&raw) {
                Ok(state) => {
                    info!("restored state from {}", path.display());
                    Some(state)
                }
                Err(err) => {
                    error!("cannot parse state file {}: {err}", path.display());
                    None
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no state file at {}, starting fresh", path.display());
                None
            }
            Err(err) => {
                error!("cannot read state file {}: {err}", path.display());
                None
            }
        }
    }

    /// Overwrites the state file with an already serialized document.
    pub async fn write_state(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write state file {}", path.display()))?;
        Ok(())
    }
}

fn resolve_in(data_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// A missing config file means defaults.
pub async fn load_config(path: &Path) -> anyhow::Result<ClimateConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<ClimateConfig>(&raw)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ClimateConfig::default()),
        Err(err) => Err(err).with_context(|| format!("cannot read config file {}", path.display())),
    }
}
