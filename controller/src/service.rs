use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use climate_common::{
    commands, ClimateCommand, ClimateConfig, ClimateState, CommandError, CommandRequest,
    DeviceController, Recipe,
};
use tokio::sync::{Barrier, Mutex};
use tracing::{error, info};

use crate::store::ClimateStore;

/// Owns the controller state and serializes every access to it: the control
/// loop, HTTP handlers and MQTT commands all go through here.
#[derive(Clone)]
pub struct ClimateService {
    state: Arc<Mutex<ClimateState>>,
    store: ClimateStore,
    config: Arc<ClimateConfig>,
    timezone: Tz,
}

impl ClimateService {
    pub async fn init(config: ClimateConfig, store: ClimateStore, timezone: Tz) -> Self {
        let mut state = ClimateState {
            recipe: store.load_recipe(&config.default_recipe_file).await,
            ..Default::default()
        };

        if let Some(restored) = store.load_state().await {
            state = restored;
        }
        state.reset_actuators();

        let service = Self {
            state: Arc::new(Mutex::new(state)),
            store,
            config: Arc::new(config),
            timezone,
        };

        let now = service.now();
        {
            let mut state = service.state.lock().await;
            state.last_state_file_update_time = now.timestamp();
            state.refresh_clock(&now);
            info!(
                "climate controller {} initialised, run mode {}",
                service.config.name,
                state.run_mode.as_str()
            );
        }

        service
    }

    fn now(&self) -> DateTime<FixedOffset> {
        let local = Utc::now().with_timezone(&self.timezone);
        local.with_timezone(&local.offset().fix())
    }

    pub async fn command(&self, request: &CommandRequest) -> Result<String, CommandError> {
        match ClimateCommand::parse(request)? {
            ClimateCommand::Start { day_index } => {
                let now = self.now().timestamp();
                let mut state = self.state.lock().await;
                state.start(day_index, now);
                info!("recipe started at day {day_index}");
                Ok("OK".to_string())
            }
            ClimateCommand::Stop => {
                let mut state = self.state.lock().await;
                state.stop();
                info!("recipe stopped");
                Ok("OK".to_string())
            }
            ClimateCommand::LoadRecipe { recipe_file } => {
                Ok(self.load_recipe(recipe_file.as_deref()).await)
            }
        }
    }

    /// Replaces the loaded recipe. The file is read before taking the state
    /// lock; a failed load leaves no recipe loaded.
    async fn load_recipe(&self, recipe_file: Option<&str>) -> String {
        let path = recipe_file.unwrap_or(&self.config.default_recipe_file);
        let recipe = self.store.load_recipe(path).await;
        let loaded = recipe.is_some();

        self.state.lock().await.recipe = recipe;

        if loaded {
            "OK".to_string()
        } else {
            format!("cannot load recipe file {path}")
        }
    }

    pub async fn state_text(&self) -> String {
        let offset = *self.now().offset();
        self.state.lock().await.status(&offset)
    }

    pub async fn recipe(&self) -> Option<Recipe> {
        self.state.lock().await.recipe.clone()
    }

    pub fn help(&self) -> String {
        commands::help(&self.config.name)
    }

    pub async fn tick(&self, devices: &dyn DeviceController) {
        let now = self.now();
        self.tick_at(&now, devices).await;
    }

    async fn tick_at<Z: TimeZone>(&self, now: &DateTime<Z>, devices: &dyn DeviceController) {
        let mut state = self.state.lock().await;
        climate_common::tick(&mut state, now, devices, self.config.min_log_period_secs);
    }

    /// Writes the state file when the write interval has elapsed, or always
    /// when `force` is set. Serialization happens under the lock, the write
    /// after it is released.
    pub async fn persist(&self, force: bool) {
        let now = self.now().timestamp();
        let payload = {
            let mut state = self.state.lock().await;
            if !state.claim_state_write(now, self.config.state_file_write_interval_secs, force) {
                return;
            }
            serde_json::to_vec_pretty(&*state)
        };

        match payload {
            Ok(payload) => {
                if let Err(err) = self.store.write_state(payload).await {
                    error!("cannot save climate state: {err:#}");
                }
            }
            Err(err) => error!("cannot serialize climate state: {err}"),
        }
    }

    /// Ticks once per second until `stop` is raised, then saves the state one
    /// last time. Nothing runs before `ready` is released.
    pub async fn run_loop(
        self,
        devices: Arc<dyn DeviceController>,
        ready: Arc<Barrier>,
        stop: Arc<AtomicBool>,
    ) {
        ready.wait().await;
        info!("climate control loop running");

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if stop.load(Ordering::Relaxed) {
                break;
            }

            self.tick(devices.as_ref()).await;
            self.persist(false).await;
        }

        self.persist(true).await;
        info!("climate control loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex as StdMutex};

    use climate_common::{DeviceError, RunMode, SensorReading, Switch};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const RECIPE: &str = r#"{
        "id": "basil",
        "phases": [
            {
                "name": "vegetative",
                "cycles": 30,
                "step": {
                    "light_intensity": [
                        {"start_time": 0, "end_time": "23:59", "value": 1}
                    ],
                    "air_flush": [
                        {"start_time": 0, "end_time": "23:59", "interval": 60, "duration": 10}
                    ],
                    "air_temperature": [
                        {"start_time": 0, "end_time": "23:59", "low_limit": 20, "high_limit": 24}
                    ]
                }
            }
        ]
    }"#;

    #[derive(Default)]
    struct FakeDevices {
        commands: StdMutex<Vec<(Switch, String)>>,
    }

    impl DeviceController for FakeDevices {
        fn cmd(&self, action: Switch, device: &str) -> Result<(), DeviceError> {
            self.commands
                .lock()
                .unwrap()
                .push((action, device.to_string()));
            Ok(())
        }

        fn get(&self, _sensor: &str) -> Result<SensorReading, DeviceError> {
            Ok(SensorReading {
                value: "18.0".to_string(),
            })
        }
    }

    fn write_recipe(dir: &Path) {
        let recipes = dir.join("climate_recipes");
        std::fs::create_dir_all(&recipes).unwrap();
        std::fs::write(recipes.join("default.rcp"), RECIPE).unwrap();
    }

    async fn service(dir: &Path) -> ClimateService {
        let config = ClimateConfig::default();
        let store = ClimateStore::new(dir.to_path_buf(), &config.state_file);
        ClimateService::init(config, store, chrono_tz::UTC).await
    }

    fn request(value: serde_json::Value) -> CommandRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn init_loads_the_default_recipe() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(dir.path());

        let service = service(dir.path()).await;

        assert_eq!(service.recipe().await.map(|r| r.id), Some("basil".to_string()));
        let state = service.state.lock().await;
        assert_eq!(state.run_mode, RunMode::Off);
        assert!(state.last_state_file_update_time > 0);
    }

    #[tokio::test]
    async fn init_restores_state_with_actuators_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut saved = ClimateState::default();
        saved.start(4, 1_700_000_000);
        saved.air_heater.record(Switch::On, 1_700_000_500);
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("climate_state.json"),
            serde_json::to_vec(&saved).unwrap(),
        )
        .unwrap();

        let service = service(dir.path()).await;

        let state = service.state.lock().await;
        assert_eq!(state.run_mode, RunMode::On);
        assert_eq!(state.recipe_start_time, Some(1_700_000_000 - 4 * 86_400));
        assert!(!state.air_heater.on);
        assert_eq!(state.air_heater.last_on_time, Some(1_700_000_500));
        assert!(state.recipe.is_none());
    }

    #[tokio::test]
    async fn commands_report_ok_or_an_error_string() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(dir.path());
        let service = service(dir.path()).await;

        let reply = service
            .command(&request(json!({"action": "start", "day_index": 3})))
            .await;
        assert_eq!(reply, Ok("OK".to_string()));
        {
            let state = service.state.lock().await;
            assert_eq!(state.run_mode, RunMode::On);
            assert_eq!(state.cur_day, Some(3));
        }

        assert_eq!(
            service.command(&CommandRequest::action("stop")).await,
            Ok("OK".to_string())
        );
        assert_eq!(service.state.lock().await.recipe_start_time, None);

        let err = service
            .command(&CommandRequest::action("restart"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal command: restart. please specify 'start', 'stop' or 'load_recipe'"
        );
        assert_eq!(service.state.lock().await.run_mode, RunMode::Off);
    }

    #[tokio::test]
    async fn failed_recipe_load_clears_the_recipe() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(dir.path());
        let service = service(dir.path()).await;

        let reply = service
            .command(&request(json!({"action": "lr", "recipe_file": "nope.rcp"})))
            .await
            .unwrap();
        assert_eq!(reply, "cannot load recipe file nope.rcp");
        assert!(service.recipe().await.is_none());

        let reply = service.command(&CommandRequest::action("lr")).await.unwrap();
        assert_eq!(reply, "OK");
        assert!(service.recipe().await.is_some());
    }

    #[tokio::test]
    async fn tick_drives_devices_while_running() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(dir.path());
        let service = service(dir.path()).await;
        let devices = FakeDevices::default();

        let now = Utc.with_ymd_and_hms(2026, 3, 10, 7, 30, 0).unwrap();
        service.state.lock().await.start(1, now.timestamp());
        service.tick_at(&now, &devices).await;

        let sent = std::mem::take(&mut *devices.commands.lock().unwrap());
        assert_eq!(
            sent,
            vec![
                (Switch::On, "grow_light".to_string()),
                (Switch::On, "vent_fan".to_string()),
                (Switch::On, "air_heat".to_string()),
            ]
        );

        let status = service.state_text().await;
        assert!(status.contains("Current phase: vegetative"));
    }

    #[tokio::test]
    async fn persist_respects_the_write_interval() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let state_file = dir.path().join("state/climate_state.json");

        service.persist(false).await;
        assert!(!state_file.exists());

        service.persist(true).await;
        let saved: ClimateState =
            serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
        assert_eq!(saved, *service.state.lock().await);
    }

    #[tokio::test]
    async fn loop_saves_state_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let ready = Arc::new(Barrier::new(2));
        let stop = Arc::new(AtomicBool::new(true));
        let devices: Arc<dyn DeviceController> = Arc::new(FakeDevices::default());

        let task = tokio::spawn(service.clone().run_loop(devices, ready.clone(), stop));
        ready.wait().await;
        task.await.unwrap();

        assert!(dir.path().join("state/climate_state.json").exists());
    }
}
