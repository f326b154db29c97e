use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    /// Instance name. Prefixes help text and the instance's MQTT topics.
    pub name: String,
    pub default_recipe_file: String,
    pub state_file: String,
    pub state_file_write_interval_secs: u64,
    pub min_log_period_secs: u64,
    pub log_level: String,
    pub timezone: String,
    pub sensor_stale_secs: u64,
    pub mqtt: MqttConfig,
    pub http_port: u16,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            name: "climate".to_string(),
            default_recipe_file: "climate_recipes/default.rcp".to_string(),
            state_file: "state/climate_state.json".to_string(),
            state_file_write_interval_secs: 60,
            min_log_period_secs: 60,
            log_level: "info".to_string(),
            timezone: "UTC".to_string(),
            sensor_stale_secs: 300,
            mqtt: MqttConfig::default(),
            http_port: 8080,
        }
    }
}

impl ClimateConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = defaults.name;
        }

        if self.state_file.trim().is_empty() {
            self.state_file = defaults.state_file;
        }

        self.state_file_write_interval_secs = self.state_file_write_interval_secs.max(1);
        self.min_log_period_secs = self.min_log_period_secs.max(1);
        self.sensor_stale_secs = self.sensor_stale_secs.max(1);

        if self.log_level.trim().is_empty() {
            self.log_level = defaults.log_level;
        }
        if self.timezone.trim().is_empty() {
            self.timezone = defaults.timezone;
        }

        if self.mqtt.host.trim().is_empty() {
            self.mqtt.host = defaults.mqtt.host;
        }
        if self.mqtt.port == 0 {
            self.mqtt.port = defaults.mqtt.port;
        }
        if self.http_port == 0 {
            self.http_port = defaults.http_port;
        }
    }
}
