use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use climate_common::{device_command_topic, DeviceController, DeviceError, SensorReading, Switch};
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedReading {
    value: String,
    received: Instant,
}

/// Latest value seen on each tracked sensor topic, with its arrival time.
/// Readings for other sensors are dropped.
#[derive(Clone)]
pub struct SensorCache {
    tracked: Arc<Vec<String>>,
    readings: Arc<Mutex<HashMap<String, CachedReading>>>,
}

impl SensorCache {
    pub fn new(tracked: &[&str]) -> Self {
        Self {
            tracked: Arc::new(tracked.iter().map(|sensor| sensor.to_string()).collect()),
            readings: Arc::default(),
        }
    }

    /// Returns false when `sensor` is not tracked.
    pub fn record(&self, sensor: &str, value: &str) -> bool {
        self.record_at(sensor, value, Instant::now())
    }

    fn record_at(&self, sensor: &str, value: &str, received: Instant) -> bool {
        if !self.tracked.iter().any(|tracked| tracked == sensor) {
            return false;
        }

        let reading = CachedReading {
            value: value.trim().to_string(),
            received,
        };
        if let Ok(mut readings) = self.readings.lock() {
            readings.insert(sensor.to_string(), reading);
        }
        true
    }

    fn latest(
        &self,
        sensor: &str,
        stale_after: Duration,
        now: Instant,
    ) -> Result<SensorReading, DeviceError> {
        let readings = self
            .readings
            .lock()
            .map_err(|_| DeviceError::Unavailable("sensor cache poisoned".to_string()))?;
        let reading = readings
            .get(sensor)
            .ok_or_else(|| DeviceError::NoReading(sensor.to_string()))?;

        let age = now.saturating_duration_since(reading.received);
        if age > stale_after {
            return Err(DeviceError::Stale {
                sensor: sensor.to_string(),
                age_secs: age.as_secs(),
            });
        }

        Ok(SensorReading {
            value: reading.value.clone(),
        })
    }
}

/// Drives actuators over MQTT and serves sensor readings collected by the
/// MQTT event loop.
#[derive(Clone)]
pub struct MqttDevices {
    mqtt: AsyncClient,
    instance: String,
    sensors: SensorCache,
    stale_after: Duration,
}

impl MqttDevices {
    pub fn new(
        mqtt: AsyncClient,
        instance: &str,
        sensors: SensorCache,
        stale_after: Duration,
    ) -> Self {
        Self {
            mqtt,
            instance: instance.to_string(),
            sensors,
            stale_after,
        }
    }
}

impl DeviceController for MqttDevices {
    fn cmd(&self, action: Switch, device: &str) -> Result<(), DeviceError> {
        let topic = device_command_topic(&self.instance, device);
        debug!("publishing {} to {topic}", action.as_str());
        // Queues only. The MQTT event loop task owns the socket.
        self.mqtt
            .try_publish(topic, QoS::AtLeastOnce, false, action.as_str())
            .map_err(|err| DeviceError::Command {
                action: action.as_str(),
                device: device.to_string(),
                reason: err.to_string(),
            })
    }

    fn get(&self, sensor: &str) -> Result<SensorReading, DeviceError> {
        self.sensors.latest(sensor, self.stale_after, Instant::now())
    }
}
