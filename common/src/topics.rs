pub const TOPIC_ROOT: &str = "fopd";
pub const TOPIC_SENSOR_PREFIX: &str = "fopd/sensor/";
pub const TOPIC_SENSOR_WILDCARD: &str = "fopd/sensor/+";

/// Where actuator commands for `device` are published.
pub fn device_command_topic(instance: &str, device: &str) -> String {
    format!("{TOPIC_ROOT}/{instance}/cmnd/{device}")
}

/// Where JSON commands for this controller instance arrive.
pub fn command_topic(instance: &str) -> String {
    format!("{TOPIC_ROOT}/{instance}/cmd")
}

pub fn sensor_name_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_SENSOR_PREFIX)
        .filter(|name| !name.is_empty() && !name.contains('/'))
}
