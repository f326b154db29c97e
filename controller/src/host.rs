use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono_tz::Tz;
use climate_common::{
    command_topic, sensor_name_from_topic, types::AIR_TEMP_SENSOR, ClimateConfig,
    CommandRequest, DeviceController, TOPIC_SENSOR_WILDCARD,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::{net::TcpListener, sync::Barrier, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    devices::{MqttDevices, SensorCache},
    service::ClimateService,
    store::{load_config, ClimateStore},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct AppState {
    service: ClimateService,
    sensors: SensorCache,
    command_topic: Arc<String>,
}

pub async fn run() -> anyhow::Result<()> {
    let data_dir = ClimateStore::data_dir_from_env();
    let config_path = ClimateStore::config_path(&data_dir);
    let loaded = load_config(&config_path).await;

    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.sanitize();

    init_tracing(&config.log_level);
    if let Err(err) = &loaded {
        warn!("failed to load config, using defaults: {err:#}");
    }

    let timezone = parse_timezone(&config.timezone);
    let store = ClimateStore::new(data_dir, &config.state_file);
    info!(
        "climate controller {} using data dir {}, state file {}",
        config.name,
        config_path
            .parent()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default(),
        store.state_path().display()
    );

    let mut mqtt_options = MqttOptions::new(
        format!("climate-controller-{}", config.name),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(config.mqtt.user.clone(), config.mqtt.pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let sensors = SensorCache::new(&[AIR_TEMP_SENSOR]);
    let devices: Arc<dyn DeviceController> = Arc::new(MqttDevices::new(
        mqtt.clone(),
        &config.name,
        sensors.clone(),
        Duration::from_secs(config.sensor_stale_secs),
    ));

    let http_port = config.http_port;
    let app_state = AppState {
        command_topic: Arc::new(command_topic(&config.name)),
        service: ClimateService::init(config, store, timezone).await,
        sensors,
    };

    let ready = Arc::new(Barrier::new(2));
    let stop = Arc::new(AtomicBool::new(false));
    let control = tokio::spawn(app_state.service.clone().run_loop(
        devices,
        ready.clone(),
        stop.clone(),
    ));

    let subscribed = subscribe_topics(&mqtt, &app_state.command_topic).await;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    ready.wait().await;

    let served = match subscribed {
        Ok(()) => serve_http(app_state, http_port, stop.clone()).await,
        Err(err) => Err(err),
    };
    finish(served, &stop, control).await?;
    info!("shutdown complete");
    Ok(())
}

async fn serve_http(app_state: AppState, port: u16, stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/api/help", get(handle_get_help))
        .route("/api/cmd", post(handle_post_cmd))
        .route("/api/state", get(handle_get_state))
        .route("/api/recipe", get(handle_get_recipe))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop))
        .await
        .context("controller server failed")
}

/// Stops the control loop and waits for its final state save, whatever way
/// the server ended.
async fn finish(
    served: anyhow::Result<()>,
    stop: &AtomicBool,
    control: JoinHandle<()>,
) -> anyhow::Result<()> {
    stop.store(true, Ordering::Relaxed);
    control.await.context("control loop panicked")?;
    served
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_env_overrides(config: &mut ClimateConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.mqtt.port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
    if let Some(port) = lookup("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
}

fn parse_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone {name:?}, falling back to UTC");
        Tz::UTC
    })
}

async fn shutdown_signal(stop: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    stop.store(true, Ordering::Relaxed);
}

async fn subscribe_topics(mqtt: &AsyncClient, command_topic: &str) -> anyhow::Result<()> {
    for topic in [TOPIC_SENSOR_WILDCARD, command_topic] {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    if let Some(sensor) = sensor_name_from_topic(topic) {
        if !app_state.sensors.record(sensor, message) {
            debug!("ignoring reading for untracked sensor {sensor}");
        }
        return Ok(());
    }

    if topic == app_state.command_topic.as_str() {
        let request: CommandRequest =
            serde_json::from_str(message).context("invalid command payload")?;
        match app_state.service.command(&request).await {
            Ok(reply) => info!("mqtt command {:?}: {reply}", request.action),
            Err(err) => warn!("mqtt command rejected: {err}"),
        }
    }

    Ok(())
}

async fn handle_get_help(State(state): State<AppState>) -> impl IntoResponse {
    state.service.help()
}

async fn handle_post_cmd(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    match state.service.command(&request).await {
        Ok(reply) => (StatusCode::OK, reply),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    state.service.state_text().await
}

async fn handle_get_recipe(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.recipe().await)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::to_bytes;
    use pretty_assertions::assert_eq;

    use super::*;

    async fn app_state(dir: &std::path::Path) -> AppState {
        let config = ClimateConfig::default();
        let store = ClimateStore::new(dir.to_path_buf(), &config.state_file);
        AppState {
            command_topic: Arc::new(command_topic(&config.name)),
            service: ClimateService::init(config, store, Tz::UTC).await,
            sensors: SensorCache::new(&[AIR_TEMP_SENSOR]),
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn env_overrides_replace_config_values() {
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "grower"),
            ("CONTROLLER_HTTP_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = ClimateConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.user, "grower");
        assert_eq!(config.mqtt.pass, "");
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Europe/Berlin"), Tz::Europe__Berlin);
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
    }

    #[tokio::test]
    async fn sensor_messages_feed_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        handle_mqtt_message(&state, "fopd/sensor/air_temp", b"22.5")
            .await
            .unwrap();
        handle_mqtt_message(&state, "fopd/sensor/air_temp", &[b'1'; 600])
            .await
            .unwrap();

        let (mqtt, _eventloop) =
            AsyncClient::new(MqttOptions::new("climate-test", "127.0.0.1", 1883), 4);
        let devices = MqttDevices::new(
            mqtt,
            "climate",
            state.sensors.clone(),
            Duration::from_secs(300),
        );
        assert_eq!(devices.get("air_temp").unwrap().value, "22.5");
    }

    #[tokio::test]
    async fn mqtt_commands_reach_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        handle_mqtt_message(&state, "fopd/climate/cmd", br#"{"action": "start"}"#)
            .await
            .unwrap();
        assert!(state.service.state_text().await.starts_with("Mode: on"));

        assert!(handle_mqtt_message(&state, "fopd/climate/cmd", b"start")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn http_commands_map_errors_to_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let response = handle_post_cmd(
            State(state.clone()),
            Json(CommandRequest::action("stop")),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");

        let response = handle_post_cmd(State(state.clone()), Json(CommandRequest::default()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "you must supply a cmd (e.g. 'start')"
        );

        let response = handle_get_recipe(State(state)).await.into_response();
        assert_eq!(body_text(response).await, "null");
    }

    #[tokio::test]
    async fn server_failure_still_saves_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;
        let ready = Arc::new(Barrier::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        let devices: Arc<dyn DeviceController> = Arc::new(MqttDevices::new(
            AsyncClient::new(MqttOptions::new("climate-test", "127.0.0.1", 1883), 4).0,
            "climate",
            state.sensors.clone(),
            Duration::from_secs(300),
        ));
        let control = tokio::spawn(state.service.clone().run_loop(devices, ready, stop.clone()));

        let result = finish(Err(anyhow::anyhow!("address in use")), &stop, control).await;

        assert_eq!(result.unwrap_err().to_string(), "address in use");
        assert!(stop.load(Ordering::Relaxed));
        assert!(dir.path().join("state/climate_state.json").exists());
    }
}
