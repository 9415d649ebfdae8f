use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use iotv_link::mqtt::resilience::{ReconnectPolicy, ReconnectTracker};
use iotv_link::simulator::SensorSimulator;
use iotv_link::{
    default_subscriptions, AppConfig, ChannelSink, ConnectionConfig, MqttSession, Observation,
    ObservationLog, Publisher, SensorKind, SessionState, SinkEvent,
};

/// Rows kept for the data grid
const OBSERVATION_LOG_CAPACITY: usize = 500;
/// Line chart window and per-series point cap
const CHART_WINDOW: Duration = Duration::from_secs(60);
const CHART_MAX_POINTS: usize = 66;

#[derive(Parser, Debug)]
#[command(name = "iotv-link")]
#[command(version)]
#[command(about = "Subscribe to the IoTv sensor topics and publish simulated readings", long_about = None)]
struct Args {
    /// Path to configuration file (default: ./iotv-link.toml or ~/.config/iotv-link/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Username for MQTT auth (overrides config)
    #[arg(short, long)]
    username: Option<String>,

    /// Password for MQTT auth (overrides config)
    #[arg(long)]
    password: Option<String>,

    /// Client id prefix; a random suffix is appended per connection
    #[arg(long)]
    client_id_prefix: Option<String>,

    /// Do not publish simulated readings
    #[arg(long)]
    no_simulate: bool,

    /// Simulator interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Reconnect with backoff after the connection drops
    #[arg(long)]
    reconnect: bool,

    /// Print observations as JSON lines
    #[arg(long)]
    json: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save: bool,

    /// Enable debug logging to file
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) -> Result<()> {
    if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("iotv-link.log")
            .context("Failed to open log file")?;
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to set tracing subscriber")?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))?;
    }
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    let mqtt = &mut config.mqtt;
    if let Some(host) = &args.host {
        mqtt.server_host = host.clone();
    }
    if let Some(port) = args.port {
        mqtt.server_port = port;
    }
    if let Some(username) = &args.username {
        mqtt.username = username.clone();
    }
    if let Some(password) = &args.password {
        mqtt.password = password.clone();
    }
    if let Some(prefix) = &args.client_id_prefix {
        mqtt.client_id_prefix = prefix.clone();
    }
    if args.no_simulate {
        config.simulator.enabled = false;
    }
    if let Some(interval) = args.interval_ms {
        config.simulator.interval_ms = interval;
    }
    if args.reconnect {
        config.reconnect.enabled = true;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug)?;

    let config_path = AppConfig::find_config_path(args.config.as_deref());
    let mut config = AppConfig::load_or_default(&config_path)?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.save {
        config
            .save_to(&config_path)
            .context("Failed to persist config")?;
        info!("Saved config to {}", config_path.display());
    }

    info!("Starting iotv-link");
    run(config, config_path, &args).await
}

async fn connect_and_subscribe(session: &MqttSession, config: &ConnectionConfig) -> Result<()> {
    session
        .connect_and_subscribe(config, &default_subscriptions())
        .await
        .with_context(|| {
            format!(
                "Failed to open session with {}:{}",
                config.server_host, config.server_port
            )
        })
}

/// Reload the config file and apply the CLI overrides on top
fn reload_config(path: &Path, args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load_or_default(path)?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

/// SIGHUP asks for the config to be reapplied; never fires off unix
struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        Ok(Self { hangup })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            // Stream closed; stay quiet instead of firing on every poll
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Schedule the next reconnect attempt, or fail once the policy gives up
fn schedule_retry(tracker: &ReconnectTracker) -> Result<Instant> {
    match tracker.next_delay() {
        Some(delay) => {
            warn!(
                "Reconnecting in {:?} (attempt {}, total reconnects: {})",
                delay,
                tracker.failure_count(),
                tracker.total_reconnects()
            );
            Ok(Instant::now() + delay)
        }
        None => bail!(
            "Giving up after {} reconnect attempts: {}",
            tracker.failure_count(),
            tracker.last_error().unwrap_or("unknown error")
        ),
    }
}

fn print_observation(obs: &Observation, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(obs)?);
    } else {
        println!(
            "{}  {:<11} {:>4} {}",
            obs.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            obs.kind,
            obs.value,
            obs.unit
        );
    }
    Ok(())
}

fn spawn_simulated_publish(
    publisher: &Publisher,
    simulator: &SensorSimulator,
    config: &ConnectionConfig,
) {
    for message in simulator.next_messages(&mut rand::thread_rng()) {
        let publisher = publisher.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let topic = message.topic.clone();
            if let Err(e) = publisher.publish(&config, message).await {
                warn!("Simulated publish to {} failed: {}", topic, e);
            }
        });
    }
}

async fn run(mut config: AppConfig, config_path: PathBuf, args: &Args) -> Result<()> {
    let (sink, mut events): (ChannelSink, mpsc::UnboundedReceiver<SinkEvent>) =
        ChannelSink::channel();
    let session = MqttSession::with_rumqtt(sink);
    let publisher = Publisher::default();
    let mut simulator = SensorSimulator::from_config(&config.simulator);
    let mut simulating = config.simulator.enabled;
    let mut log = ObservationLog::new(OBSERVATION_LOG_CAPACITY);
    let mut tracker = ReconnectTracker::new(ReconnectPolicy::from_config(&config.reconnect));
    let mut retry_at: Option<Instant> = None;
    let mut reload = ReloadSignal::new()?;

    info!(
        "Connecting to {}:{}",
        config.mqtt.server_host, config.mqtt.server_port
    );
    if let Err(e) = connect_and_subscribe(&session, &config.mqtt).await {
        if !config.reconnect.enabled {
            return Err(e);
        }
        error!("{:#}", e);
        tracker.record_failure(format!("{:#}", e));
        retry_at = Some(schedule_retry(&tracker)?);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.simulator.interval_ms));

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            _ = ticker.tick(), if simulating => {
                spawn_simulated_publish(&publisher, &simulator, &config.mqtt);
            }
            _ = reload.recv() => {
                info!("Reapplying settings from {}", config_path.display());
                let next = match reload_config(&config_path, args) {
                    Ok(next) => next,
                    Err(e) => {
                        error!("Keeping current settings: {:#}", e);
                        continue;
                    }
                };

                simulating = false;
                retry_at = None;
                debug!("Simulator paused for reconnect");

                config = next;
                tracker = ReconnectTracker::new(ReconnectPolicy::from_config(&config.reconnect));
                if let Err(e) = session.reconnect(&config.mqtt).await {
                    error!("Reconnect with new settings failed: {}", e);
                    tracker.record_failure(e.to_string());
                    if config.reconnect.enabled {
                        match schedule_retry(&tracker) {
                            Ok(at) => retry_at = Some(at),
                            Err(e) => break Err(e),
                        }
                    }
                }

                simulator = SensorSimulator::from_config(&config.simulator);
                ticker = tokio::time::interval(Duration::from_millis(config.simulator.interval_ms));
                simulating = config.simulator.enabled;
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                if session.state() != SessionState::Disconnected {
                    debug!("Session is {}, skipping scheduled reconnect", session.state());
                    continue;
                }
                if let Err(e) = connect_and_subscribe(&session, &config.mqtt).await {
                    error!("{:#}", e);
                    tracker.record_failure(format!("{:#}", e));
                    match schedule_retry(&tracker) {
                        Ok(at) => retry_at = Some(at),
                        Err(e) => break Err(e),
                    }
                }
            }
            Some(event) = events.recv() => match event {
                SinkEvent::Connected => {
                    tracker.record_success();
                    info!("Connected to MQTT broker");
                }
                SinkEvent::Disconnected => {
                    warn!("Not connected to MQTT broker");
                    // Skip the notice left behind by a reconnect that already succeeded
                    if config.reconnect.enabled
                        && retry_at.is_none()
                        && session.state() == SessionState::Disconnected
                    {
                        match schedule_retry(&tracker) {
                            Ok(at) => retry_at = Some(at),
                            Err(e) => break Err(e),
                        }
                    }
                }
                SinkEvent::Error(message) => {
                    error!("MQTT error: {}", message);
                    tracker.record_failure(message);
                }
                SinkEvent::Observation(obs) => {
                    if let Err(e) = print_observation(&obs, args.json) {
                        warn!("Failed to print observation: {}", e);
                    }
                    log.insert(obs);
                    debug!(
                        "Chart points: temperature={} humidity={}",
                        log.series(SensorKind::Temperature, CHART_WINDOW, CHART_MAX_POINTS).len(),
                        log.series(SensorKind::Humidity, CHART_WINDOW, CHART_MAX_POINTS).len()
                    );
                }
                SinkEvent::Message(msg) => {
                    debug!("Message on {} ({} bytes)", msg.topic, msg.payload.len());
                }
            },
        }
    };

    session.disconnect().await;
    info!(
        "iotv-link exiting ({} observations received, {} connections)",
        log.len(),
        tracker.total_connections()
    );
    outcome
}
