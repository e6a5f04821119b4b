pub mod agent;
pub mod config;
pub mod mqtt;
pub mod network;
pub mod persistence;

use crate::agent::{Agent, AgentSettings};
use crate::mqtt::{ClientId, MqttSession, SessionConfig};
use crate::network::{HostLink, StationSettings, WifiStation};
use crate::persistence::LocalBuffer;
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let path = config::config_path()?;
    let config = config::load_or_create(&path).await?;

    // Give the host's network stack time to settle after boot
    let delay = config.timing.startup_delay();
    info!("Waiting {:?} before bringing up WiFi", delay);
    tokio::time::sleep(delay).await;

    let link = HostLink::new(&config.wifi);
    let station = WifiStation::create(
        Box::new(link),
        StationSettings {
            ssid: config.wifi.ssid.clone(),
            password: config.wifi.password.clone(),
            max_attempts: config.wifi.max_attempts,
            retry_interval: config.wifi.retry_interval(),
        },
    );

    let session = MqttSession::new(
        SessionConfig::from_broker(&config.broker, ClientId::random()),
        config.timing.inbound_poll_budget(),
    );
    info!("Samples go to feed {}", session.config().feed_path());
    let buffer = LocalBuffer::new(config.buffer.path.clone());
    let settings = AgentSettings {
        publish_period: config.timing.publish_period(),
        tick: config.timing.tick(),
    };

    let mut agent = match Agent::start(station, session, buffer, settings).await {
        Ok(agent) => agent,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(eyre!("Startup failed: {}", e));
        }
    };

    let stats = agent
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let status = agent.session().status();
    info!(
        "Ctrl-C pressed, exiting after {} ticks: MQTT {:?}, {} sent, {} received, recent errors {:?}",
        stats.ticks,
        status.connection_state,
        status.messages_sent,
        status.messages_received,
        status.error_messages
    );
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
