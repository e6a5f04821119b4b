//! # Agent Module
//!
//! The agent is the single context object that ties the station, the broker session and
//! the local sample file together and runs the resilience loop over them.
//!
//! ## Lifecycle
//!
//! ```text
//! start()                                   run_until(shutdown)
//!   ├─ station.connect()    (fatal)           loop:
//!   ├─ session.open()       (fatal)             tick()  ── publish / inbound / reconnect
//!   ├─ session.bind_feed()  (fatal)             sleep(tick)
//!   └─ buffer.reset()       (fatal)             accumulate
//! ```
//!
//! Nothing after `start` is fatal. Network trouble during the loop becomes log lines and
//! counters in [`AgentStats`]; the loop only ends when the shutdown future resolves.

mod resilience;


use crate::mqtt::{BrokerSession, InboundMessage, SessionError};
use crate::network::{Associated, Idle, NetworkError, WifiStation};
use crate::persistence::{BufferError, LocalBuffer, Sample};
use std::time::Duration;
use tracing::{error, info};

pub use resilience::{LinkPhase, PublishOutcome, SampleReport, TickReport};

/// Scheduler timing.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSettings {
    /// Time between two samples
    pub publish_period: Duration,
    /// Sleep between two ticks
    pub tick: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            publish_period: Duration::from_secs(10),
            tick: Duration::from_millis(500),
        }
    }
}

/// Running totals, logged when the agent stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub ticks: u64,
    pub samples_persisted: u64,
    pub buffer_failures: u64,
    pub publishes_attempted: u64,
    pub publishes_failed: u64,
    pub publishes_skipped: u64,
    pub inbound_checks: u64,
    pub inbound_failures: u64,
    pub messages_received: u64,
    pub reconnect_attempts: u64,
    pub reconnect_failures: u64,
}

/// Startup failures. All of them end the process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("WiFi connection failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Could not connect to MQTT server: {0}")]
    Broker(#[from] SessionError),

    #[error("Could not prepare sample file: {0}")]
    Buffer(#[from] BufferError),
}

pub struct Agent<B: BrokerSession> {
    station: WifiStation<Associated>,
    session: B,
    buffer: LocalBuffer,
    settings: AgentSettings,

    // Time slept since the last publish attempt
    publish_elapsed: Duration,
    // Last sample handed out, None before the first publish period
    last_sample: Option<Sample>,
    last_message: Option<InboundMessage>,
    // Whether the broker session is believed healthy for the current link
    was_connected: bool,

    stats: AgentStats,
}

impl<B: BrokerSession> Agent<B> {
    /// Brings the agent up: WiFi, broker session, feed subscription, fresh sample file.
    ///
    /// Order matters: the sample file is only touched once the network side is up, so a
    /// failed start leaves the previous run's file alone.
    pub async fn start(
        station: WifiStation<Idle>,
        mut session: B,
        buffer: LocalBuffer,
        settings: AgentSettings,
    ) -> Result<Self, StartupError> {
        let station = station.connect().await?;

        if let Err(e) = session.open().await {
            error!("Could not connect to MQTT server: {}", e);
            return Err(e.into());
        }
        if let Err(e) = session.bind_feed().await {
            error!("Could not subscribe to feed: {}", e);
            return Err(e.into());
        }

        buffer.reset().await?;

        info!(
            "Agent started: sample every {:?}, tick {:?}",
            settings.publish_period, settings.tick
        );
        Ok(Self::with_parts(station, session, buffer, settings))
    }

    /// Assembles an agent from already connected parts.
    pub fn with_parts(
        station: WifiStation<Associated>,
        session: B,
        buffer: LocalBuffer,
        settings: AgentSettings,
    ) -> Self {
        Self {
            station,
            session,
            buffer,
            settings,
            publish_elapsed: Duration::ZERO,
            last_sample: None,
            last_message: None,
            // Startup only returns once WiFi and broker are up
            was_connected: true,
            stats: AgentStats::default(),
        }
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    pub fn session(&self) -> &B {
        &self.session
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.buffer
    }

    pub fn last_sample(&self) -> Option<Sample> {
        self.last_sample
    }

    /// Most recent message seen on the feed.
    pub fn last_message(&self) -> Option<&InboundMessage> {
        self.last_message.as_ref()
    }
}
