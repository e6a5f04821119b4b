//! Resilience loop: one cooperative scheduler for publishing, inbound checks and WiFi
//! recovery.
//!
//! Every tick samples the link exactly once and derives a [`LinkPhase`] from it and from
//! whether the broker session is believed healthy. Within a tick the order is fixed:
//!
//! 1. sample due? persist it, publish it if the link is up, reset the accumulator
//! 2. `Stable` checks for one inbound message, `Recovered` rebuilds the broker session.
//!    A failed inbound check also clears the "was connected" flag, so a session that dies
//!    while WiFi stays up is rebuilt the same way on the next tick
//! 3. `Down` marks the session as needing a rebuild
//! 4. sleep one tick and add it to the accumulator

use super::Agent;
use crate::mqtt::{BrokerSession, InboundMessage, FEED_QOS};
use crate::persistence::Sample;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Link situation for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkPhase {
    /// Was connected and still is
    Stable,
    /// Connected, but the broker session must be rebuilt, either because WiFi was down or
    /// because the last inbound check failed
    Recovered,
    /// Not connected
    Down,
}

impl LinkPhase {
    pub fn observe(was_connected: bool, connected: bool) -> Self {
        match (connected, was_connected) {
            (false, _) => LinkPhase::Down,
            (true, true) => LinkPhase::Stable,
            (true, false) => LinkPhase::Recovered,
        }
    }

    pub fn is_up(self) -> bool {
        !matches!(self, LinkPhase::Down)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Failed,
    Skipped,
}

/// What happened to the sample produced in a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleReport {
    pub sample: Sample,
    pub persisted: bool,
    pub publish: PublishOutcome,
}

/// Summary of one tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub phase: LinkPhase,
    pub sample: Option<SampleReport>,
    pub inbound_checked: bool,
    pub message: Option<InboundMessage>,
    /// Outcome of the reconnect sequence, if one ran
    pub reconnected: Option<bool>,
}

impl TickReport {
    fn new(phase: LinkPhase) -> Self {
        Self {
            phase,
            sample: None,
            inbound_checked: false,
            message: None,
            reconnected: None,
        }
    }
}

impl<B: BrokerSession> Agent<B> {
    /// Runs one tick without the trailing sleep.
    pub async fn tick(&mut self) -> TickReport {
        self.stats.ticks += 1;

        let connected = self.station.is_connected();
        let phase = LinkPhase::observe(self.was_connected, connected);
        let mut report = TickReport::new(phase);

        if self.publish_elapsed >= self.settings.publish_period {
            report.sample = Some(self.produce_sample(phase).await);
            self.publish_elapsed = Duration::ZERO;
        }

        match phase {
            LinkPhase::Stable => {
                report.inbound_checked = true;
                report.message = self.check_inbound().await;
            }
            LinkPhase::Recovered => {
                report.reconnected = Some(self.reconnect().await);
            }
            LinkPhase::Down => {
                if self.was_connected {
                    warn!("WiFi connection lost");
                } else {
                    debug!("WiFi is off");
                }
                self.was_connected = false;
            }
        }

        report
    }

    /// Runs one tick, then sleeps for the tick duration and accounts for it.
    pub async fn step(&mut self) -> TickReport {
        let report = self.tick().await;
        tokio::time::sleep(self.settings.tick).await;
        self.account_tick();
        report
    }

    /// Runs the loop until `shutdown` resolves and returns the final counters.
    ///
    /// Shutdown is only observed during the sleep between ticks, so a tick always runs to
    /// completion. Resources are not torn down explicitly.
    pub async fn run_until<F>(&mut self, shutdown: F) -> super::AgentStats
    where
        F: Future<Output = ()>,
    {
        info!("Entering resilience loop");
        tokio::pin!(shutdown);

        loop {
            self.tick().await;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, exiting");
                    break;
                }
                _ = tokio::time::sleep(self.settings.tick) => self.account_tick(),
            }
        }

        info!("Agent stats: {:?}", self.stats);
        self.stats.clone()
    }

    fn account_tick(&mut self) {
        self.publish_elapsed += self.settings.tick;
    }

    async fn produce_sample(&mut self, phase: LinkPhase) -> SampleReport {
        let sample = self.last_sample.map_or_else(Sample::first, Sample::next);
        self.last_sample = Some(sample);

        info!("Saving sample {} locally", sample);
        let persisted = match self.buffer.append(sample).await {
            Ok(()) => {
                self.stats.samples_persisted += 1;
                true
            }
            Err(e) => {
                error!("{}", e);
                self.stats.buffer_failures += 1;
                false
            }
        };

        let publish = if phase.is_up() {
            info!("Publishing sample {} online", sample);
            self.stats.publishes_attempted += 1;
            match self.session.publish(&sample.to_payload(), FEED_QOS).await {
                Ok(()) => PublishOutcome::Sent,
                Err(e) => {
                    error!("Could not publish sample {}: {}", sample, e);
                    self.stats.publishes_failed += 1;
                    PublishOutcome::Failed
                }
            }
        } else {
            info!("Could not publish sample {} online, WiFi is down", sample);
            self.stats.publishes_skipped += 1;
            PublishOutcome::Skipped
        };

        SampleReport {
            sample,
            persisted,
            publish,
        }
    }

    async fn check_inbound(&mut self) -> Option<InboundMessage> {
        debug!("Checking for messages...");
        self.stats.inbound_checks += 1;

        match self.session.check_inbound().await {
            Ok(Some(message)) => {
                info!(
                    "Subscribe: received data: {} (at {})",
                    message,
                    message.timestamp().format("%H:%M:%S%.3f")
                );
                self.stats.messages_received += 1;
                self.last_message = Some(message.clone());
                Some(message)
            }
            Ok(None) => None,
            Err(e) => {
                // A dead session is rebuilt through open + bind_feed on the next tick
                warn!("Inbound check failed, rebuilding the broker session: {}", e);
                self.stats.inbound_failures += 1;
                self.was_connected = false;
                None
            }
        }
    }

    // Retried on every tick while the link stays up, without backoff
    async fn reconnect(&mut self) -> bool {
        info!("WiFi is back, trying to resubscribe the client...");
        self.stats.reconnect_attempts += 1;

        if let Err(e) = self.session.open().await {
            error!("Could not connect to MQTT server: {}", e);
            self.stats.reconnect_failures += 1;
            return false;
        }
        info!("Client connected");

        if let Err(e) = self.session.bind_feed().await {
            error!("Could not subscribe to feed: {}", e);
            self.stats.reconnect_failures += 1;
            return false;
        }
        info!("Client subscribed");

        self.was_connected = true;
        true
    }
}
