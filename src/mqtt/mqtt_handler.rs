use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::message::InboundMessage;
use super::session::{BrokerSession, SessionError};

// Capacity of the client's request queue
const REQUEST_CAPACITY: usize = 10;
// Events drained per inbound check before yielding back to the tick
const MAX_EVENTS_PER_CHECK: usize = 16;
// Recent errors kept in the status
const MAX_ERROR_MESSAGES: usize = 10;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl SessionStatus {
    fn record_error(&mut self, error: &SessionError) {
        if self.error_messages.len() == MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(error.to_string());
    }

    fn touch(&mut self) {
        self.last_activity = Some(chrono::Local::now());
    }
}

/// [`BrokerSession`] on top of rumqttc's async client.
///
/// rumqttc only moves bytes while its event loop is polled, so queued publishes and
/// subscriptions go out during the next [`check_inbound`](BrokerSession::check_inbound).
pub struct MqttSession {
    config: SessionConfig,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    poll_budget: Duration,
    status: SessionStatus,
}

impl MqttSession {
    pub fn new(config: SessionConfig, poll_budget: Duration) -> Self {
        info!("Prepared MQTT session {}", config);
        MqttSession {
            config,
            client: None,
            eventloop: None,
            poll_budget,
            status: SessionStatus::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        self.status.record_error(&error);
        error
    }
}

// Queues the feed subscription again without waiting on the request channel
fn resubscribe(client: Option<&AsyncClient>, feed: String, status: &mut SessionStatus) {
    let Some(client) = client else {
        return;
    };

    match client.try_subscribe(feed.clone(), super::FEED_QOS) {
        Ok(()) => info!("Transport came back, resubscribing to feed {}", feed),
        Err(e) => {
            let error = SessionError::from(e);
            warn!("Could not resubscribe to feed {}: {}", feed, error);
            status.record_error(&error);
        }
    }
}

// Drives a fresh event loop until the broker acknowledges the connection
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!("Broker acknowledged connection: {:?}", ack.code);
                return Ok(());
            }
            other => debug!("Event before ConnAck: {:?}", other),
        }
    }
}

impl BrokerSession for MqttSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        let previous_state = self.status.connection_state;
        self.status.connection_state = if self.client.is_some() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        info!("Opening MQTT session {}", self.config);

        let (client, mut eventloop) = AsyncClient::new(self.config.mqtt_options(), REQUEST_CAPACITY);

        let result = match timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop)).await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout),
        };

        match result {
            Ok(()) => {
                self.client = Some(client);
                self.eventloop = Some(eventloop);
                self.status.connection_state = ConnectionState::Connected;
                self.status.touch();
                info!("MQTT session {} connected", self.config.client_id);
                Ok(())
            }
            Err(e) => {
                // Keep whatever transport we had; a first attempt has none.
                self.status.connection_state = if previous_state == ConnectionState::Disconnected
                {
                    ConnectionState::Failed
                } else {
                    previous_state
                };
                Err(self.fail(e))
            }
        }
    }

    async fn bind_feed(&mut self) -> Result<(), SessionError> {
        let feed = self.config.feed_path();
        let client = match &self.client {
            Some(client) => client.clone(),
            None => return Err(self.fail(SessionError::NotConnected)),
        };

        match client.subscribe(feed.clone(), super::FEED_QOS).await {
            Ok(()) => {
                info!("Subscribed to feed {}", feed);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    async fn publish(&mut self, payload: &[u8], qos: QoS) -> Result<(), SessionError> {
        let feed = self.config.feed_path();
        let client = match &self.client {
            Some(client) => client,
            None => return Err(self.fail(SessionError::NotConnected)),
        };

        match client.try_publish(feed, qos, false, payload.to_vec()) {
            Ok(()) => {
                self.status.messages_sent += 1;
                self.status.touch();
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    async fn check_inbound(&mut self) -> Result<Option<InboundMessage>, SessionError> {
        let poll_budget = self.poll_budget;
        let eventloop = match self.eventloop.as_mut() {
            Some(eventloop) => eventloop,
            None => return Err(self.fail(SessionError::NotConnected)),
        };

        for _ in 0..MAX_EVENTS_PER_CHECK {
            let event = match timeout(poll_budget, eventloop.poll()).await {
                // Nothing ready within the budget
                Err(_) => return Ok(None),
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    let error = SessionError::from(e);
                    warn!("MQTT event loop error: {}", error);
                    self.status.connection_state = ConnectionState::Failed;
                    return Err(self.fail(error));
                }
            };

            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    let message = InboundMessage::from_payload(publish.topic, &publish.payload);
                    self.status.messages_received += 1;
                    self.status.touch();
                    return Ok(Some(message));
                }
                Event::Incoming(Packet::ConnAck(_)) => {
                    // rumqttc reconnected on its own; the clean session dropped the feed
                    self.status.connection_state = ConnectionState::Connected;
                    resubscribe(self.client.as_ref(), self.config.feed_path(), &mut self.status);
                }
                other => debug!("MQTT event: {:?}", other),
            }
        }

        Ok(None)
    }
}
