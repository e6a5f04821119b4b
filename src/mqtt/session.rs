use super::InboundMessage;
use rumqttc::{ClientError, ConnectReturnCode, ConnectionError, QoS};

/// Contract between the resilience loop and whatever carries its feed to the broker.
///
/// Implementations own the session identity and the transport handle. Every method may do
/// network I/O but `publish` and `check_inbound` must stay short compared to a scheduler
/// tick.
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    /// Establishes a fresh transport and waits for the broker to accept it.
    ///
    /// The previous transport is only replaced on success; on failure it stays in place
    /// (possibly broken) so a later attempt can try again.
    async fn open(&mut self) -> Result<(), SessionError>;

    /// Subscribes to the feed on the current transport.
    async fn bind_feed(&mut self) -> Result<(), SessionError>;

    /// Queues `payload` for the feed. Does not check that the network is reachable.
    async fn publish(&mut self, payload: &[u8], qos: QoS) -> Result<(), SessionError>;

    /// Returns one pending inbound message, or `None` straight away if there is none.
    async fn check_inbound(&mut self) -> Result<Option<InboundMessage>, SessionError>;
}

/// Failure kinds for broker operations.
///
/// Errors reported by the transport are folded into these variants so callers can tell a
/// wrong key from a flaky network without knowing rumqttc's error types.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Timed out waiting for the broker")]
    Timeout,

    #[error("Broker rejected credentials: {0}")]
    Auth(String),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Transport reset: {0}")]
    Transport(String),

    #[error("Request could not be queued: {0}")]
    Request(String),

    #[error("No broker session has been opened")]
    NotConnected,
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => SessionError::Timeout,
            ConnectionError::ConnectionRefused(code) => match code {
                ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                    SessionError::Auth(format!("{:?}", code))
                }
                other => SessionError::Refused(format!("{:?}", other)),
            },
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl From<ClientError> for SessionError {
    fn from(e: ClientError) -> Self {
        SessionError::Request(e.to_string())
    }
}
