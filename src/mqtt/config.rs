use crate::config::BrokerConfig;
use rumqttc::{MqttOptions, Transport};
use std::fmt;
use std::time::Duration;

/// Per-process MQTT client identifier, `client_<n>` with `n` built from 3 random bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    pub fn random() -> Self {
        Self::from_bytes(rand::random::<[u8; 3]>())
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        let n = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
        ClientId(format!("client_{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to (re)open the broker session. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub client_id: ClientId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key: String,
    pub feed_name: String,
    pub tls: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn from_broker(broker: &BrokerConfig, client_id: ClientId) -> Self {
        Self {
            client_id,
            host: broker.host.clone(),
            port: broker.port(),
            username: broker.username.clone(),
            key: broker.key.clone(),
            feed_name: broker.feed.clone(),
            tls: broker.tls,
            keep_alive: broker.keep_alive(),
            connect_timeout: broker.connect_timeout(),
        }
    }

    /// Topic used for both publishing and subscribing: `{username}/feeds/{feedname}`.
    pub fn feed_path(&self) -> String {
        format!("{}/feeds/{}", self.username, self.feed_name)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.as_str(), self.host.clone(), self.port);
        options
            .set_credentials(self.username.clone(), self.key.clone())
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);

        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

impl fmt::Display for SessionConfig {
    /// Formats as `client@user@host:port`, without the key.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}@{}@{}:{}",
            self.client_id, self.username, self.host, self.port
        )
    }
}
