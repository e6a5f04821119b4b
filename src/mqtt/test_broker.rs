//! Minimal MQTT 3.1.1 broker on a local socket for driving [`MqttSession`] end to end.
//!
//! It understands just enough of the protocol for one client: CONNECT, SUBSCRIBE, QoS 0
//! PUBLISH, PINGREQ and DISCONNECT. Every connection it accepts gets an index, starting at
//! zero, so tests can tell the first transport from a rebuilt one.
//!
//! [`MqttSession`]: super::MqttSession

use super::{ClientId, SessionConfig};
use crate::config::BrokerConfig;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
const PINGRESP: [u8; 2] = [0xD0, 0x00];

/// Packets the broker received, tagged with the connection they arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seen {
    Connect {
        connection: usize,
    },
    Subscribe {
        connection: usize,
        topic: String,
    },
    Publish {
        connection: usize,
        topic: String,
        payload: Vec<u8>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    /// Hang up on the first connection right after acknowledging its SUBSCRIBE
    pub drop_first_after_suback: bool,
    /// Wait this long before the CONNACK of every connection but the first
    pub reconnect_connack_delay: Duration,
    /// Publish this payload on the subscribed topic after each SUBACK
    pub echo_on_subscribe: Option<Vec<u8>>,
}

pub struct TestBroker {
    port: u16,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl TestBroker {
    pub async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, connection, behaviour.clone(), log.clone()));
                connection += 1;
            }
        });

        TestBroker { port, seen }
    }

    /// Session settings pointing at this broker.
    pub fn session_config(&self) -> SessionConfig {
        let broker = BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: Some(self.port),
            username: "sensor-owner".to_string(),
            key: "aio_key".to_string(),
            connect_timeout_secs: 2,
            ..BrokerConfig::default()
        };
        SessionConfig::from_broker(&broker, ClientId::from_bytes([1, 2, 3]))
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn subscriptions_on(&self, connection: usize) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Subscribe {
                    connection: c,
                    topic,
                } if c == connection => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn published_payloads(&self) -> Vec<Vec<u8>> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Publish { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }
}

async fn serve(
    mut stream: TcpStream,
    connection: usize,
    behaviour: Behaviour,
    seen: Arc<Mutex<Vec<Seen>>>,
) {
    while let Ok((kind, flags, body)) = read_packet(&mut stream).await {
        let reply = match kind {
            CONNECT => {
                seen.lock().unwrap().push(Seen::Connect { connection });
                if connection > 0 {
                    tokio::time::sleep(behaviour.reconnect_connack_delay).await;
                }
                CONNACK_ACCEPTED.to_vec()
            }
            SUBSCRIBE => {
                let (topic, _) = read_string(&body, 2);
                seen.lock().unwrap().push(Seen::Subscribe {
                    connection,
                    topic: topic.clone(),
                });

                let mut reply = encode(0x90, &[body[0], body[1], 0x00]);
                if let Some(payload) = &behaviour.echo_on_subscribe {
                    reply.extend(publish_packet(&topic, payload));
                }
                reply
            }
            PUBLISH => {
                let (topic, mut at) = read_string(&body, 0);
                // Packet identifier only present above QoS 0
                if (flags >> 1) & 0x03 > 0 {
                    at += 2;
                }
                seen.lock().unwrap().push(Seen::Publish {
                    connection,
                    topic,
                    payload: body[at..].to_vec(),
                });
                Vec::new()
            }
            PINGREQ => PINGRESP.to_vec(),
            DISCONNECT => return,
            _ => Vec::new(),
        };

        if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
            return;
        }

        if kind == SUBSCRIBE && connection == 0 && behaviour.drop_first_after_suback {
            return;
        }
    }
}

// Returns (packet type, header flags, body)
async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, u8, Vec<u8>)> {
    let header = stream.read_u8().await?;

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header >> 4, header & 0x0F, body))
}

fn read_string(body: &[u8], at: usize) -> (String, usize) {
    let len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
    let start = at + 2;
    let text = String::from_utf8_lossy(&body[start..start + len]).into_owned();
    (text, start + len)
}

fn encode(header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    packet
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = (topic.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);
    encode(0x30, &body)
}
