//! Network subsystem for station-mode WiFi
//!
//! Split into two layers:
//!
//! 1. [`Link`] - the radio, as far as the agent cares about it
//! 2. [`station`] - association lifecycle on top of a link
//!
//! # Architecture
//!
//! ```text
//! WifiStation<Idle> ──connect()──► WifiStation<Associated> ──is_connected()──► Agent
//!        │                                  ▲
//!        └──── Box<dyn Link> ───────────────┘
//! ```
//!
//! [`host_link::HostLink`] drives a Linux host's NetworkManager; tests plug in their own
//! links.

pub mod host_link;
pub mod station;

pub use host_link::HostLink;
pub use station::{Associated, Idle, StationSettings, WifiStation};

/// Minimal view of a WiFi radio.
///
/// Every method is expected to return quickly. `is_connected` in particular runs once per
/// scheduler tick and must never block.
pub trait Link: Send {
    /// Turns off any access point role so the device is a pure client.
    fn deactivate_access_point(&mut self) -> Result<(), NetworkError>;

    /// Enables the station (client) role.
    fn activate_station(&mut self) -> Result<(), NetworkError>;

    /// Starts associating with `ssid`. Does not wait for the association to finish.
    fn request_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;

    fn is_connected(&mut self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Could not connect to WiFi network {ssid} after {attempts} attempts")]
    AssociationTimeout { ssid: String, attempts: u32 },

    #[error("Network command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
}
