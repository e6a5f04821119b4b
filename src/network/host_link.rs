use super::{Link, NetworkError};
use crate::config::WifiConfig;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

const NMCLI: &str = "nmcli";
const SYSFS_NET: &str = "/sys/class/net";

/// [`Link`] for a Linux host managed by NetworkManager.
///
/// Association runs in a spawned `nmcli` process so `request_connect` returns at once; link
/// state comes from the interface's sysfs `operstate`.
pub struct HostLink {
    interface: String,
    access_point_connection: Option<String>,
    sysfs_root: PathBuf,
    pending_connect: Option<Child>,
}

impl HostLink {
    pub fn new(config: &WifiConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            access_point_connection: config.access_point_connection.clone(),
            sysfs_root: PathBuf::from(SYSFS_NET),
            pending_connect: None,
        }
    }

    /// Reads link state below `root` instead of `/sys/class/net`.
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    fn operstate_path(&self) -> PathBuf {
        self.sysfs_root.join(&self.interface).join("operstate")
    }

    fn run_nmcli(&self, args: &[&str]) -> Result<(), NetworkError> {
        let command = format!("{} {}", NMCLI, args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(NMCLI)
            .args(args)
            .output()
            .map_err(|e| NetworkError::Command {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(NetworkError::Command {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    // Reap a finished nmcli connect so it does not linger as a zombie
    fn reap_pending_connect(&mut self) {
        if let Some(child) = self.pending_connect.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        debug!("nmcli connect finished");
                    } else {
                        warn!("nmcli connect exited with {}", status);
                    }
                    self.pending_connect = None;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not poll nmcli connect: {}", e);
                    self.pending_connect = None;
                }
            }
        }
    }
}

// Kills a superseded nmcli connect and reaps it
fn stop_connect(mut child: Child) {
    if let Err(e) = child.kill() {
        // InvalidInput means the process already exited
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!("Could not stop previous nmcli connect: {}", e);
        }
    }
    match child.wait() {
        Ok(status) => debug!("Previous nmcli connect ended with {}", status),
        Err(e) => warn!("Could not reap previous nmcli connect: {}", e),
    }
}

impl Link for HostLink {
    fn deactivate_access_point(&mut self) -> Result<(), NetworkError> {
        match self.access_point_connection.clone() {
            Some(name) => {
                info!("Turning off access point connection {}", name);
                self.run_nmcli(&["connection", "down", "id", &name])
            }
            None => {
                debug!("No access point connection configured");
                Ok(())
            }
        }
    }

    fn activate_station(&mut self) -> Result<(), NetworkError> {
        self.run_nmcli(&["radio", "wifi", "on"])
    }

    fn request_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        if let Some(previous) = self.pending_connect.take() {
            stop_connect(previous);
        }

        let child = Command::new(NMCLI)
            .args(["device", "wifi", "connect", ssid])
            .args(["password", password])
            .args(["ifname", &self.interface])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NetworkError::Command {
                // Password stays out of the logged command
                command: format!("{} device wifi connect {}", NMCLI, ssid),
                reason: e.to_string(),
            })?;

        self.pending_connect = Some(child);
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.reap_pending_connect();

        match std::fs::read_to_string(self.operstate_path()) {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!("Could not read operstate of {}: {}", self.interface, e);
                false
            }
        }
    }
}
