use super::{Link, NetworkError};
use statum::{machine, state};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Station settings
#[derive(Clone, Debug)]
pub struct StationSettings {
    pub ssid: String,
    pub password: String,
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            max_attempts: 20,
            retry_interval: Duration::from_secs(3),
        }
    }
}

// Station lifecycle states
#[state]
#[derive(Debug, Clone)]
pub enum StationState {
    Idle,
    Associated,
}

#[machine]
pub struct WifiStation<S: StationState> {
    // Radio handle
    link: Box<dyn Link>,

    // SSID, credentials and retry bound
    settings: StationSettings,
}

impl<S: StationState> WifiStation<S> {
    pub fn settings(&self) -> &StationSettings {
        &self.settings
    }
}

impl WifiStation<Idle> {
    pub fn create(link: Box<dyn Link>, settings: StationSettings) -> Self {
        debug!(
            "Creating WiFi station for {} ({} attempts, {:?} apart)",
            settings.ssid, settings.max_attempts, settings.retry_interval
        );
        Self::new(link, settings)
    }

    // Join the network and transition to Associated, or give up after the retry bound
    pub async fn connect(mut self) -> Result<WifiStation<Associated>, NetworkError> {
        if let Err(e) = self.link.deactivate_access_point() {
            warn!("Could not deactivate access point: {}", e);
        }
        self.link.activate_station()?;

        info!("Connecting to WiFi network {}", self.settings.ssid);
        self.link
            .request_connect(&self.settings.ssid, &self.settings.password)?;

        let mut attempts = 0;
        while !self.link.is_connected() && attempts < self.settings.max_attempts {
            attempts += 1;
            debug!(
                "WiFi not associated yet (attempt {}/{})",
                attempts, self.settings.max_attempts
            );
            tokio::time::sleep(self.settings.retry_interval).await;
        }

        if !self.link.is_connected() {
            error!("Could not connect to the WiFi network {}", self.settings.ssid);
            return Err(NetworkError::AssociationTimeout {
                ssid: self.settings.ssid.clone(),
                attempts,
            });
        }

        info!(
            "Connected to WiFi network {} after {} attempts",
            self.settings.ssid, attempts
        );
        Ok(self.transition())
    }
}

impl WifiStation<Associated> {
    // Cheap per-tick connectivity query
    pub fn is_connected(&mut self) -> bool {
        self.link.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    // Link that reports connected once `is_connected` has been queried `after` times
    struct DelayedLink {
        after: Option<u32>,
        queries: Arc<AtomicU32>,
        ap_deactivated: bool,
        station_active: bool,
        requested: Option<String>,
    }

    impl DelayedLink {
        fn new(after: Option<u32>) -> (Self, Arc<AtomicU32>) {
            let queries = Arc::new(AtomicU32::new(0));
            (
                Self {
                    after,
                    queries: queries.clone(),
                    ap_deactivated: false,
                    station_active: false,
                    requested: None,
                },
                queries,
            )
        }
    }

    impl Link for DelayedLink {
        fn deactivate_access_point(&mut self) -> Result<(), NetworkError> {
            self.ap_deactivated = true;
            Ok(())
        }

        fn activate_station(&mut self) -> Result<(), NetworkError> {
            assert!(self.ap_deactivated, "access point must go down first");
            self.station_active = true;
            Ok(())
        }

        fn request_connect(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
            assert!(self.station_active, "station must be active before connecting");
            self.requested = Some(ssid.to_string());
            Ok(())
        }

        fn is_connected(&mut self) -> bool {
            let seen = self.queries.fetch_add(1, Ordering::SeqCst);
            matches!(self.after, Some(after) if seen >= after)
        }
    }

    fn settings() -> StationSettings {
        StationSettings {
            ssid: "field-ap".to_string(),
            password: "secret".to_string(),
            ..StationSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_once_link_reports_association() {
        let (link, _) = DelayedLink::new(Some(3));
        let start = Instant::now();

        let mut station = WifiStation::create(Box::new(link), settings())
            .connect()
            .await
            .expect("station should associate");

        assert!(station.is_connected());
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn already_associated_link_does_not_sleep() {
        let (link, _) = DelayedLink::new(Some(0));
        let start = Instant::now();

        WifiStation::create(Box::new(link), settings())
            .connect()
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_twenty_attempts_three_seconds_apart() {
        let (link, queries) = DelayedLink::new(None);
        let start = Instant::now();

        let err = WifiStation::create(Box::new(link), settings())
            .connect()
            .await
            .err()
            .expect("association must fail");

        assert!(matches!(
            err,
            NetworkError::AssociationTimeout { attempts: 20, .. }
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        // 21 loop checks plus the final verdict
        assert_eq!(queries.load(Ordering::SeqCst), 22);
    }

    #[tokio::test(start_paused = true)]
    async fn association_on_final_check_counts_as_success() {
        // Loop checks use queries 0..=20, the verdict check is query 21
        let (link, _) = DelayedLink::new(Some(21));

        let result = WifiStation::create(Box::new(link), settings())
            .connect()
            .await;

        assert!(result.is_ok());
    }
}
