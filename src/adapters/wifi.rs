//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`]: link reachability for the network monitor
//! task and radio power-save control for the time sync engine.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via `esp_idf_svc::wifi`.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## Reconnection policy
//!
//! Connecting never blocks: `connect` only asks the driver to associate and
//! `poll` watches for the interface to come up. A connect that has not
//! completed within [`CONNECT_TIMEOUT_MS`], or a dropped link, waits an
//! exponential backoff (2 s → 4 s → 8 s … capped at 60 s) before retrying.

use core::fmt;
use log::{info, warn};

use crate::app::ports::NetworkPort;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
    AlreadyConnected,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::AlreadyConnected => write!(f, "already connected to AP"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connecting { since_ms: u64 },
    Connected,
    Reconnecting { attempt: u32, retry_at_ms: u64 },
}

const INITIAL_BACKOFF_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 60_000;
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    backoff_ms: u64,
    power_save: bool,
    #[cfg(target_os = "espidf")]
    driver: Option<esp_idf_svc::wifi::EspWifi<'static>>,
    /// Simulation: whether the access point answers.
    #[cfg(not(target_os = "espidf"))]
    sim_ap_reachable: bool,
}

impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiAdapter {
    pub fn new() -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            backoff_ms: INITIAL_BACKOFF_MS,
            // ESP-IDF enables modem sleep by default in station mode.
            power_save: true,
            #[cfg(target_os = "espidf")]
            driver: None,
            #[cfg(not(target_os = "espidf"))]
            sim_ap_reachable: true,
        }
    }

    /// Adapter owning the station driver created in `main`.
    #[cfg(target_os = "espidf")]
    pub fn with_driver(driver: esp_idf_svc::wifi::EspWifi<'static>) -> Self {
        let mut adapter = Self::new();
        adapter.driver = Some(driver);
        adapter
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        self.password.clear();
        self.password.push_str(password).map_err(|_| ConnectivityError::InvalidPassword)?;
        info!("WiFi: credentials updated (SSID='{}')", self.ssid);
        Ok(())
    }

    /// Ask the driver to associate. Completion is observed by [`poll`](Self::poll).
    pub fn connect(&mut self, now_ms: u64) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        if self.state == WifiState::Connected {
            return Err(ConnectivityError::AlreadyConnected);
        }

        info!("WiFi: connecting to '{}'", self.ssid);
        match self.platform_connect() {
            Ok(()) => {
                self.state = WifiState::Connecting { since_ms: now_ms };
                Ok(())
            }
            Err(e) => {
                warn!("WiFi: connect request failed: {}", e);
                self.schedule_retry(0, now_ms);
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.platform_disconnect();
        self.state = WifiState::Disconnected;
        self.backoff_ms = INITIAL_BACKOFF_MS;
        info!("WiFi: disconnected");
    }

    /// Drive the connection state machine. Call from the main loop.
    pub fn poll(&mut self, now_ms: u64) {
        match self.state {
            WifiState::Connecting { since_ms } => {
                if self.platform_link_up() {
                    self.state = WifiState::Connected;
                    self.backoff_ms = INITIAL_BACKOFF_MS;
                    info!("WiFi: connected to '{}'", self.ssid);
                } else if now_ms.saturating_sub(since_ms) >= CONNECT_TIMEOUT_MS {
                    warn!("WiFi: connect timed out after {} ms", CONNECT_TIMEOUT_MS);
                    self.schedule_retry(0, now_ms);
                }
            }
            WifiState::Connected => {
                if !self.platform_link_up() {
                    warn!("WiFi: connection lost, entering reconnect");
                    self.schedule_retry(0, now_ms);
                }
            }
            WifiState::Reconnecting { attempt, retry_at_ms } => {
                if now_ms < retry_at_ms {
                    return;
                }
                info!("WiFi: reconnect attempt {} (backoff {} ms)", attempt + 1, self.backoff_ms);
                match self.platform_connect() {
                    Ok(()) => self.state = WifiState::Connecting { since_ms: now_ms },
                    Err(_) => self.schedule_retry(attempt + 1, now_ms),
                }
            }
            WifiState::Disconnected => {}
        }
    }

    fn schedule_retry(&mut self, attempt: u32, now_ms: u64) {
        let wait = self.backoff_ms;
        self.backoff_ms = (self.backoff_ms * 2).min(MAX_BACKOFF_MS);
        self.state = WifiState::Reconnecting { attempt, retry_at_ms: now_ms + wait };
    }

    /// Simulation: make the access point (un)reachable.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_ap_reachable(&mut self, reachable: bool) {
        self.sim_ap_reachable = reachable;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let Some(driver) = self.driver.as_mut() else {
            return Err(ConnectivityError::ConnectionFailed);
        };
        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: self.ssid.as_str().try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: self.password.as_str().try_into().map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });
        driver.set_configuration(&config).map_err(|e| {
            warn!("WiFi: set_configuration failed: {:?}", e);
            ConnectivityError::ConnectionFailed
        })?;
        if !driver.is_started().unwrap_or(false) {
            driver.start().map_err(|e| {
                warn!("WiFi: start failed: {:?}", e);
                ConnectivityError::ConnectionFailed
            })?;
        }
        driver.connect().map_err(|e| {
            warn!("WiFi: connect failed: {:?}", e);
            ConnectivityError::ConnectionFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        if self.sim_ap_reachable {
            Ok(())
        } else {
            Err(ConnectivityError::ConnectionFailed)
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            let _ = driver.disconnect();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {}

    #[cfg(target_os = "espidf")]
    fn platform_link_up(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| d.is_up().unwrap_or(false))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_link_up(&self) -> bool {
        self.sim_ap_reachable
    }

    #[cfg(target_os = "espidf")]
    fn platform_set_power_save(&mut self, enabled: bool) -> bool {
        use esp_idf_svc::sys::{
            esp_wifi_set_ps, wifi_ps_type_t_WIFI_PS_MIN_MODEM, wifi_ps_type_t_WIFI_PS_NONE, ESP_OK,
        };
        let mode = if enabled { wifi_ps_type_t_WIFI_PS_MIN_MODEM } else { wifi_ps_type_t_WIFI_PS_NONE };
        let ret = unsafe { esp_wifi_set_ps(mode) };
        if ret != ESP_OK as i32 {
            warn!("WiFi: esp_wifi_set_ps failed: {}", ret);
            return false;
        }
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_set_power_save(&mut self, _enabled: bool) -> bool {
        true
    }
}

// ───────────────────────────────────────────────────────────────
// NetworkPort
// ───────────────────────────────────────────────────────────────

impl NetworkPort for WifiAdapter {
    fn is_connected(&self) -> bool {
        self.state == WifiState::Connected && self.platform_link_up()
    }

    fn power_save_enabled(&self) -> bool {
        self.power_save
    }

    fn set_power_save(&mut self, enabled: bool) {
        if self.power_save == enabled {
            return;
        }
        if self.platform_set_power_save(enabled) {
            self.power_save = enabled;
            info!("WiFi: power save {}", if enabled { "on" } else { "off" });
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
