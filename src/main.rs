//! Fish feeder firmware: main entry point.
//!
//! Hexagonal architecture driven by a cooperative, non-blocking main loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  Ds3231 (Clock)    StepperMotor (Actuator)   NvsAdapter        │
//! │  WifiAdapter       SntpTransport             HttpTimeClient    │
//! │  LedIndicator      LogEventSink              ButtonDriver      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              FeederService (pure logic)                │    │
//! │  │  Scheduler · Schedule · Arbiter · TimeSync · Status    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::{Context, Result};
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::wifi::EspWifi;

use fishfeeder::adapters::http_time::HttpTimeClient;
use fishfeeder::adapters::log_sink::LogEventSink;
use fishfeeder::adapters::nvs::NvsAdapter;
use fishfeeder::adapters::rtc::Ds3231;
use fishfeeder::adapters::sntp::SntpTransport;
use fishfeeder::adapters::time::Esp32TimeAdapter;
use fishfeeder::adapters::wifi::WifiAdapter;
use fishfeeder::app::ports::{ConfigError, ConfigPort};
use fishfeeder::app::service::{FeederService, ServicePorts};
use fishfeeder::config::FeederConfig;
use fishfeeder::drivers::button::ButtonDriver;
use fishfeeder::drivers::hw_init;
use fishfeeder::drivers::status_led::LedIndicator;
use fishfeeder::drivers::stepper::StepperMotor;
use fishfeeder::pins;

/// Main loop period. Well under the 10 ms motor task interval.
const LOOP_DELAY_MS: u32 = 2;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  FishFeeder v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. One-shot peripherals (LED, button ISR) ─────────────
    if let Err(e) = hw_init::init_peripherals() {
        // Status LED and button are optional; feeding still works.
        error!("HAL init failed: {}, continuing without LED/button", e);
    }
    if let Err(e) = hw_init::init_isr_service() {
        error!("ISR service init failed: {}, continuing without button", e);
    }

    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sys_loop = EspSystemEventLoop::take().context("system event loop unavailable")?;
    let time = Esp32TimeAdapter::new();

    // ── 3. Persistent storage + config ────────────────────────
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(ConfigError::NotFound) => {
            info!("No stored config, using defaults");
            FeederConfig::default()
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            FeederConfig::default()
        }
    };

    // ── 4. Construct adapters ─────────────────────────────────
    // SAFETY: each GPIO below is claimed exactly once, here.
    let coil = |gpio: i32| PinDriver::output(unsafe { AnyOutputPin::new(gpio) });
    let stepper = StepperMotor::new([
        coil(pins::STEPPER_IN1_GPIO)?,
        coil(pins::STEPPER_IN2_GPIO)?,
        coil(pins::STEPPER_IN3_GPIO)?,
        coil(pins::STEPPER_IN4_GPIO)?,
    ]);

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        unsafe { AnyIOPin::new(pins::I2C_SDA_GPIO) },
        unsafe { AnyIOPin::new(pins::I2C_SCL_GPIO) },
        &I2cConfig::new().baudrate(pins::I2C_FREQ_HZ.Hz()),
    )
    .context("I2C init failed")?;
    let mut rtc = Ds3231::new(i2c);
    match rtc.lost_power() {
        Ok(true) => warn!("RTC oscillator stopped since last set; time is invalid until sync"),
        Ok(false) => {}
        Err(e) => warn!("RTC status read failed: {}", e),
    }

    let esp_wifi = EspWifi::new(peripherals.modem, sys_loop, None).context("WiFi driver init failed")?;
    let mut wifi = WifiAdapter::with_driver(esp_wifi);
    match (option_env!("WIFI_SSID"), option_env!("WIFI_PASS")) {
        (Some(ssid), pass) => {
            if let Err(e) = wifi.set_credentials(ssid, pass.unwrap_or("")) {
                warn!("WiFi credentials rejected: {}", e);
            } else if let Err(e) = wifi.connect(time.uptime_ms()) {
                warn!("WiFi connect failed: {}, will retry", e);
            }
        }
        (None, _) => warn!("WIFI_SSID not set at build time; running offline on the RTC"),
    }

    let mut ntp = SntpTransport::new();
    let mut http = HttpTimeClient::new();
    let mut led = LedIndicator::new();
    let mut sink = LogEventSink::new();
    let mut button = ButtonDriver::new(pins::BUTTON_GPIO);

    // ── 5. Service ────────────────────────────────────────────
    let mut service = FeederService::new(config, stepper, &mut nvs);
    {
        let mut io = ServicePorts {
            clock: &mut rtc,
            network: &mut wifi,
            ntp: &mut ntp,
            http: &mut http,
            storage: &mut nvs,
            indicator: &mut led,
            sink: &mut sink,
        };
        service.start(&mut io);
    }

    info!("System ready. Entering main loop.");

    // ── 6. Main loop ──────────────────────────────────────────
    let mut last_ms = time.uptime_ms();
    loop {
        let now_ms = time.uptime_ms();

        wifi.poll(now_ms);
        let button_event = button.tick(now_ms as u32);

        {
            let mut io = ServicePorts {
                clock: &mut rtc,
                network: &mut wifi,
                ntp: &mut ntp,
                http: &mut http,
                storage: &mut nvs,
                indicator: &mut led,
                sink: &mut sink,
            };
            if let Some(event) = button_event {
                service.on_button(event, now_ms, &mut io);
            }
            service.tick(now_ms, &mut io);
        }

        led.render(now_ms.saturating_sub(last_ms) as u32);
        service.auto_save_if_needed(now_ms, &nvs);
        last_ms = now_ms;

        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}
