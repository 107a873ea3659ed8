// Test-only team client for end-to-end relay tests.
//
// Wraps the real `NetClient` (from `pit_engineer_relay::client`) and a
// `SessionView` to provide a synchronous, test-friendly API for exercising
// the full pipeline: client → relay → other clients → view.
//
// The only test-specific code here is the blocking polling wrappers (loops
// around `NetClient::poll()`). All networking uses the same code paths as a
// real team client.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use pit_engineer_protocol::{
    CarDamage, DriverSlot, RainIntensity, SessionType, TelemetrySample, TrackGrip, Wheels,
};
use pit_engineer_relay::{
    ClientConfig, ClientError, ClientEvent, NetClient, OutboundEvent, RelayConfig,
    ServerEndpoints, SessionView,
};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Loopback relay on OS-assigned ports with a short history delay.
pub fn test_relay_config() -> RelayConfig {
    RelayConfig {
        bind_ip: Ipv4Addr::LOCALHOST.into(),
        tcp_port: 0,
        udp_port: 0,
        history_delay_ms: 100,
        tick_ms: 20,
        ..RelayConfig::default()
    }
}

/// Route relay and client logs to the test output. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A full telemetry sample for `driver` on `lap`.
pub fn sample_telemetry(driver: &str, lap: i32) -> TelemetrySample {
    TelemetrySample {
        driver: driver.into(),
        lap,
        fuel: 62.5,
        fuel_per_lap: 2.8,
        fuel_estimated_laps: 22.3,
        pad_wear: Wheels::new(28.1, 28.2, 28.9, 28.9),
        disc_wear: Wheels::new(31.5, 31.5, 31.8, 31.8),
        lap_time: 104_233,
        best_time: 103_870,
        previous_time: 104_502,
        in_pit: false,
        in_pit_lane: false,
        session: SessionType::Race,
        driver_stint_time_left: 2_400_000,
        tyre_pressure: Wheels::new(27.6, 27.5, 27.1, 27.0),
        tyre_temp: Wheels::new(84.0, 83.5, 80.2, 79.9),
        brake_temp: Wheels::new(512.0, 508.0, 390.0, 392.0),
        has_wet_tyres: false,
        session_time_left: 5_400.0,
        grip: TrackGrip::Optimum,
        front_pad: 1,
        rear_pad: 1,
        damage: CarDamage::default(),
        rain: RainIntensity::NoRain,
        suspension_damage: Wheels::default(),
        current_sector_index: 1,
        last_sector_time: 35_120,
        is_lap_valid: true,
        air_temp: 24.0,
        road_temp: 31.0,
    }
}

/// A test team member wrapping a real `NetClient` and the view it feeds.
pub struct TestTeamClient {
    client: NetClient,
    pub view: SessionView,
    pub welcome: String,
}

impl TestTeamClient {
    /// Connect and panic on failure.
    pub fn connect(endpoints: ServerEndpoints, name: &str, driver: i32) -> Self {
        Self::try_connect(endpoints, name, driver, ClientConfig::default())
            .unwrap_or_else(|e| panic!("TestTeamClient::connect({name}) failed: {e}"))
    }

    pub fn try_connect(
        endpoints: ServerEndpoints,
        name: &str,
        driver: i32,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let (client, welcome) =
            NetClient::connect_with(endpoints, name, DriverSlot(driver), config)?;
        Ok(Self {
            client,
            view: SessionView::new(),
            welcome,
        })
    }

    pub fn send(&self, event: OutboundEvent) {
        self.try_send(event).expect("send failed");
    }

    pub fn try_send(&self, event: OutboundEvent) -> Result<(), ClientError> {
        self.client.send(event)
    }

    /// Non-blocking: drain pending events, fold them into the view, and
    /// return them.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let events = self.client.poll();
        self.view.apply_all(&events);
        events
    }

    /// Blocking poll until an event matches. Every event seen is applied to
    /// the view; the matching one is returned.
    pub fn poll_until(&mut self, what: &str, pred: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            let mut found = None;
            for event in self.drain() {
                if found.is_none() && pred(&event) {
                    found = Some(event);
                }
            }
            if let Some(event) = found {
                return event;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until the view satisfies `pred`.
    pub fn poll_until_view(&mut self, what: &str, pred: impl Fn(&SessionView) -> bool) {
        let start = Instant::now();
        loop {
            self.drain();
            if pred(&self.view) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until the roster is exactly `expected`, in join order.
    pub fn poll_until_roster(&mut self, expected: &[(&str, i32)]) {
        self.poll_until_view("roster", |view| {
            view.roster.len() == expected.len()
                && view
                    .roster
                    .iter()
                    .zip(expected)
                    .all(|(entry, (name, driver))| {
                        entry.name == *name && entry.driver == DriverSlot(*driver)
                    })
        });
    }

    /// Keep re-sending `event` until `receiver` sees a match. For the lossy
    /// channel, where a single datagram may legitimately vanish.
    pub fn send_until_received(
        &self,
        event: OutboundEvent,
        receiver: &mut TestTeamClient,
        what: &str,
        pred: impl Fn(&ClientEvent) -> bool,
    ) -> ClientEvent {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            self.send(event.clone());
            thread::sleep(Duration::from_millis(50));
            if let Some(found) = receiver.drain().into_iter().find(|e| pred(e)) {
                return found;
            }
        }
    }

    /// Send Disconnect and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}
