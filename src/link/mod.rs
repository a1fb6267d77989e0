//! # Flight Link Module
//!
//! The connection to the drone.
//!
//! This module handles:
//! - The [`FlightLink`] capability set the control core consumes
//! - Tello SDK text protocol constants and state parsing ([`protocol`])
//! - The UDP implementation used in flight ([`tello`])

pub mod protocol;
pub mod tello;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::control::velocity::VelocityVector;
use crate::error::Result;
use crate::telemetry::TelemetrySnapshot;

/// Operations the control core needs from the drone.
///
/// Take-off and landing are slow (several seconds) and must only be awaited
/// from the command worker. `send_velocity` never blocks and is safe to call
/// from the real-time loop.
#[async_trait]
pub trait FlightLink: Send + Sync {
    /// Enter SDK mode and start receiving state
    async fn connect(&self) -> Result<()>;

    /// Start the video stream
    async fn stream_on(&self) -> Result<()>;

    /// Stop the video stream
    async fn stream_off(&self) -> Result<()>;

    /// Remaining battery in percent
    async fn battery(&self) -> Result<u8>;

    /// Take off and hover; returns once the drone reports completion
    async fn take_off(&self) -> Result<()>;

    /// Land; returns once the drone reports completion
    async fn land(&self) -> Result<()>;

    /// Fire-and-forget velocity update
    fn send_velocity(&self, velocity: VelocityVector) -> Result<()>;

    /// Feed of the latest decoded telemetry sample
    fn telemetry(&self) -> watch::Receiver<Option<TelemetrySnapshot>>;

    /// Release the link
    async fn end(&self) -> Result<()>;
}

/// Stop the video stream and release the link.
///
/// Stopping the stream is bounded by `timeout`. Failures are logged and the
/// link is released regardless.
pub async fn close(link: &dyn FlightLink, timeout: Duration) {
    match tokio::time::timeout(timeout, link.stream_off()).await {
        Ok(Ok(())) => debug!("Video stream stopped"),
        Ok(Err(e)) => debug!("Could not stop video stream: {}", e),
        Err(_) => debug!("Video stream stop timed out"),
    }

    if let Err(e) = link.end().await {
        warn!("Failed to close drone link: {}", e);
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::HudError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock flight link for testing
    ///
    /// Records every call by name, so tests can assert on ordering, and can be
    /// told to fail or stall take-off and landing.
    #[derive(Clone)]
    pub struct MockFlightLink {
        pub calls: Arc<Mutex<Vec<&'static str>>>,
        pub velocities: Arc<Mutex<Vec<VelocityVector>>>,
        pub take_off_error: Arc<Mutex<Option<String>>>,
        pub land_error: Arc<Mutex<Option<String>>>,
        pub stream_off_error: Arc<Mutex<Option<String>>>,
        pub command_delay: Arc<Mutex<Duration>>,
        pub telemetry_tx: Arc<watch::Sender<Option<TelemetrySnapshot>>>,
    }

    impl MockFlightLink {
        pub fn new() -> Self {
            let (telemetry_tx, _) = watch::channel(None);
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                velocities: Arc::new(Mutex::new(Vec::new())),
                take_off_error: Arc::new(Mutex::new(None)),
                land_error: Arc::new(Mutex::new(None)),
                stream_off_error: Arc::new(Mutex::new(None)),
                command_delay: Arc::new(Mutex::new(Duration::ZERO)),
                telemetry_tx: Arc::new(telemetry_tx),
            }
        }

        pub fn get_calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        pub fn get_velocities(&self) -> Vec<VelocityVector> {
            self.velocities.lock().unwrap().clone()
        }

        pub fn set_take_off_error(&self, reason: &str) {
            *self.take_off_error.lock().unwrap() = Some(reason.to_string());
        }

        pub fn set_land_error(&self, reason: &str) {
            *self.land_error.lock().unwrap() = Some(reason.to_string());
        }

        pub fn set_stream_off_error(&self, reason: &str) {
            *self.stream_off_error.lock().unwrap() = Some(reason.to_string());
        }

        pub fn set_command_delay(&self, delay: Duration) {
            *self.command_delay.lock().unwrap() = delay;
        }

        pub fn publish(&self, snapshot: TelemetrySnapshot) {
            self.telemetry_tx.send_replace(Some(snapshot));
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        async fn run_command(&self, call: &'static str, error: &Mutex<Option<String>>) -> Result<()> {
            self.record(call);
            let delay = *self.command_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failure = error.lock().unwrap().clone();
            match failure {
                Some(reason) => Err(HudError::Link(reason)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl FlightLink for MockFlightLink {
        async fn connect(&self) -> Result<()> {
            self.record("connect");
            Ok(())
        }

        async fn stream_on(&self) -> Result<()> {
            self.record("stream_on");
            Ok(())
        }

        async fn stream_off(&self) -> Result<()> {
            self.record("stream_off");
            let failure = self.stream_off_error.lock().unwrap().clone();
            match failure {
                Some(reason) => Err(HudError::Link(reason)),
                None => Ok(()),
            }
        }

        async fn battery(&self) -> Result<u8> {
            self.record("battery");
            Ok(87)
        }

        async fn take_off(&self) -> Result<()> {
            self.run_command("take_off", &self.take_off_error).await
        }

        async fn land(&self) -> Result<()> {
            self.run_command("land", &self.land_error).await
        }

        fn send_velocity(&self, velocity: VelocityVector) -> Result<()> {
            self.velocities.lock().unwrap().push(velocity);
            Ok(())
        }

        fn telemetry(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
            self.telemetry_tx.subscribe()
        }

        async fn end(&self) -> Result<()> {
            self.record("end");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockFlightLink;
    use super::*;

    #[tokio::test]
    async fn test_close_stops_stream_then_ends() {
        let mock = MockFlightLink::new();
        close(&mock, Duration::from_millis(100)).await;
        assert_eq!(mock.get_calls(), vec!["stream_off", "end"]);
    }

    #[tokio::test]
    async fn test_close_ends_link_after_stream_off_failure() {
        let mock = MockFlightLink::new();
        mock.set_stream_off_error("no reply");
        close(&mock, Duration::from_millis(100)).await;
        assert_eq!(mock.get_calls(), vec!["stream_off", "end"]);
    }
}
