//! # Tello UDP Link
//!
//! [`FlightLink`] over the Tello SDK text protocol.
//!
//! Requests are sent from one connected UDP socket and answered on the same
//! socket. Only one request/reply exchange runs at a time; `rc` velocity
//! updates bypass the exchange lock because the drone never answers them.
//! State datagrams arrive on a second socket and are decoded by a background
//! task into the telemetry feed.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{
    check_ok, encode_rc, parse_battery, parse_state, CMD_BATTERY, CMD_LAND, CMD_SDK_MODE,
    CMD_STREAM_OFF, CMD_STREAM_ON, CMD_TAKEOFF, MAX_DATAGRAM_SIZE,
};
use super::FlightLink;
use crate::config::LinkConfig;
use crate::control::velocity::VelocityVector;
use crate::error::{HudError, Result};
use crate::telemetry::TelemetrySnapshot;

/// Upper bound for one SDK-mode handshake attempt
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tello connection
pub struct TelloLink {
    socket: UdpSocket,
    exchange: Mutex<()>,
    response_timeout: Duration,
    connect_retries: u32,
    state_addr: String,
    telemetry_tx: Arc<watch::Sender<Option<TelemetrySnapshot>>>,
    state_listener: std::sync::Mutex<Option<(SocketAddr, JoinHandle<()>)>>,
}

impl std::fmt::Debug for TelloLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelloLink")
            .field("peer", &self.socket.peer_addr().ok())
            .field("state_addr", &self.state_addr)
            .finish_non_exhaustive()
    }
}

impl TelloLink {
    /// Bind the command socket and point it at the drone
    ///
    /// # Errors
    ///
    /// Returns `LinkConnection` if the local address cannot be bound or the
    /// drone address is unusable.
    pub async fn bind(config: &LinkConfig) -> Result<Self> {
        let socket = UdpSocket::bind(&config.local_addr).await.map_err(|e| {
            HudError::LinkConnection(format!("Failed to bind {}: {}", config.local_addr, e))
        })?;

        socket.connect(&config.drone_addr).await.map_err(|e| {
            HudError::LinkConnection(format!("Failed to reach {}: {}", config.drone_addr, e))
        })?;

        info!("Command socket bound to {}, drone at {}", config.local_addr, config.drone_addr);

        let (telemetry_tx, _) = watch::channel(None);

        Ok(Self {
            socket,
            exchange: Mutex::new(()),
            response_timeout: config.response_timeout(),
            connect_retries: config.connect_retries,
            state_addr: config.state_addr.clone(),
            telemetry_tx: Arc::new(telemetry_tx),
            state_listener: std::sync::Mutex::new(None),
        })
    }

    /// Address the state listener is bound to, once connected
    pub fn state_local_addr(&self) -> Option<SocketAddr> {
        self.state_listener
            .lock()
            .ok()
            .and_then(|listener| listener.as_ref().map(|(addr, _)| *addr))
    }

    /// Send one request and wait for its reply
    async fn request(&self, command: &str, timeout: Duration) -> Result<String> {
        let _exchange = self.exchange.lock().await;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        // Replies to earlier requests that timed out
        while let Ok(n) = self.socket.try_recv(&mut buf) {
            debug!("Discarding stale reply: {}", String::from_utf8_lossy(&buf[..n]).trim());
        }

        self.socket
            .send(command.as_bytes())
            .await
            .map_err(|e| HudError::Link(format!("Failed to send '{}': {}", command, e)))?;

        let n = tokio::time::timeout(timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| HudError::Link(format!("No reply to '{}' within {:?}", command, timeout)))?
            .map_err(|e| HudError::Link(format!("Failed to read reply to '{}': {}", command, e)))?;

        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        debug!("'{}' -> '{}'", command, reply);
        Ok(reply)
    }

    /// Send a request that must be acknowledged with `ok`
    async fn command(&self, command: &str, timeout: Duration) -> Result<()> {
        let reply = self.request(command, timeout).await?;
        check_ok(command, &reply)
    }

    async fn start_state_listener(&self) -> Result<()> {
        let socket = UdpSocket::bind(&self.state_addr).await.map_err(|e| {
            HudError::LinkConnection(format!("Failed to bind state port {}: {}", self.state_addr, e))
        })?;
        let local_addr = socket.local_addr()?;
        let tx = Arc::clone(&self.telemetry_tx);

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, _)) => match parse_state(&String::from_utf8_lossy(&buf[..n])) {
                        Ok(snapshot) => {
                            tx.send_replace(Some(snapshot));
                        }
                        Err(e) => debug!("Ignoring state datagram: {}", e),
                    },
                    Err(e) => {
                        warn!("State socket failed, telemetry stopped: {}", e);
                        break;
                    }
                }
            }
        });

        info!("Listening for drone state on {}", local_addr);

        if let Ok(mut listener) = self.state_listener.lock() {
            if let Some((_, previous)) = listener.replace((local_addr, handle)) {
                previous.abort();
            }
        }
        Ok(())
    }

    fn stop_state_listener(&self) {
        if let Ok(mut listener) = self.state_listener.lock() {
            if let Some((_, handle)) = listener.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl FlightLink for TelloLink {
    async fn connect(&self) -> Result<()> {
        let timeout = CONNECT_ATTEMPT_TIMEOUT.min(self.response_timeout);

        for attempt in 1..=self.connect_retries {
            match self.command(CMD_SDK_MODE, timeout).await {
                Ok(()) => {
                    info!("Drone entered SDK mode");
                    return self.start_state_listener().await;
                }
                Err(e) => warn!("SDK mode attempt {}/{} failed: {}", attempt, self.connect_retries, e),
            }
        }

        Err(HudError::LinkConnection(format!(
            "drone did not acknowledge SDK mode after {} attempts",
            self.connect_retries
        )))
    }

    async fn stream_on(&self) -> Result<()> {
        self.command(CMD_STREAM_ON, self.response_timeout).await
    }

    async fn stream_off(&self) -> Result<()> {
        self.command(CMD_STREAM_OFF, self.response_timeout).await
    }

    async fn battery(&self) -> Result<u8> {
        let reply = self.request(CMD_BATTERY, self.response_timeout).await?;
        parse_battery(&reply)
    }

    async fn take_off(&self) -> Result<()> {
        self.command(CMD_TAKEOFF, self.response_timeout).await
    }

    async fn land(&self) -> Result<()> {
        self.command(CMD_LAND, self.response_timeout).await
    }

    fn send_velocity(&self, velocity: VelocityVector) -> Result<()> {
        self.socket
            .try_send(encode_rc(velocity).as_bytes())
            .map(|_| ())
            .map_err(|e| HudError::Link(format!("Failed to send rc: {}", e)))
    }

    fn telemetry(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.telemetry_tx.subscribe()
    }

    async fn end(&self) -> Result<()> {
        self.stop_state_listener();
        info!("Drone link closed");
        Ok(())
    }
}
