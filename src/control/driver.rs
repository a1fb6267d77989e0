//! # Control Loop
//!
//! The real-time driver: keyboard events in, velocity commands and a
//! composited HUD frame out, once per tick.
//!
//! ## Tick
//!
//! 1. Grab a video frame (none: skip the tick)
//! 2. Sample telemetry (none yet: skip the tick)
//! 3. Stream the current velocity if armed
//! 4. Draw the horizon, attitude readouts, ground alert and proximity alert
//! 5. Log any take-off/landing failures reported by the worker
//!
//! Take-off and landing never run here. Releasing T or L only queues the
//! command on the [`CommandDispatcher`].

use chrono::Local;
use image::imageops::{self, FilterType};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dispatcher::{ArmFlag, CommandDispatcher, FlightCommand, ShutdownReport};
use super::velocity::{VelocityState, VelocityVector};
use crate::config::Config;
use crate::error::{HudError, Result};
use crate::hud::frame::HudFrame;
use crate::hud::ground::GroundProximityAlert;
use crate::hud::horizon::ArtificialHorizonRenderer;
use crate::hud::proximity::{occupancy_ratio, ObstacleProximitySensor};
use crate::hud::{palette, Canvas, Point, TextStyle};
use crate::input::{KeyAction, KeyEvent, KeySymbol};
use crate::link::FlightLink;
use crate::telemetry::TelemetrySampler;
use crate::video::FrameSource;

/// Number of rendered ticks between status log messages
const LOG_INTERVAL_TICKS: u64 = 300;

/// Result of handling one key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Exit,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame or telemetry was available; nothing was streamed or drawn
    Skipped,
    /// A frame was composited. `critical` is the obstacle proximity signal.
    Rendered { critical: bool },
}

/// Per-tick control and HUD driver
pub struct ControlLoop {
    link: Arc<dyn FlightLink>,
    velocity: VelocityState,
    dispatcher: CommandDispatcher,
    arm: ArmFlag,
    failures: UnboundedReceiver<HudError>,
    sampler: TelemetrySampler,
    frames: Box<dyn FrameSource>,
    ground: GroundProximityAlert,
    proximity: ObstacleProximitySensor,
    horizon: ArtificialHorizonRenderer,
    frame_width: u32,
    frame_height: u32,
    tick_period: Duration,
    shutdown_grace: Duration,
    veto_forward: bool,
    obstacle_critical: bool,
    snapshot_dir: Option<PathBuf>,
    last_frame: Option<HudFrame>,
    rendered: u64,
    skipped: u64,
    failures_seen: u64,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("armed", &self.arm.is_armed())
            .field("velocity", &self.velocity.snapshot())
            .field("rendered", &self.rendered)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    /// Build the loop and start the command worker.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherClosed` if the worker's failure channel is unavailable.
    pub fn new(config: &Config, link: Arc<dyn FlightLink>, frames: Box<dyn FrameSource>) -> Result<Self> {
        let mut dispatcher = CommandDispatcher::new(Arc::clone(&link));
        let failures = dispatcher.take_failures().ok_or(HudError::DispatcherClosed)?;
        let arm = dispatcher.arm_flag();
        let sampler = TelemetrySampler::new(link.telemetry());

        let video = &config.video;
        let hud = &config.hud;
        let snapshot_dir = (!hud.snapshot_dir.is_empty()).then(|| PathBuf::from(&hud.snapshot_dir));

        Ok(Self {
            link,
            velocity: VelocityState::new(config.control.speed),
            dispatcher,
            arm,
            failures,
            sampler,
            frames,
            ground: GroundProximityAlert::new(
                hud.critical_height_dm,
                hud.warning_height_dm,
                hud.blink_period_ticks,
            ),
            proximity: ObstacleProximitySensor::new(video.width, video.height, hud.danger_threshold),
            horizon: ArtificialHorizonRenderer::new(
                video.width,
                video.height,
                hud.horizon_size,
                hud.horizon_margin,
                hud.pitch_scale,
                hud.boot_banner_frames,
            ),
            frame_width: video.width,
            frame_height: video.height,
            tick_period: config.control.tick_period(),
            shutdown_grace: config.control.shutdown_grace(),
            veto_forward: config.control.veto_forward_on_obstacle,
            obstacle_critical: false,
            snapshot_dir,
            last_frame: None,
            rendered: 0,
            skipped: 0,
            failures_seen: 0,
        })
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.arm.is_armed()
    }

    /// Current commanded velocity
    #[must_use]
    pub fn velocity(&self) -> VelocityVector {
        self.velocity.snapshot()
    }

    /// Most recently composited frame
    #[must_use]
    pub fn last_frame(&self) -> Option<&HudFrame> {
        self.last_frame.as_ref()
    }

    /// Number of worker failures logged so far
    #[must_use]
    pub fn failures_seen(&self) -> u64 {
        self.failures_seen
    }

    /// Apply one keyboard event.
    ///
    /// Motion keys act on press and release. T and L queue take-off and landing
    /// on release. Escape exits on press.
    pub fn handle_key(&mut self, event: KeyEvent) -> KeyOutcome {
        match (event.action, event.key) {
            (KeyAction::Down, KeySymbol::Escape) => {
                info!("Escape pressed");
                return KeyOutcome::Exit;
            }
            (KeyAction::Down, key) => self.velocity.on_key_down(key),
            (KeyAction::Up, KeySymbol::T) => self.queue(FlightCommand::TakeOff),
            (KeyAction::Up, KeySymbol::L) => self.queue(FlightCommand::Land),
            (KeyAction::Up, key) => self.velocity.on_key_up(key),
        }
        KeyOutcome::Continue
    }

    fn queue(&self, command: FlightCommand) {
        match self.dispatcher.enqueue(command) {
            Ok(()) => info!("{} requested", command),
            Err(e) => error!("Cannot queue {}: {}", command, e),
        }
    }

    /// Run one tick of the control loop.
    ///
    /// # Errors
    ///
    /// Returns `Render` if a HUD surface cannot be allocated.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.drain_failures();

        let Some(image) = self.frames.next_frame() else {
            self.skip("no video frame");
            return Ok(TickOutcome::Skipped);
        };
        let Some(telemetry) = self.sampler.sample() else {
            self.skip("no telemetry");
            return Ok(TickOutcome::Skipped);
        };

        let image = if image.dimensions() == (self.frame_width, self.frame_height) {
            image
        } else {
            imageops::resize(&image, self.frame_width, self.frame_height, FilterType::Triangle)
        };

        if self.arm.is_armed() {
            let mut velocity = self.velocity.snapshot();
            if self.veto_forward && self.obstacle_critical {
                velocity = velocity.without_forward();
            }
            if let Err(e) = self.link.send_velocity(velocity) {
                debug!("Failed to send velocity: {}", e);
            }
        }

        let mut frame = HudFrame::from_rgb(&image)?;

        self.horizon.draw(&mut frame, telemetry.roll, telemetry.pitch)?;

        let readout = TextStyle::new(palette::GREEN, 0.8, 2);
        frame.text(&format!("Roll: {:.1}", telemetry.roll), Point::new(10.0, 30.0), readout);
        frame.text(&format!("Pitch: {:.1}", telemetry.pitch), Point::new(10.0, 60.0), readout);

        self.ground.update_and_draw(&mut frame, telemetry.height_dm);

        let reading = self.proximity.evaluate(occupancy_ratio(&image, self.proximity.roi()));
        self.proximity.draw(&mut frame, &reading);
        if reading.entered_critical {
            warn!("Obstacle ahead: {:.0}% of view blocked", reading.danger_level * 100.0);
        }
        self.obstacle_critical = reading.critical;

        self.last_frame = Some(frame);
        self.rendered += 1;
        if self.rendered % LOG_INTERVAL_TICKS == 0 {
            info!(
                "Rendered {} frames ({} skipped), armed: {}, height {:.1} m",
                self.rendered,
                self.skipped,
                self.arm.is_armed(),
                telemetry.height_m()
            );
        }

        Ok(TickOutcome::Rendered {
            critical: reading.critical,
        })
    }

    fn skip(&mut self, reason: &str) {
        self.skipped += 1;
        debug!("Tick skipped: {}", reason);
    }

    fn drain_failures(&mut self) {
        while let Ok(failure) = self.failures.try_recv() {
            self.failures_seen += 1;
            error!("{}", failure);
        }
    }

    /// Run until Escape, Ctrl+C or the key channel closing.
    ///
    /// # Errors
    ///
    /// Returns `Render` if a HUD surface cannot be allocated.
    pub async fn run(&mut self, mut keys: UnboundedReceiver<KeyEvent>) -> Result<()> {
        let mut ticker = interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Control loop running every {:?}", self.tick_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick()?;
                }

                key = keys.recv() => match key {
                    Some(event) => {
                        if self.handle_key(event) == KeyOutcome::Exit {
                            break;
                        }
                    }
                    None => {
                        warn!("Keyboard channel closed");
                        break;
                    }
                },

                // Handle Ctrl+C for graceful shutdown
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }
            }
        }

        info!("Control loop stopped after {} frames", self.rendered);
        Ok(())
    }

    /// Write the last composited frame to the snapshot directory.
    ///
    /// Returns the written path, or `None` when snapshots are disabled or no
    /// frame has been rendered.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Image` if the directory or file cannot be written.
    pub fn save_snapshot(&self) -> Result<Option<PathBuf>> {
        let (Some(dir), Some(frame)) = (&self.snapshot_dir, &self.last_frame) else {
            return Ok(None);
        };

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("hud-{}.png", Local::now().format("%Y%m%d-%H%M%S")));
        frame.save_png(&path)?;
        info!("Saved HUD snapshot to {}", path.display());
        Ok(Some(path))
    }

    /// Save a snapshot if configured, then land if airborne and close the link.
    pub async fn shutdown(mut self) -> ShutdownReport {
        if let Err(e) = self.save_snapshot() {
            warn!("Failed to save HUD snapshot: {}", e);
        }

        self.velocity.reset();
        let report = self.dispatcher.shutdown(self.shutdown_grace).await;

        while let Ok(failure) = self.failures.try_recv() {
            error!("{}", failure);
        }
        info!(
            "Shutdown complete (land requested: {}, timed out: {})",
            report.land_requested, report.timed_out
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mocks::MockFlightLink;
    use crate::telemetry::TelemetrySnapshot;
    use crate::video::{BlankFrameSource, MockFrameSource};
    use image::{Rgb, RgbImage};
    use std::time::Instant;
    use tokio::sync::mpsc;

    const LEVEL: TelemetrySnapshot = TelemetrySnapshot {
        roll: 0.0,
        pitch: 0.0,
        height_dm: 20,
    };

    fn test_config() -> Config {
        let mut config = Config::default();
        config.control.shutdown_grace_ms = 200;
        config
    }

    fn blank() -> Box<dyn FrameSource> {
        Box::new(BlankFrameSource::new(960, 720, 128))
    }

    fn dark() -> Box<dyn FrameSource> {
        Box::new(BlankFrameSource::new(960, 720, 5))
    }

    fn control_loop(config: &Config, mock: &MockFlightLink, frames: Box<dyn FrameSource>) -> ControlLoop {
        ControlLoop::new(config, Arc::new(mock.clone()), frames).unwrap()
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn take_off(control: &mut ControlLoop) {
        control.handle_key(KeyEvent::down(KeySymbol::T));
        control.handle_key(KeyEvent::up(KeySymbol::T));
        let arm = control.arm.clone();
        wait_until(move || arm.is_armed()).await;
    }

    #[tokio::test]
    async fn test_tick_skipped_without_frame() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut frames = MockFrameSource::new();
        frames.expect_next_frame().returning(|| None);

        let mut control = control_loop(&test_config(), &mock, Box::new(frames));
        assert_eq!(control.tick().unwrap(), TickOutcome::Skipped);
        assert!(control.last_frame().is_none());
    }

    #[tokio::test]
    async fn test_tick_skipped_without_telemetry() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        assert_eq!(control.tick().unwrap(), TickOutcome::Skipped);
        assert!(control.last_frame().is_none());
    }

    #[tokio::test]
    async fn test_tick_renders_full_hud() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, blank());

        assert_eq!(control.tick().unwrap(), TickOutcome::Rendered { critical: false });

        let frame = control.last_frame().unwrap();
        assert!(frame.has_text("Roll: 0.0"));
        assert!(frame.has_text("Pitch: 0.0"));
        assert!(frame.has_text("Altitude: 2.0 m"));
        assert!(frame.has_text("Proximity: 0%"));
        assert!(frame.has_text("HUD SYSTEM ONLINE"));
    }

    #[tokio::test]
    async fn test_tick_resizes_mismatched_frames() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut frames = MockFrameSource::new();
        frames
            .expect_next_frame()
            .returning(|| Some(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]))));

        let mut control = control_loop(&test_config(), &mock, Box::new(frames));
        control.tick().unwrap();

        let frame = control.last_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (960, 720));
    }

    #[tokio::test]
    async fn test_ground_alert_follows_height() {
        let mock = MockFlightLink::new();
        mock.publish(TelemetrySnapshot { height_dm: 5, ..LEVEL });
        let mut control = control_loop(&test_config(), &mock, blank());

        control.tick().unwrap();
        assert!(control.last_frame().unwrap().has_text("LOW ALTITUDE: 0.5 m"));
    }

    #[tokio::test]
    async fn test_velocity_not_streamed_while_disarmed() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, blank());

        control.handle_key(KeyEvent::down(KeySymbol::W));
        control.tick().unwrap();

        assert_eq!(control.velocity().forward_back, 60);
        assert!(mock.get_velocities().is_empty());
    }

    #[tokio::test]
    async fn test_velocity_streamed_after_take_off() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, blank());

        take_off(&mut control).await;
        control.handle_key(KeyEvent::down(KeySymbol::W));
        control.handle_key(KeyEvent::down(KeySymbol::Q));
        control.tick().unwrap();

        let sent = mock.get_velocities();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].forward_back, 60);
        assert_eq!(sent[0].yaw, -60);
    }

    #[tokio::test]
    async fn test_velocity_not_streamed_on_skipped_tick() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        take_off(&mut control).await;
        control.handle_key(KeyEvent::down(KeySymbol::W));
        assert_eq!(control.tick().unwrap(), TickOutcome::Skipped);
        assert!(mock.get_velocities().is_empty());
    }

    #[tokio::test]
    async fn test_take_off_and_land_are_queued_on_release() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        control.handle_key(KeyEvent::down(KeySymbol::T));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mock.get_calls().contains(&"take_off"));

        take_off(&mut control).await;
        assert!(control.is_armed());

        control.handle_key(KeyEvent::up(KeySymbol::L));
        let arm = control.arm.clone();
        wait_until(move || !arm.is_armed()).await;
        assert_eq!(mock.get_calls(), vec!["take_off", "land"]);
    }

    #[tokio::test]
    async fn test_key_release_stops_axis() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        control.handle_key(KeyEvent::down(KeySymbol::D));
        assert_eq!(control.velocity().left_right, 60);
        control.handle_key(KeyEvent::up(KeySymbol::D));
        assert!(control.velocity().is_zero());
    }

    #[tokio::test]
    async fn test_escape_exits() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        assert_eq!(control.handle_key(KeyEvent::up(KeySymbol::Escape)), KeyOutcome::Continue);
        assert_eq!(control.handle_key(KeyEvent::down(KeySymbol::Escape)), KeyOutcome::Exit);
    }

    #[tokio::test]
    async fn test_take_off_failure_is_drained_and_counted() {
        let mock = MockFlightLink::new();
        mock.set_take_off_error("Motor stop");
        let mut control = control_loop(&test_config(), &mock, blank());

        control.handle_key(KeyEvent::up(KeySymbol::T));
        let calls = mock.clone();
        wait_until(move || calls.get_calls().contains(&"take_off")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        control.tick().unwrap();
        assert_eq!(control.failures_seen(), 1);
        assert!(!control.is_armed());
    }

    #[tokio::test]
    async fn test_dark_frame_is_critical() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, dark());

        assert_eq!(control.tick().unwrap(), TickOutcome::Rendered { critical: true });
        assert!(control.last_frame().unwrap().has_text("CRITICAL ALERT!"));
    }

    #[tokio::test]
    async fn test_forward_veto_on_obstacle() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut config = test_config();
        config.control.veto_forward_on_obstacle = true;
        let mut control = control_loop(&config, &mock, dark());

        take_off(&mut control).await;
        control.handle_key(KeyEvent::down(KeySymbol::W));
        control.tick().unwrap();
        control.tick().unwrap();

        let sent = mock.get_velocities();
        assert_eq!(sent.len(), 2);
        // First tick has no reading yet
        assert_eq!(sent[0].forward_back, 60);
        assert_eq!(sent[1].forward_back, 0);
    }

    #[tokio::test]
    async fn test_no_veto_by_default() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, dark());

        take_off(&mut control).await;
        control.handle_key(KeyEvent::down(KeySymbol::W));
        control.tick().unwrap();
        control.tick().unwrap();

        assert!(mock.get_velocities().iter().all(|v| v.forward_back == 60));
    }

    #[tokio::test]
    async fn test_run_exits_on_escape() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, blank());

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(KeyEvent::down(KeySymbol::W)).unwrap();
        tx.send(KeyEvent::down(KeySymbol::Escape)).unwrap();

        tokio::time::timeout(Duration::from_secs(2), control.run(rx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(control.velocity().forward_back, 60);
    }

    #[tokio::test]
    async fn test_run_exits_when_keyboard_closes() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());

        let (tx, rx) = mpsc::unbounded_channel::<KeyEvent>();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), control.run(rx))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lands_when_armed() {
        let mock = MockFlightLink::new();
        let mut control = control_loop(&test_config(), &mock, blank());
        take_off(&mut control).await;

        let report = control.shutdown().await;
        assert!(report.land_requested);
        assert!(!report.timed_out);
        assert_eq!(mock.get_calls(), vec!["take_off", "land", "stream_off", "end"]);
    }

    #[tokio::test]
    async fn test_shutdown_while_grounded_does_not_land() {
        let mock = MockFlightLink::new();
        let control = control_loop(&test_config(), &mock, blank());

        let report = control.shutdown().await;
        assert!(!report.land_requested);
        assert_eq!(mock.get_calls(), vec!["stream_off", "end"]);
    }

    #[tokio::test]
    async fn test_snapshot_written_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut config = test_config();
        config.hud.snapshot_dir = dir.path().join("shots").to_string_lossy().into_owned();

        let mut control = control_loop(&config, &mock, blank());
        control.tick().unwrap();
        control.shutdown().await;

        let written: Vec<_> = std::fs::read_dir(dir.path().join("shots"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with("hud-"));
        assert!(written[0].ends_with(".png"));
    }

    #[tokio::test]
    async fn test_no_snapshot_without_frame_or_dir() {
        let mock = MockFlightLink::new();
        mock.publish(LEVEL);
        let mut control = control_loop(&test_config(), &mock, blank());
        control.tick().unwrap();
        assert_eq!(control.save_snapshot().unwrap(), None);

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.hud.snapshot_dir = dir.path().to_string_lossy().into_owned();
        let control = control_loop(&config, &mock, blank());
        assert_eq!(control.save_snapshot().unwrap(), None);
    }
}
