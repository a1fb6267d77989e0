//! # Command Dispatcher
//!
//! Runs blocking flight commands (take-off, land) on a dedicated worker task so
//! the real-time control loop never waits on them.
//!
//! ## Worker State Machine
//!
//! ```text
//!  Idle --recv--> Executing --ok--> (update arm flag) --> Idle
//!                     |
//!                     +----err--> (report failure, arm flag unchanged) --> Idle
//! ```
//!
//! Commands are executed one at a time in submission order. A failed command is
//! dropped, reported on the failure channel and the worker moves on to the next
//! queued entry.
//!
//! The armed flag is the only state written by the worker and read by the
//! control loop; it is an `AtomicBool` behind [`ArmFlag`], which exposes reads
//! only.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{HudError, Result};
use crate::link::{self, FlightLink};

/// A slow flight operation executed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightCommand {
    TakeOff,
    Land,
}

impl fmt::Display for FlightCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightCommand::TakeOff => write!(f, "Take-off"),
            FlightCommand::Land => write!(f, "Landing"),
        }
    }
}

/// Read-only view of the armed flag.
///
/// `true` only between a completed take-off and the next completed (or forced)
/// landing.
#[derive(Debug, Clone)]
pub struct ArmFlag(Arc<AtomicBool>);

impl ArmFlag {
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of [`CommandDispatcher::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// A landing was queued because the vehicle was armed
    pub land_requested: bool,
    /// The queue did not drain within the grace period and the worker was stopped
    pub timed_out: bool,
}

/// Single-consumer queue of flight commands plus the worker that drains it.
///
/// Must be created inside a tokio runtime.
pub struct CommandDispatcher {
    queue: UnboundedSender<FlightCommand>,
    armed: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    failures: Option<UnboundedReceiver<HudError>>,
    link: Arc<dyn FlightLink>,
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("armed", &self.armed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    /// Spawn the worker and return the dispatcher feeding it.
    pub fn new(link: Arc<dyn FlightLink>) -> Self {
        let (queue, commands) = mpsc::unbounded_channel();
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            Arc::clone(&link),
            commands,
            Arc::clone(&armed),
            failures_tx,
        ));

        Self {
            queue,
            armed,
            worker,
            failures: Some(failures),
            link,
        }
    }

    /// Queue a command; never blocks.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherClosed` if the worker has stopped.
    pub fn enqueue(&self, command: FlightCommand) -> Result<()> {
        debug!("Queueing {}", command);
        self.queue.send(command).map_err(|_| HudError::DispatcherClosed)
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Shareable read-only handle to the armed flag
    #[must_use]
    pub fn arm_flag(&self) -> ArmFlag {
        ArmFlag(Arc::clone(&self.armed))
    }

    /// Take the receiving end of the failure channel.
    ///
    /// Every `CommandExecution` error is delivered here once. Returns `None`
    /// after the first call.
    pub fn take_failures(&mut self) -> Option<UnboundedReceiver<HudError>> {
        self.failures.take()
    }

    /// Land if airborne, drain the queue for at most `grace`, then end the link.
    ///
    /// After a landing request the link is held open for the full grace period
    /// even if the landing reports completion early. When the grace period runs
    /// out the worker is stopped, the vehicle is considered disarmed and the link
    /// is terminated regardless.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        let Self {
            queue,
            armed,
            mut worker,
            link,
            ..
        } = self;

        let deadline = tokio::time::Instant::now() + grace;
        let land_requested = armed.load(Ordering::Acquire);
        if land_requested {
            info!("Still armed at shutdown, requesting landing");
            if queue.send(FlightCommand::Land).is_err() {
                warn!("Command worker already stopped, cannot queue landing");
            }
        }

        // Closing the queue lets the worker exit once it is empty
        drop(queue);

        let timed_out = match tokio::time::timeout_at(deadline, &mut worker).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!("Command worker ended abnormally: {}", e);
                false
            }
            Err(_) => {
                warn!("{}, forcing link termination", HudError::TeardownTimeout(grace));
                worker.abort();
                armed.store(false, Ordering::Release);
                true
            }
        };

        if land_requested && !timed_out {
            debug!("Landing finished early, holding the link until the grace period ends");
            tokio::time::sleep_until(deadline).await;
        }

        link::close(link.as_ref(), grace).await;

        ShutdownReport {
            land_requested,
            timed_out,
        }
    }
}

async fn run_worker(
    link: Arc<dyn FlightLink>,
    mut commands: UnboundedReceiver<FlightCommand>,
    armed: Arc<AtomicBool>,
    failures: UnboundedSender<HudError>,
) {
    while let Some(command) = commands.recv().await {
        info!("Worker: executing {}", command);

        let result = match command {
            FlightCommand::TakeOff => link.take_off().await,
            FlightCommand::Land => link.land().await,
        };

        match result {
            Ok(()) => {
                armed.store(command == FlightCommand::TakeOff, Ordering::Release);
                info!("Worker: {} completed", command);
            }
            Err(e) => {
                let failure = HudError::CommandExecution {
                    command,
                    reason: e.to_string(),
                };
                error!("Worker: {}", failure);
                // Nobody listening is fine; the failure is already logged
                let _ = failures.send(failure);
            }
        }
    }

    debug!("Command queue closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mocks::MockFlightLink;
    use std::time::Instant;

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn dispatcher_with(mock: &MockFlightLink) -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_take_off_arms() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);
        assert!(!dispatcher.is_armed());

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| dispatcher.is_armed()).await;
        assert_eq!(mock.get_calls(), vec!["take_off"]);
    }

    #[tokio::test]
    async fn test_land_disarms() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);
        let flag = dispatcher.arm_flag();

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| flag.is_armed()).await;

        dispatcher.enqueue(FlightCommand::Land).unwrap();
        wait_until(|| !flag.is_armed()).await;
        assert_eq!(mock.get_calls(), vec!["take_off", "land"]);
    }

    #[tokio::test]
    async fn test_failed_take_off_is_reported_and_worker_continues() {
        let mock = MockFlightLink::new();
        mock.set_take_off_error("Motor stop");
        let mut dispatcher = dispatcher_with(&mock);
        let mut failures = dispatcher.take_failures().unwrap();
        assert!(dispatcher.take_failures().is_none());

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();

        match failure {
            HudError::CommandExecution { command, reason } => {
                assert_eq!(command, FlightCommand::TakeOff);
                assert!(reason.contains("Motor stop"));
            }
            other => panic!("Expected CommandExecution, got: {:?}", other),
        }
        assert!(!dispatcher.is_armed());

        // The worker keeps serving the queue
        dispatcher.enqueue(FlightCommand::Land).unwrap();
        wait_until(|| mock.get_calls().len() == 2).await;
        assert_eq!(mock.get_calls(), vec!["take_off", "land"]);
    }

    #[tokio::test]
    async fn test_failed_land_keeps_armed() {
        let mock = MockFlightLink::new();
        let mut dispatcher = dispatcher_with(&mock);
        let mut failures = dispatcher.take_failures().unwrap();

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| dispatcher.is_armed()).await;

        mock.set_land_error("No valid imu");
        dispatcher.enqueue(FlightCommand::Land).unwrap();
        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap();
        assert!(matches!(
            failure,
            Some(HudError::CommandExecution { command: FlightCommand::Land, .. })
        ));
        assert!(dispatcher.is_armed());
    }

    #[tokio::test]
    async fn test_commands_run_in_submission_order() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);

        for command in [
            FlightCommand::TakeOff,
            FlightCommand::Land,
            FlightCommand::TakeOff,
            FlightCommand::Land,
        ] {
            dispatcher.enqueue(command).unwrap();
        }

        let report = dispatcher.shutdown(Duration::from_secs(2)).await;
        assert!(!report.land_requested);
        assert!(!report.timed_out);
        assert_eq!(
            mock.get_calls(),
            vec!["take_off", "land", "take_off", "land", "stream_off", "end"]
        );
    }

    #[tokio::test]
    async fn test_enqueue_never_blocks_on_stalled_worker() {
        let mock = MockFlightLink::new();
        mock.set_command_delay(Duration::from_millis(200));
        let dispatcher = dispatcher_with(&mock);

        let started = Instant::now();
        for _ in 0..100 {
            dispatcher.enqueue(FlightCommand::Land).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(50));

        let report = dispatcher.shutdown(Duration::from_millis(50)).await;
        assert!(report.timed_out);
    }

    #[tokio::test]
    async fn test_shutdown_while_armed_lands_before_ending_link() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);
        let flag = dispatcher.arm_flag();

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| flag.is_armed()).await;

        let report = dispatcher.shutdown(Duration::from_millis(200)).await;
        assert_eq!(report, ShutdownReport { land_requested: true, timed_out: false });
        assert_eq!(mock.get_calls(), vec!["take_off", "land", "stream_off", "end"]);
        assert!(!flag.is_armed());
    }

    #[tokio::test]
    async fn test_shutdown_holds_link_for_grace_after_quick_landing() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);
        let flag = dispatcher.arm_flag();

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| flag.is_armed()).await;

        let grace = Duration::from_millis(300);
        let started = Instant::now();
        let report = dispatcher.shutdown(grace).await;

        assert!(started.elapsed() >= grace, "ended after {:?}", started.elapsed());
        assert_eq!(report, ShutdownReport { land_requested: true, timed_out: false });
        assert_eq!(mock.get_calls(), vec!["take_off", "land", "stream_off", "end"]);
    }

    #[tokio::test]
    async fn test_shutdown_waits_grace_period_for_stalled_landing() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);
        let flag = dispatcher.arm_flag();

        dispatcher.enqueue(FlightCommand::TakeOff).unwrap();
        wait_until(|| flag.is_armed()).await;

        mock.set_command_delay(Duration::from_millis(500));
        let grace = Duration::from_millis(100);
        let started = Instant::now();
        let report = dispatcher.shutdown(grace).await;

        assert!(started.elapsed() >= grace);
        assert_eq!(report, ShutdownReport { land_requested: true, timed_out: true });

        let calls = mock.get_calls();
        assert_eq!(calls.iter().filter(|c| **c == "land").count(), 1);
        assert_eq!(calls, vec!["take_off", "land", "stream_off", "end"]);
        assert!(!flag.is_armed());
    }

    #[tokio::test]
    async fn test_shutdown_while_disarmed_does_not_land() {
        let mock = MockFlightLink::new();
        let dispatcher = dispatcher_with(&mock);

        let started = Instant::now();
        let report = dispatcher.shutdown(Duration::from_secs(2)).await;
        assert!(!report.land_requested);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mock.get_calls(), vec!["stream_off", "end"]);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(FlightCommand::TakeOff.to_string(), "Take-off");
        assert_eq!(FlightCommand::Land.to_string(), "Landing");
    }
}
