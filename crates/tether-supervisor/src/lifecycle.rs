//! Daemon lifecycle controller.
//!
//! Orchestrates start/stop sequencing, arms the startup deadline, and
//! turns classifier/monitor signals into status transitions. One consumer
//! loop is the only component that mutates the state machine from async
//! signals; every other task (output listeners, deadline timer, health
//! monitor, readiness waiter) only emits events.
//!
//! Raced timeout/success is settled by attempt-id fencing: both events
//! carry the attempt they belong to, and the loop drops anything stale, so
//! whichever resolves first wins and the other is a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tether_core::{
    AttemptId, EventBus, LifecycleEvent, Result, RobotStatus, StartupFailure, StatusMachine,
    SupervisorConfig, SupervisorError,
};

use crate::classify::classify;
use crate::health::HealthMonitor;
use crate::probe::{DaemonApi, HttpApi};
use crate::process::{DaemonProcess, ProcessEvent};

/// Capacity of the process-event mediator channel.
const PROCESS_CHANNEL_CAPACITY: usize = 256;

/// State owned by the controller across attempts.
struct SupervisorInner {
    /// Current start attempt; events from other attempts are stale.
    attempt: Option<AttemptId>,
    /// The spawned daemon, when we own one.
    process: Option<DaemonProcess>,
    /// Startup deadline timer for the current attempt.
    deadline: Option<JoinHandle<()>>,
    /// Readiness poller for the current attempt.
    readiness: Option<JoinHandle<()>>,
}

/// Handles for the supervisor's long-lived tasks.
pub struct SupervisorTasks {
    /// The consumer loop turning events into transitions.
    pub event_loop: JoinHandle<()>,
    /// The health probe loop.
    pub health: JoinHandle<()>,
}

impl SupervisorTasks {
    /// Aborts both loops. Used on window shutdown.
    pub fn abort_all(&self) {
        self.event_loop.abort();
        self.health.abort();
    }
}

/// The daemon lifecycle controller.
pub struct Supervisor {
    config: SupervisorConfig,
    machine: Arc<StatusMachine>,
    bus: EventBus,
    api: Arc<dyn DaemonApi>,
    health: Arc<HealthMonitor>,
    inner: Mutex<SupervisorInner>,
    events_tx: mpsc::Sender<ProcessEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ProcessEvent>>>,
}

impl Supervisor {
    /// Creates a supervisor with an injected API transport.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: SupervisorConfig,
        machine: Arc<StatusMachine>,
        bus: EventBus,
        api: Arc<dyn DaemonApi>,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthMonitor::new(
            &config,
            Arc::clone(&machine),
            bus.clone(),
            Arc::clone(&api),
        ));
        let (events_tx, events_rx) = mpsc::channel(PROCESS_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            machine,
            bus,
            api,
            health,
            inner: Mutex::new(SupervisorInner {
                attempt: None,
                process: None,
                deadline: None,
                readiness: None,
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Creates a supervisor probing over HTTP, the production transport.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn with_http_api(
        config: SupervisorConfig,
        machine: Arc<StatusMachine>,
        bus: EventBus,
    ) -> Result<Arc<Self>> {
        let api = Arc::new(HttpApi::new(&config)?);
        Ok(Arc::new(Self::new(config, machine, bus, api)?))
    }

    /// The shared state machine.
    #[must_use]
    pub fn machine(&self) -> &Arc<StatusMachine> {
        &self.machine
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The health monitor.
    #[must_use]
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Sender feeding the process-event mediator channel.
    pub(crate) fn process_events_sender(&self) -> mpsc::Sender<ProcessEvent> {
        self.events_tx.clone()
    }

    /// Spawns the consumer loop and the health loop.
    ///
    /// # Errors
    /// Returns an error if the loops are already running.
    pub fn spawn_tasks(self: &Arc<Self>) -> Result<SupervisorTasks> {
        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| SupervisorError::state("supervisor tasks already running"))?;

        let event_loop = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.event_loop(events_rx).await })
        };
        let health = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.health.run().await })
        };

        Ok(SupervisorTasks { event_loop, health })
    }

    // -------------------------------------------------------------------------
    // User actions
    // -------------------------------------------------------------------------

    /// A robot device was attached.
    pub async fn device_attached(&self) -> Result<()> {
        self.machine.device_attached().await?;
        Ok(())
    }

    /// The robot device was detached. Tears down timers and the process
    /// and force-clears busy/app locks via the state machine.
    pub async fn device_detached(&self) -> Result<()> {
        self.cancel_start_timers();
        let process = self.inner.lock().process.take();
        if let Some(process) = process {
            if let Err(e) = process.stop(self.config.stop_grace).await {
                tracing::warn!(error = %e, "daemon termination after detach failed");
            }
        }
        self.health.reset();
        self.machine.device_detached().await?;
        Ok(())
    }

    /// Starts the daemon.
    ///
    /// Clears prior errors, treats an already-answering daemon as
    /// immediate success (skipping the spawn), and arms the startup
    /// deadline independently of spawn success.
    pub async fn start(&self) -> Result<()> {
        if self.machine.status().await == RobotStatus::Crashed {
            self.machine.acknowledge_crash().await?;
        }
        self.machine.start_requested().await?;
        self.begin_attempt().await
    }

    /// Retries the current start attempt.
    ///
    /// Available only while `Starting` with an attached error; fully
    /// resets the health counter, the hardware error, and the deadline.
    pub async fn retry(&self) -> Result<()> {
        if !self.machine.can_retry().await {
            return Err(SupervisorError::state(
                "retry is only available while starting with an error",
            ));
        }
        self.machine.start_requested().await?;
        self.begin_attempt().await
    }

    /// Stops the daemon.
    ///
    /// Best-effort safe rest pose (bounded wait, failure tolerated), then
    /// unconditional termination; always settles in `ReadyToStart`.
    pub async fn stop(&self) -> Result<()> {
        self.machine.stop_requested().await?;

        match tokio::time::timeout(self.config.safe_pose_timeout, self.api.goto_sleep()).await {
            Ok(Ok(())) => tracing::debug!("robot moved to rest pose"),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "rest pose command failed, continuing shutdown");
            }
            Err(_) => tracing::warn!("rest pose command timed out, continuing shutdown"),
        }

        self.cancel_start_timers();
        let process = self.inner.lock().process.take();
        if let Some(process) = process {
            if let Err(e) = process.stop(self.config.stop_grace).await {
                tracing::warn!(error = %e, "daemon termination reported an error");
            }
        }

        self.machine.set_daemon_active(false).await;
        self.health.reset();
        self.machine.stop_confirmed().await?;
        self.bus.emit(LifecycleEvent::StopConfirmed);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Start attempt plumbing
    // -------------------------------------------------------------------------

    async fn begin_attempt(&self) -> Result<()> {
        let attempt = AttemptId::new();
        {
            let mut inner = self.inner.lock();
            inner.attempt = Some(attempt);
        }
        self.cancel_start_timers();
        self.health.reset();
        self.bus.emit(LifecycleEvent::StartAttempted { attempt });

        // Fast path: a daemon is already answering; treat as immediate
        // success and skip the spawn.
        if self.api.liveness().await.is_ok() {
            tracing::info!("daemon already answering, skipping spawn");
            self.machine.set_daemon_active(true).await;
        } else {
            match DaemonProcess::spawn(&self.config, self.events_tx.clone()) {
                Ok(process) => {
                    self.inner.lock().process = Some(process);
                    self.machine.set_daemon_active(true).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "daemon spawn failed");
                    self.bus.emit(LifecycleEvent::StartFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Armed independently of spawn success.
        self.arm_deadline(attempt);
        self.spawn_readiness_waiter(attempt);
        Ok(())
    }

    fn arm_deadline(&self, attempt: AttemptId) {
        let bus = self.bus.clone();
        let deadline = self.config.startup_deadline;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            bus.emit(LifecycleEvent::StartTimedOut { attempt });
        });
        if let Some(old) = self.inner.lock().deadline.replace(handle) {
            old.abort();
        }
    }

    fn spawn_readiness_waiter(&self, attempt: AttemptId) {
        let machine = Arc::clone(&self.machine);
        let api = Arc::clone(&self.api);
        let bus = self.bus.clone();
        let interval = self.config.readiness_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Re-read status each tick; a waiter from an abandoned
                // attempt exits instead of firing.
                if machine.status().await != RobotStatus::Starting {
                    break;
                }
                match api.readiness().await {
                    Ok(Some(telemetry)) => {
                        bus.emit(LifecycleEvent::StartSucceeded { attempt, telemetry });
                        break;
                    }
                    Ok(None) => {
                        tracing::trace!("daemon answering, control layer not initialized yet");
                    }
                    Err(failure) => {
                        tracing::trace!(error = %failure, "readiness probe failed");
                    }
                }
            }
        });
        if let Some(old) = self.inner.lock().readiness.replace(handle) {
            old.abort();
        }
    }

    /// Cancels the deadline and readiness tasks of the current attempt.
    ///
    /// Called the instant a success or terminal failure is observed so a
    /// stale timer cannot fire after the window has moved on.
    fn cancel_start_timers(&self) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.deadline.take() {
            handle.abort();
        }
        if let Some(handle) = inner.readiness.take() {
            handle.abort();
        }
    }

    fn is_current_attempt(&self, attempt: AttemptId) -> bool {
        self.inner.lock().attempt == Some(attempt)
    }

    // -------------------------------------------------------------------------
    // Consumer loop
    // -------------------------------------------------------------------------

    async fn event_loop(&self, mut events_rx: mpsc::Receiver<ProcessEvent>) {
        let mut bus_rx = self.bus.subscribe();
        loop {
            tokio::select! {
                event = bus_rx.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event loop lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_process_event(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!("supervisor event loop ended");
    }

    async fn handle_process_event(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::Stdout(line) => {
                tracing::info!(target: "tether::daemon", "{line}");
            }
            ProcessEvent::Stderr(line) => {
                tracing::warn!(target: "tether::daemon", "{line}");
                // Fresh read: the active diagnosis decides whether a
                // generic marker may produce an error at all.
                let active = self
                    .machine
                    .snapshot()
                    .await
                    .hardware_error
                    .map(|e| e.kind);
                if let Some(error) = classify(&line, active) {
                    self.bus.emit(LifecycleEvent::HardwareErrorDetected(error));
                }
            }
            ProcessEvent::Exited(exit) => {
                self.bus.emit(LifecycleEvent::ProcessTerminated(exit));
            }
        }
    }

    async fn handle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::StartAttempted { attempt } => {
                tracing::debug!(%attempt, "start attempt began");
            }
            LifecycleEvent::StartSucceeded { attempt, telemetry } => {
                if !self.is_current_attempt(attempt) {
                    tracing::debug!(%attempt, "stale start success ignored");
                    return;
                }
                self.cancel_start_timers();
                match self.machine.confirm_ready(telemetry).await {
                    Ok(()) => tracing::info!("daemon ready"),
                    Err(tether_core::TransitionError::HardwareErrorAttached) => {
                        // Sticky Starting: the error must be cleared by a
                        // retry, not overridden by a late ready signal.
                        tracing::warn!("ready signal ignored while a hardware error is attached");
                    }
                    Err(e) => tracing::debug!(error = %e, "ready signal not applicable"),
                }
            }
            LifecycleEvent::StartFailed { attempt, reason } => {
                if !self.is_current_attempt(attempt) {
                    tracing::debug!(%attempt, "stale start failure ignored");
                    return;
                }
                if let Err(e) = self
                    .machine
                    .startup_failed(StartupFailure::Spawn { detail: reason })
                    .await
                {
                    tracing::debug!(error = %e, "spawn failure not applicable");
                }
            }
            LifecycleEvent::StartTimedOut { attempt } => {
                if !self.is_current_attempt(attempt) {
                    tracing::debug!(%attempt, "stale startup deadline ignored");
                    return;
                }
                match self.machine.startup_timed_out().await {
                    Ok(()) => tracing::warn!(
                        deadline = ?self.config.startup_deadline,
                        "daemon did not become ready within the deadline"
                    ),
                    // Already past Starting: the success won the race.
                    Err(e) => tracing::debug!(error = %e, "startup deadline not applicable"),
                }
            }
            LifecycleEvent::HardwareErrorDetected(error) => {
                match self.machine.attach_hardware_error(error.clone()).await {
                    Ok(()) => tracing::warn!(
                        kind = ?error.kind,
                        raw = %error.raw_message,
                        "hardware fault detected"
                    ),
                    Err(e) => tracing::debug!(error = %e, "hardware fault ignored"),
                }
            }
            LifecycleEvent::ProcessTerminated(exit) => {
                self.handle_termination(exit).await;
            }
            LifecycleEvent::CrashDetected {
                consecutive_failures,
            } => {
                tracing::error!(consecutive_failures, "daemon unresponsive, marking crashed");
                self.handle_crash().await;
            }
            LifecycleEvent::StopConfirmed => {
                tracing::debug!("stop confirmed");
            }
        }
    }

    async fn handle_termination(&self, exit: tether_core::ExitInfo) {
        // Fresh read: what the exit means depends on where we are now.
        let status = self.machine.status().await;
        match status {
            RobotStatus::Stopping => {
                tracing::debug!(%exit, "daemon exited during stop");
            }
            RobotStatus::Starting => {
                tracing::warn!(%exit, "daemon exited before becoming ready");
                self.inner.lock().process = None;
                self.machine.set_daemon_active(false).await;
                if let Err(e) = self
                    .machine
                    .startup_failed(StartupFailure::Terminated { exit })
                    .await
                {
                    tracing::debug!(error = %e, "startup termination not applicable");
                }
            }
            RobotStatus::Ready | RobotStatus::Busy(_) => {
                tracing::error!(%exit, "daemon terminated unexpectedly");
                self.handle_crash().await;
            }
            _ => {
                tracing::debug!(%exit, status = %status, "late exit notification ignored");
            }
        }
    }

    /// Crash compensation: kill whatever is left, cancel timers, and let
    /// the machine release any held busy/app lock.
    async fn handle_crash(&self) {
        self.cancel_start_timers();
        let process = self.inner.lock().process.take();
        if let Some(process) = process {
            process.kill();
        }
        self.machine.set_daemon_active(false).await;
        if let Err(e) = self.machine.crashed().await {
            tracing::debug!(error = %e, "crash transition not applicable");
        }
    }
}
