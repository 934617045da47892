//! Lifecycle controller scenarios: start/stop/retry sequencing, deadline
//! racing, crash compensation.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{
    AttemptId, EventBus, LifecycleEvent, RobotStatus, StartupFailure, StatusMachine,
    SupervisorConfig, Telemetry,
};

use crate::lifecycle::{Supervisor, SupervisorTasks};
use crate::probe::DaemonApi;
use crate::process::ProcessEvent;
use crate::tests::MockApi;

struct Harness {
    supervisor: Arc<Supervisor>,
    api: Arc<MockApi>,
    tasks: SupervisorTasks,
}

impl Harness {
    fn machine(&self) -> &Arc<StatusMachine> {
        self.supervisor.machine()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

fn fast_config() -> SupervisorConfig {
    let mut config = SupervisorConfig::new("/nonexistent/tether-robotd");
    config.startup_deadline = Duration::from_millis(80);
    config.readiness_interval = Duration::from_millis(10);
    config.probe_interval = Duration::from_millis(10);
    config.probe_timeout = Duration::from_millis(20);
    config.safe_pose_timeout = Duration::from_millis(100);
    config.stop_grace = Duration::from_millis(500);
    config
}

/// Supervisor with tasks running and a device attached.
async fn harness_with(config: SupervisorConfig, api: Arc<MockApi>) -> Harness {
    let machine = Arc::new(StatusMachine::new());
    let bus = EventBus::new();
    let supervisor = Arc::new(
        Supervisor::new(config, machine, bus, Arc::clone(&api) as Arc<dyn DaemonApi>).unwrap(),
    );
    let tasks = supervisor.spawn_tasks().unwrap();
    supervisor.device_attached().await.unwrap();
    Harness {
        supervisor,
        api,
        tasks,
    }
}

async fn harness(api: Arc<MockApi>) -> Harness {
    harness_with(fast_config(), api).await
}

/// Polls until the machine reaches `want` or the deadline passes.
async fn wait_for_status(machine: &StatusMachine, want: RobotStatus, deadline: Duration) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if machine.status().await == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_start_with_daemon_already_answering_skips_spawn() {
    let h = harness(Arc::new(MockApi::alive_and_ready())).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);

    let state = h.machine().snapshot().await;
    // The configured binary does not exist; reaching Ready without a
    // startup failure proves the spawn was skipped.
    assert!(state.startup_failure.is_none());
    assert!(state.daemon_active);
    assert_eq!(state.telemetry.control_mode.as_deref(), Some("joint"));
}

#[tokio::test]
async fn test_spawn_failure_surfaces_and_offers_retry() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Starting);
    assert!(matches!(
        state.startup_failure,
        Some(StartupFailure::Spawn { .. })
    ));
    assert!(state.can_retry());
}

#[tokio::test]
async fn test_startup_deadline_fires_once_and_stays_starting() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Starting);
    assert_eq!(state.startup_failure, Some(StartupFailure::Timeout));
    assert!(state.can_retry());
}

#[tokio::test]
async fn test_ready_wins_race_against_deadline() {
    let h = harness(Arc::new(MockApi::alive_and_ready())).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);

    // Sleep well past the startup deadline; the cancelled timer must not
    // fire a stale timeout.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Ready);
    assert!(state.startup_failure.is_none());
}

#[tokio::test]
async fn test_stale_success_is_a_noop() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();

    // A success for some other attempt must be ignored.
    h.supervisor.bus().emit(LifecycleEvent::StartSucceeded {
        attempt: AttemptId::new(),
        telemetry: Telemetry::default(),
    });
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(h.machine().status().await, RobotStatus::Starting);
}

#[tokio::test]
async fn test_retry_resets_error_counter_and_deadline() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.machine().snapshot().await.startup_failure,
        Some(StartupFailure::Timeout)
    );

    h.supervisor.retry().await.unwrap();

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Starting);
    // The timeout error is gone; the new attempt may already have
    // recorded its own spawn failure, but never a stale timeout.
    assert_ne!(state.startup_failure, Some(StartupFailure::Timeout));
    assert!(state.hardware_error.is_none());
    assert_eq!(h.supervisor.health().consecutive_failures(), 0);
    assert!(!h.supervisor.health().is_crashed());

    // The deadline was re-armed: it fires again for the new attempt.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.machine().snapshot().await.startup_failure,
        Some(StartupFailure::Timeout)
    );
}

#[tokio::test]
async fn test_retry_rejected_without_error() {
    let h = harness(Arc::new(MockApi::alive_and_ready())).await;
    // Nothing started yet; retry is not available.
    assert!(h.supervisor.retry().await.is_err());

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
    // Ready without error: still not available.
    assert!(h.supervisor.retry().await.is_err());
}

#[tokio::test]
async fn test_stop_settles_even_when_rest_pose_fails() {
    let api = Arc::new(MockApi::alive_and_ready());
    api.fail_sleep();
    let h = harness(Arc::clone(&api)).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);

    h.supervisor.stop().await.unwrap();

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::ReadyToStart);
    assert!(!state.daemon_active);
    // The safe pose was attempted, its failure tolerated.
    assert!(api.sleep_calls() >= 1);
}

#[tokio::test]
async fn test_stderr_camera_fault_classified_while_starting() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();

    let sender = h.supervisor.process_events_sender();
    sender
        .send(ProcessEvent::Stderr(
            "ERROR camera timeout while grabbing frame".to_string(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Starting);
    let error = state.hardware_error.as_ref().unwrap();
    assert_eq!(error.kind, tether_core::HardwareErrorKind::Camera);
    assert!(state.can_retry());
}

#[tokio::test]
async fn test_generic_spew_does_not_overwrite_specific_fault() {
    let h = harness(Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();
    let sender = h.supervisor.process_events_sender();
    sender
        .send(ProcessEvent::Stderr("motor bus timeout".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    sender
        .send(ProcessEvent::Stderr(
            "Traceback (most recent call last):".to_string(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let state = h.machine().snapshot().await;
    assert_eq!(
        state.hardware_error.map(|e| e.kind),
        Some(tether_core::HardwareErrorKind::MotorBus)
    );
}

#[tokio::test]
async fn test_ready_signal_blocked_while_hardware_error_attached() {
    let api = Arc::new(MockApi::new());
    let h = harness(Arc::clone(&api)).await;

    h.supervisor.start().await.unwrap();
    let sender = h.supervisor.process_events_sender();
    sender
        .send(ProcessEvent::Stderr("camera timeout".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // The daemon comes up anyway; its ready signal must not clear the
    // attached fault.
    api.set_alive(true);
    api.set_ready(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Starting);
    assert!(state.hardware_error.is_some());

    // Retry clears it; with the daemon healthy, start now completes.
    h.supervisor.retry().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_crash_signal_releases_app_lock() {
    let h = harness(Arc::new(MockApi::alive_and_ready())).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
    h.machine().begin_app("dance-demo").await.unwrap();

    h.supervisor.bus().emit(LifecycleEvent::CrashDetected {
        consecutive_failures: 3,
    });
    assert!(wait_for_status(h.machine(), RobotStatus::Crashed, Duration::from_secs(2)).await);

    let state = h.machine().snapshot().await;
    assert!(state.running_app.is_none());
    assert!(!state.daemon_active);
}

#[tokio::test]
async fn test_unresponsive_daemon_crashes_via_health_loop() {
    let api = Arc::new(MockApi::alive_and_ready());
    let h = harness(Arc::clone(&api)).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
    h.machine().begin_app("dance-demo").await.unwrap();

    // The daemon stops answering; three probe timeouts at 10ms cadence
    // cross the threshold and the consumer loop marks it crashed.
    api.set_alive(false);
    assert!(wait_for_status(h.machine(), RobotStatus::Crashed, Duration::from_secs(5)).await);
    assert!(h.machine().snapshot().await.running_app.is_none());
}

#[tokio::test]
async fn test_start_after_crash() {
    let api = Arc::new(MockApi::alive_and_ready());
    let h = harness(Arc::clone(&api)).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);

    api.set_alive(false);
    assert!(wait_for_status(h.machine(), RobotStatus::Crashed, Duration::from_secs(5)).await);

    // A new start clears the crash and goes through the normal path.
    api.set_alive(true);
    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
    assert_eq!(h.supervisor.health().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_process_exit_during_start_surfaces_termination() {
    // A real short-lived process stands in for a daemon that dies during
    // startup. The API never answers, so readiness cannot win first.
    let mut config = fast_config();
    config.daemon_binary = "/bin/sh".into();
    config.daemon_args = vec!["-c".to_string(), "exit 7".to_string()];
    config.startup_deadline = Duration::from_secs(10);
    let h = harness_with(config, Arc::new(MockApi::new())).await;

    h.supervisor.start().await.unwrap();

    let end = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = h.machine().snapshot().await;
        if state.startup_failure.is_some() {
            assert_eq!(state.status, RobotStatus::Starting);
            assert_eq!(
                state.startup_failure,
                Some(StartupFailure::Terminated {
                    exit: tether_core::ExitInfo::from_code(7)
                })
            );
            assert!(!state.daemon_active);
            break;
        }
        assert!(tokio::time::Instant::now() < end, "termination never surfaced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_process_exit_while_ready_is_a_crash() {
    // Spawn a real process that outlives startup, then exits on its own.
    let mut config = fast_config();
    config.daemon_binary = "/bin/sh".into();
    config.daemon_args = vec!["-c".to_string(), "sleep 0.4".to_string()];
    config.startup_deadline = Duration::from_secs(10);
    let api = Arc::new(MockApi::new());
    let h = harness_with(config, Arc::clone(&api)).await;

    h.supervisor.start().await.unwrap();
    // The daemon starts answering after the spawn.
    api.set_alive(true);
    api.set_ready(true);
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);

    // The process dies while believed active: crash, not a quiet exit.
    assert!(wait_for_status(h.machine(), RobotStatus::Crashed, Duration::from_secs(5)).await);
    assert!(!h.machine().snapshot().await.daemon_active);
}

#[tokio::test]
async fn test_device_detach_tears_down() {
    let h = harness(Arc::new(MockApi::alive_and_ready())).await;

    h.supervisor.start().await.unwrap();
    assert!(wait_for_status(h.machine(), RobotStatus::Ready, Duration::from_secs(2)).await);
    h.machine().begin_app("dance-demo").await.unwrap();

    h.supervisor.device_detached().await.unwrap();

    let state = h.machine().snapshot().await;
    assert_eq!(state.status, RobotStatus::Disconnected);
    assert!(state.running_app.is_none());
    assert!(!state.daemon_active);
}

#[tokio::test]
async fn test_spawn_tasks_twice_rejected() {
    let machine = Arc::new(StatusMachine::new());
    let bus = EventBus::new();
    let supervisor = Arc::new(
        Supervisor::new(
            fast_config(),
            machine,
            bus,
            Arc::new(MockApi::new()) as Arc<dyn DaemonApi>,
        )
        .unwrap(),
    );
    let tasks = supervisor.spawn_tasks().unwrap();
    assert!(supervisor.spawn_tasks().is_err());
    tasks.abort_all();
}
