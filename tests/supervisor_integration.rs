//! Supervisor integration tests - real child processes driven through the
//! ServiceManager: dependency gating, ordered shutdown, restart policies.

use ldh_init::bus::{EventFilter, EventType};
use ldh_init::supervisor::{RestartPolicy, ServiceConfig, ServiceManager, ServiceState};
use ldh_init::types::{ErrorKind, SupervisorConfig};
use ldh_init::Error;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Helper: poll `cond` for up to five seconds.
async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn sleeper(name: &str) -> ServiceConfig {
    ServiceConfig::new(name, "/bin/sleep").with_args(["30"])
}

fn shell(name: &str, script: &str) -> ServiceConfig {
    ServiceConfig::new(name, "/bin/sh").with_args(["-c", script])
}

#[tokio::test]
async fn test_dependency_gate_then_start() {
    let manager = ServiceManager::new();
    manager.register_service(sleeper("base")).unwrap();
    manager
        .register_service(sleeper("app").with_dependencies(["base"]))
        .unwrap();

    let err = manager.start_service("app").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyUnsatisfied);
    assert_eq!(
        manager.get_service_status("app").unwrap().state,
        ServiceState::Unknown
    );

    manager.start_service("base").unwrap();
    manager.start_service("app").unwrap();

    let sm = manager.state_manager();
    assert_eq!(sm.get_state("base"), ServiceState::Running);
    assert_eq!(sm.get_state("app"), ServiceState::Running);
    assert!(manager.get_service_status("app").unwrap().pid.is_some());

    manager.stop_all().unwrap();
}

#[tokio::test]
async fn test_stop_all_runs_in_reverse_registration_order() {
    let manager = ServiceManager::new();
    for name in ["first", "second", "third"] {
        manager.register_service(sleeper(name)).unwrap();
    }

    let stopped = Arc::new(Mutex::new(Vec::new()));
    let sink = stopped.clone();
    manager.subscribe(EventType::Stopped, move |event| {
        sink.lock().push(event.service.clone());
    });

    manager.start_all().unwrap();
    manager.stop_all().unwrap();

    assert_eq!(*stopped.lock(), vec!["third", "second", "first"]);
    for (_, status) in manager.list_services() {
        assert_eq!(status.state, ServiceState::Stopped);
        assert_eq!(status.pid, None);
    }
}

#[tokio::test]
async fn test_start_all_fails_fast_on_unmet_dependency() {
    let manager = ServiceManager::new();
    // Dependent registered first: the gate rejects it and nothing later starts.
    manager
        .register_service(sleeper("web").with_dependencies(["db"]))
        .unwrap();
    manager.register_service(sleeper("db")).unwrap();

    let err = manager.start_all().unwrap_err();
    match err {
        Error::DependencyUnsatisfied { service, unmet } => {
            assert_eq!(service, "web");
            assert_eq!(unmet, vec!["db"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        manager.get_service_status("db").unwrap().state,
        ServiceState::Unknown
    );
}

#[tokio::test]
async fn test_stop_all_fails_fast_on_service_not_running() {
    let manager = ServiceManager::new();
    manager.register_service(sleeper("early")).unwrap();
    manager.register_service(sleeper("late")).unwrap();
    manager.start_service("early").unwrap();

    // "late" was never started, so the reverse walk stops right there.
    let err = manager.stop_all().unwrap_err();
    assert!(matches!(err, Error::NotRunning(ref name) if name == "late"));
    assert_eq!(
        manager.get_service_status("early").unwrap().state,
        ServiceState::Running
    );

    manager.stop_service("early").unwrap();
}

#[tokio::test]
async fn test_always_policy_restarts_once_after_crash() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("crashed-once");
    // First run leaves a marker and crashes; later runs stay up.
    let script = format!(
        "if [ -f {m} ]; then exec sleep 30; else touch {m}; exit 1; fi",
        m = marker.display()
    );

    let manager = ServiceManager::new();
    manager
        .register_service(shell("flappy", &script).with_restart(RestartPolicy::Always))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.subscribe(EventFilter::All, move |event| {
        if event.event_type != EventType::Restart {
            sink.lock().push(event.event_type);
        }
    });
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = restarts.clone();
    manager.subscribe(EventType::Restart, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.start_service("flappy").unwrap();
    let first_pid = manager.get_service_status("flappy").unwrap().pid;

    assert!(wait_for(|| seen.lock().len() >= 5).await);
    assert!(wait_for(|| restarts.load(Ordering::SeqCst) == 1).await);

    assert_eq!(
        *seen.lock(),
        vec![
            EventType::Starting,
            EventType::Running,
            EventType::Failed,
            EventType::Starting,
            EventType::Running,
        ]
    );
    let status = manager.get_service_status("flappy").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_count, 1);
    assert_ne!(status.pid, first_pid);
    assert_eq!(
        manager.state_manager().get_state("flappy"),
        ServiceState::Running
    );

    manager.stop_service("flappy").unwrap();
}

#[tokio::test]
async fn test_never_policy_crash_marks_failed() {
    let manager = ServiceManager::new();
    manager
        .register_service(shell("crasher", "exit 3").with_restart(RestartPolicy::Never))
        .unwrap();

    manager.start_service("crasher").unwrap();
    assert!(wait_for(|| {
        manager.get_service_status("crasher").unwrap().state == ServiceState::Failed
    })
    .await);

    let status = manager.get_service_status("crasher").unwrap();
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.pid, None);
    assert!(status.last_error.unwrap().contains('3'));

    // The mirror follows crashes through the bus subscription.
    assert_eq!(
        manager.state_manager().get_state("crasher"),
        ServiceState::Failed
    );

    // A failed service can be started again.
    manager.start_service("crasher").unwrap();
}

#[tokio::test]
async fn test_on_failure_policy() {
    let manager = ServiceManager::new();
    manager
        .register_service(shell("clean", "exit 0").with_restart(RestartPolicy::OnFailure))
        .unwrap();
    manager
        .register_service(
            shell("dirty", "sleep 0.2; exit 1").with_restart(RestartPolicy::OnFailure),
        )
        .unwrap();

    manager.start_service("clean").unwrap();
    manager.start_service("dirty").unwrap();

    assert!(wait_for(|| {
        manager.get_service_status("clean").unwrap().state == ServiceState::Failed
    })
    .await);
    assert!(wait_for(|| manager.get_service_status("dirty").unwrap().restart_count >= 1).await);

    let clean = manager.get_service_status("clean").unwrap();
    assert_eq!(clean.restart_count, 0);
    assert_eq!(clean.last_error, None);

    // Let the latest "dirty" run settle before stopping it.
    assert!(wait_for(|| {
        manager.get_service_status("dirty").unwrap().state == ServiceState::Running
    })
    .await);
    let _ = manager.stop_service("dirty");
}

#[tokio::test]
async fn test_stop_timeout_force_kills_stubborn_process() {
    let manager = ServiceManager::with_config(SupervisorConfig {
        stop_timeout: Duration::from_millis(200),
    });
    manager
        .register_service(shell("stubborn", "trap '' TERM; exec sleep 30"))
        .unwrap();

    manager.start_service("stubborn").unwrap();
    let pid = manager.get_service_status("stubborn").unwrap().pid.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    manager.stop_service("stubborn").unwrap();
    assert_eq!(
        manager.get_service_status("stubborn").unwrap().state,
        ServiceState::Stopped
    );

    let target = Pid::from_raw(pid as i32);
    assert!(wait_for(|| kill(target, None::<Signal>).is_err()).await);
}

#[tokio::test]
async fn test_restart_service_bumps_counter() {
    let manager = ServiceManager::new();
    manager.register_service(sleeper("bounce")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.subscribe(EventFilter::All, move |event| {
        if event.event_type != EventType::Restart {
            sink.lock().push(event.event_type);
        }
    });

    manager.start_service("bounce").unwrap();
    manager.restart_service("bounce").unwrap();

    let status = manager.get_service_status("bounce").unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_count, 1);
    assert_eq!(
        *seen.lock(),
        vec![
            EventType::Starting,
            EventType::Running,
            EventType::Stopping,
            EventType::Stopped,
            EventType::Starting,
            EventType::Running,
        ]
    );

    manager.stop_service("bounce").unwrap();
}

#[tokio::test]
async fn test_launch_failure_surfaces_error() {
    let manager = ServiceManager::new();
    manager
        .register_service(ServiceConfig::new("missing", "/nonexistent/ldh-daemon"))
        .unwrap();

    let err = manager.start_service("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessLaunchFailure);
    assert_eq!(
        manager.state_manager().get_state("missing"),
        ServiceState::Failed
    );
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let manager = ServiceManager::new();
    manager.register_service(sleeper("quiet")).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let id = manager.subscribe(EventFilter::All, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(manager.unsubscribe(&id));
    assert!(!manager.unsubscribe(&id));

    manager.start_service("quiet").unwrap();
    manager.stop_service("quiet").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
