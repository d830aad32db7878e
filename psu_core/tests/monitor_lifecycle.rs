//! Monitor thread lifecycle: sessions stop promptly and never leak threads.

use psu_core::mocks::{RecordingNotifier, ScriptedBus};
use psu_core::{MonitorCfg, MonitorSession, MonitorState, Station, StopReason};
use psu_traits::clock::MonotonicClock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn session(bus: ScriptedBus, poll: Duration) -> MonitorSession {
    let cfg = MonitorCfg {
        poll_interval: poll,
        read_timeout: Duration::from_millis(5),
        ..MonitorCfg::default()
    };
    MonitorSession::spawn(
        Arc::new(Mutex::new(Station::new(bus))),
        cfg,
        Arc::new(MonotonicClock::new()),
        Arc::new(RecordingNotifier::default()),
    )
}

#[test]
fn monitor_thread_exits_on_drop() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let s = session(bus, Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(s.state(), MonitorState::Active);
    drop(s);
    assert!(!handle.is_scanning());
}

#[test]
fn stop_completes_within_one_poll_interval() {
    let s = session(ScriptedBus::new(), Duration::from_millis(100));
    std::thread::sleep(Duration::from_millis(20));
    let t0 = Instant::now();
    assert_eq!(s.stop(), Some(StopReason::Manual));
    assert!(t0.elapsed() < Duration::from_millis(500), "{:?}", t0.elapsed());
}

#[test]
fn multiple_sessions_dont_leak_threads() {
    let bus = ScriptedBus::new();
    for _ in 0..10 {
        let s = session(bus.clone(), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(5));
        drop(s);
    }
    assert_eq!(bus.scan_starts(), 10);
    assert!(!bus.is_scanning());
}
