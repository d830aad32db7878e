use psu_core::mocks::{RecordingNotifier, ScanStep, ScriptedBus};
use crossbeam_channel as xch;
use psu_core::{Command, Controller, CorrectionModel, Event, Notifier, PsuError};
use psu_traits::clock::test_clock::TestClock;
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Amplified shunt voltage that reads as `ma` through 0.1 Ω and x69.
fn shunt_for_ma(ma: f64) -> f64 {
    ma / 1000.0 * 0.1 * 69.0
}

fn controller(bus: ScriptedBus) -> (Controller<ScriptedBus>, Arc<RecordingNotifier>) {
    let events = Arc::new(RecordingNotifier::default());
    let ctl = Controller::builder()
        .with_bus(bus)
        .with_shared_notifier(events.clone())
        .with_clock(TestClock::new())
        .with_correction(CorrectionModel::identity())
        .try_build()
        .expect("build");
    (ctl, events)
}

fn calibrated(bus: ScriptedBus) -> (Controller<ScriptedBus>, Arc<RecordingNotifier>) {
    let (mut ctl, events) = controller(bus);
    ctl.request_calibration(1024, Duration::from_millis(1)).unwrap();
    ctl.wait_for_calibration();
    assert_eq!(ctl.status().point_count, 5);
    (ctl, events)
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[rstest]
fn calibration_installs_table_and_reports_completion() {
    let (ctl, events) = calibrated(ScriptedBus::new());
    let names = events.names();
    assert_eq!(names.first(), Some(&"calibration_started"));
    assert_eq!(names.last(), Some(&"calibration_complete"));
    match events.events().last() {
        Some(Event::CalibrationComplete {
            point_count,
            min_voltage,
            max_voltage,
        }) => {
            assert_eq!(*point_count, 5);
            assert!((min_voltage + 10.0).abs() < 1e-9);
            assert_eq!(*max_voltage, 0.0);
        }
        other => panic!("expected calibration_complete, got {other:?}"),
    }
    assert!(!ctl.is_calibrating());
}

#[rstest]
fn set_voltage_writes_code_and_starts_monitoring() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let (mut ctl, events) = calibrated(bus);

    let code = ctl.set_voltage(-4.0).unwrap();
    assert_eq!(code, 1638);
    assert_eq!(handle.code(), 1638);
    assert!(ctl.is_monitoring());
    wait_until(|| handle.is_scanning());

    let status = ctl.status();
    assert_eq!(status.last_code, 1638);
    assert_eq!(status.last_set_voltage, -4.0);
    assert!(events
        .events()
        .contains(&Event::VoltageSet { voltage: -4.0, code: 1638 }));

    // A second set keeps the same session.
    ctl.set_voltage(-6.0).unwrap();
    assert_eq!(handle.scan_starts(), 1);
}

#[rstest]
fn set_voltage_before_calibration_is_state_error() {
    let (mut ctl, _events) = controller(ScriptedBus::new());
    let err = ctl.set_voltage(-3.0).expect_err("not calibrated");
    assert_eq!(err, PsuError::State("not calibrated".into()));
    assert!(!ctl.is_monitoring());
}

#[rstest]
#[case(0.5)]
#[case(-10.5)]
#[case(f64::NAN)]
fn set_voltage_rejects_out_of_range(#[case] v: f64) {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let (mut ctl, _events) = calibrated(bus);
    let writes_before = handle.writes().len();
    let err = ctl.set_voltage(v).expect_err("out of range");
    assert!(matches!(err, PsuError::Validation(_)), "{err:?}");
    assert_eq!(handle.writes().len(), writes_before);
}

#[rstest]
fn positive_voltage_rejected_even_when_uncalibrated() {
    let (mut ctl, _events) = controller(ScriptedBus::new());
    let err = ctl.set_voltage(2.0).expect_err("positive");
    assert!(matches!(err, PsuError::Validation(_)));
}

#[rstest]
fn overcurrent_zeroes_dac_and_ends_session() {
    let bus = ScriptedBus::new().with_idle_scan(vec![shunt_for_ma(100.0), shunt_for_ma(550.0)]);
    let handle = bus.clone();
    let (mut ctl, events) = calibrated(bus);

    ctl.set_voltage(-8.0).unwrap();
    wait_until(|| events.count("overcurrent") == 1);

    assert_eq!(handle.code(), 0);
    assert!(!ctl.is_monitoring());
    let status = ctl.status();
    assert_eq!(status.last_code, 0);

    let evs = events.events();
    let trip_at = evs
        .iter()
        .position(|e| e.name() == "overcurrent")
        .unwrap();
    match (&evs[trip_at - 1], &evs[trip_at]) {
        (Event::CurrentData(r), Event::Overcurrent { current, limit }) => {
            assert!((r.corrected_current - 550.0).abs() < 1e-6);
            assert!(r.dac_code > 0);
            assert!((current - 550.0).abs() < 1e-6);
            assert_eq!(*limit, 500.0);
        }
        other => panic!("unexpected event order: {other:?}"),
    }
    assert_eq!(events.count("monitoring_stopped"), 0);

    // The scan keeps answering 550 mA; a session still looping would publish more.
    std::thread::sleep(Duration::from_millis(50));
    let evs = events.events();
    assert!(
        !evs[trip_at + 1..].iter().any(|e| e.name() == "current_data"),
        "current_data after overcurrent: {:?}",
        &evs[trip_at + 1..]
    );

    // The next set_voltage starts a fresh session.
    ctl.set_voltage(-1.0).unwrap();
    wait_until(|| handle.scan_starts() == 2);
}

#[rstest]
fn corrected_current_drives_the_trip_decision() {
    // 300 mA measured, but the correction doubles it to 600 mA.
    let bus = ScriptedBus::new().with_idle_scan(vec![shunt_for_ma(300.0)]);
    let (mut ctl, events) = calibrated(bus);
    ctl.update_correction(&[0.0, 100.0], &[0.0, 200.0]).unwrap();
    ctl.set_voltage(-5.0).unwrap();
    wait_until(|| events.count("overcurrent") == 1);
    assert!(!ctl.is_monitoring());
}

#[rstest]
fn current_below_limit_keeps_publishing() {
    let bus = ScriptedBus::new().with_idle_scan(vec![shunt_for_ma(120.0)]);
    let (mut ctl, events) = calibrated(bus);
    ctl.set_voltage(-2.0).unwrap();
    wait_until(|| events.count("current_data") >= 3);
    assert!(ctl.is_monitoring());
    match events.events().iter().rev().find(|e| e.name() == "current_data") {
        Some(Event::CurrentData(r)) => {
            assert!((r.measured_current - 120.0).abs() < 1e-6);
            assert_eq!(r.set_voltage, -2.0);
        }
        other => panic!("expected current_data, got {other:?}"),
    }
}

#[rstest]
fn stop_monitoring_is_idempotent() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let (mut ctl, events) = calibrated(bus);
    ctl.set_voltage(-3.0).unwrap();

    ctl.stop_monitoring().unwrap();
    ctl.stop_monitoring().unwrap();

    assert_eq!(handle.code(), 0);
    assert!(!handle.is_scanning());
    assert!(!ctl.is_monitoring());
    assert_eq!(events.count("monitoring_stopped"), 2);
    let status = ctl.status();
    assert_eq!((status.last_code, status.last_set_voltage), (0, 0.0));
}

#[rstest]
fn calibration_rejected_while_monitoring() {
    let (mut ctl, _events) = calibrated(ScriptedBus::new());
    ctl.set_voltage(-3.0).unwrap();
    let err = ctl
        .request_calibration(32, Duration::from_millis(1))
        .expect_err("monitoring active");
    assert!(matches!(err, PsuError::State(_)));
    ctl.stop_monitoring().unwrap();
    ctl.request_calibration(1024, Duration::from_millis(1)).unwrap();
    ctl.wait_for_calibration();
}

#[rstest]
fn commands_during_sweep_are_rejected_and_cancel_keeps_partial() {
    let events = Arc::new(RecordingNotifier::default());
    // Real clock so the sweep is still running when the commands arrive.
    let mut ctl = Controller::builder()
        .with_bus(ScriptedBus::new())
        .with_shared_notifier(events.clone())
        .try_build()
        .unwrap();
    ctl.request_calibration(32, Duration::from_millis(20)).unwrap();
    assert!(ctl.is_calibrating());

    let err = ctl
        .request_calibration(32, Duration::from_millis(20))
        .expect_err("already running");
    assert!(matches!(err, PsuError::State(_)));
    let err = ctl.set_voltage(-1.0).expect_err("sweep running");
    assert!(matches!(err, PsuError::State(_)));

    ctl.cancel_calibration();
    ctl.wait_for_calibration();
    assert!(!ctl.is_calibrating());
    assert!(ctl.calibration_table().is_empty());
    assert!(ctl.partial_calibration().is_some());
    assert_eq!(
        ctl.last_calibration_error(),
        Some(PsuError::State("calibration cancelled".into()))
    );
    assert_eq!(events.names().last(), Some(&"error"));
}

#[rstest]
fn failed_sweep_keeps_previous_table() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let (mut ctl, events) = calibrated(bus);
    let before = ctl.calibration_table();

    handle.set_fail_read_at(Some(3072));
    ctl.request_calibration(1024, Duration::from_millis(1)).unwrap();
    ctl.wait_for_calibration();

    assert_eq!(ctl.calibration_table(), before);
    assert_eq!(ctl.status().partial_points, Some(3));
    assert!(matches!(ctl.last_calibration_error(), Some(PsuError::Hardware(_))));
    assert_eq!(handle.code(), 0);
    match events.events().last() {
        Some(Event::Error { message }) => {
            assert!(message.contains("after 3 points"), "{message}")
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(events.count("calibration_complete"), 1);

    // The old table still drives the output.
    handle.set_fail_read_at(None);
    assert_eq!(ctl.set_voltage(-4.0).unwrap(), 1638);
}

#[rstest]
fn update_correction_fits_and_publishes() {
    let (mut ctl, events) = controller(ScriptedBus::new());
    let m = ctl.update_correction(&[0.0, 10.0], &[1.0, 21.0]).unwrap();
    assert!((m.a - 1.0).abs() < 1e-9 && (m.b - 2.0).abs() < 1e-9);
    assert_eq!(ctl.correction(), m);
    assert_eq!(events.names(), vec!["correction_updated"]);
}

#[rstest]
fn handle_publishes_error_event_on_rejection() {
    let (mut ctl, events) = controller(ScriptedBus::new());
    let err = ctl
        .handle(Command::UpdateCorrection {
            raw: vec![1.0],
            truth: vec![2.0],
        })
        .expect_err("one pair");
    assert!(matches!(err, PsuError::Validation(_)));
    match events.events().as_slice() {
        [Event::Error { message }] => assert!(message.contains("at least 2 pairs")),
        other => panic!("unexpected events {other:?}"),
    }
}

#[rstest]
fn monitor_read_failure_parks_output_and_reports() {
    let bus = ScriptedBus::new();
    bus.push_scan(ScanStep::Fail("adc fifo overrun"));
    let handle = bus.clone();
    let (mut ctl, events) = calibrated(bus);
    ctl.set_voltage(-7.0).unwrap();
    wait_until(|| events.count("error") == 1);
    assert!(!ctl.is_monitoring());
    assert_eq!(handle.code(), 0);
    assert!(!handle.is_scanning());
    match events.events().last() {
        Some(Event::Error { message }) => assert!(message.contains("adc fifo overrun"), "{message}"),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[rstest]
fn drop_parks_dac_at_zero() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let (mut ctl, _events) = calibrated(bus);
    ctl.set_voltage(-9.0).unwrap();
    drop(ctl);
    assert_eq!(handle.code(), 0);
    assert!(!handle.is_scanning());
}

#[rstest]
fn stop_during_sweep_cancels_it_and_parks_dac() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let events = Arc::new(RecordingNotifier::default());
    let mut ctl = Controller::builder()
        .with_bus(bus)
        .with_shared_notifier(events.clone())
        .try_build()
        .unwrap();
    ctl.request_calibration(32, Duration::from_millis(20)).unwrap();
    ctl.stop_monitoring().unwrap();
    ctl.wait_for_calibration();
    assert_eq!(handle.code(), 0);
    assert!(ctl.calibration_table().is_empty());
    assert_eq!(events.count("monitoring_stopped"), 1);
}

/// Parks the monitor thread inside `publish` for the first reading above `limit`,
/// i.e. after the trip has driven the DAC to 0 but before `overcurrent` goes out.
struct HoldOnTrip {
    events: RecordingNotifier,
    limit: f64,
    armed: AtomicBool,
    entered: xch::Sender<()>,
    release: xch::Receiver<()>,
}

impl Notifier for HoldOnTrip {
    fn publish(&self, event: Event) {
        if let Event::CurrentData(r) = &event
            && r.corrected_current > self.limit
            && self.armed.swap(false, Ordering::AcqRel)
        {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        self.events.publish(event);
    }
}

#[rstest]
fn set_voltage_while_trip_is_reported_starts_a_new_session() {
    let bus = ScriptedBus::new().with_idle_scan(vec![shunt_for_ma(550.0)]);
    let handle = bus.clone();
    let (entered_tx, entered_rx) = xch::bounded(1);
    let (release_tx, release_rx) = xch::bounded(1);
    let gate = Arc::new(HoldOnTrip {
        events: RecordingNotifier::default(),
        limit: 500.0,
        armed: AtomicBool::new(true),
        entered: entered_tx,
        release: release_rx,
    });
    let mut ctl = Controller::builder()
        .with_bus(bus)
        .with_shared_notifier(gate.clone())
        .with_clock(TestClock::new())
        .with_correction(CorrectionModel::identity())
        .try_build()
        .expect("build");
    ctl.request_calibration(1024, Duration::from_millis(1)).unwrap();
    ctl.wait_for_calibration();

    ctl.set_voltage(-4.0).unwrap();
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first session tripped");
    assert_eq!(handle.code(), 0);
    assert!(!ctl.is_monitoring());

    // The first session is still reporting its trip; the output must not be
    // left energized without a session of its own.
    assert_eq!(ctl.set_voltage(-5.0).unwrap(), 2048);
    wait_until(|| handle.scan_starts() == 2);

    release_tx.send(()).unwrap();
    wait_until(|| gate.events.count("overcurrent") == 2);
    assert_eq!(handle.code(), 0);
    assert!(!ctl.is_monitoring());
    assert_eq!(ctl.status().last_code, 0);
}
