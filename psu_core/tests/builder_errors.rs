use psu_core::error::BuildError;
use psu_core::mocks::{RecordingNotifier, ScriptedBus};
use psu_core::{Controller, ControllerCfg, CorrectionModel, MonitorCfg, TracingNotifier};
use rstest::rstest;
use std::time::Duration;

#[rstest]
fn builder_missing_bus_yields_typed_build_error() {
    let err = Controller::<ScriptedBus>::builder()
        .with_notifier(TracingNotifier)
        .try_build()
        .expect_err("should fail with MissingBus");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingBus) => {}
        other => panic!("expected MissingBus, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_notifier_yields_typed_build_error() {
    let err = Controller::builder()
        .with_bus(ScriptedBus::new())
        .try_build()
        .expect_err("should fail with MissingNotifier");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingNotifier) => {}
        other => panic!("expected MissingNotifier, got: {other:?}"),
    }
}

#[rstest]
#[case::zero_poll(MonitorCfg { poll_interval: Duration::ZERO, ..MonitorCfg::default() }, "poll_interval")]
#[case::zero_shunt(MonitorCfg { shunt_ohms: 0.0, ..MonitorCfg::default() }, "shunt_ohms")]
#[case::nan_limit(MonitorCfg { max_current_ma: f64::NAN, ..MonitorCfg::default() }, "max_current_ma")]
#[case::zero_rate(MonitorCfg { scan_rate_hz: 0.0, ..MonitorCfg::default() }, "scan_rate_hz")]
fn builder_rejects_bad_monitor_cfg(#[case] monitor: MonitorCfg, #[case] field: &str) {
    let err = Controller::builder()
        .with_bus(ScriptedBus::new())
        .with_notifier(RecordingNotifier::default())
        .with_config(ControllerCfg {
            monitor,
            ..ControllerCfg::default()
        })
        .try_build()
        .expect_err("invalid monitor config");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains(field), "{msg}"),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[rstest]
fn builder_rejects_non_finite_correction() {
    let err = Controller::builder()
        .with_bus(ScriptedBus::new())
        .with_notifier(RecordingNotifier::default())
        .with_correction(CorrectionModel::new(f64::INFINITY, 1.0))
        .try_build()
        .expect_err("non-finite correction");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[rstest]
fn build_parks_dac_at_zero() {
    let bus = ScriptedBus::new();
    let handle = bus.clone();
    let _ctl = Controller::builder()
        .with_bus(bus)
        .with_notifier(RecordingNotifier::default())
        .try_build()
        .unwrap();
    assert_eq!(handle.writes(), vec![0]);
}

#[rstest]
fn build_fails_when_dac_cannot_be_parked() {
    let err = Controller::builder()
        .with_bus(ScriptedBus::new().fail_write_at(0))
        .with_notifier(RecordingNotifier::default())
        .try_build()
        .expect_err("write 0 fails");
    assert!(format!("{err:#}").contains("failed to park DAC"));
}

#[rstest]
fn apply_config_takes_toml_values() {
    let cfg = psu_config::load_toml(
        r#"
        [limits]
        max_current_ma = 250.0
        min_voltage = -8.0

        [correction]
        a = 0.5
        b = 1.5
        "#,
    )
    .unwrap();
    let ctl = Controller::builder()
        .with_bus(ScriptedBus::new())
        .with_notifier(RecordingNotifier::default())
        .apply_config(&cfg)
        .try_build()
        .unwrap();
    assert_eq!(ctl.config().monitor.max_current_ma, 250.0);
    assert_eq!(ctl.config().limits.min_voltage, -8.0);
    assert_eq!(ctl.correction(), CorrectionModel::new(0.5, 1.5));
}
