//! Typed events published by the controller, and the sinks that receive them.
//!
//! The controller never blocks on a sink: `publish` must return promptly. The
//! channel sink is unbounded; the tracing sink writes one log line per event.
use crossbeam_channel as xch;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CalibrationStarted,
    CalibrationUpdate {
        code: u16,
        voltage: f64,
        /// `code / 4096 * 100`.
        percent: f64,
    },
    CalibrationComplete {
        point_count: usize,
        min_voltage: f64,
        max_voltage: f64,
    },
    VoltageSet {
        voltage: f64,
        code: u16,
    },
    CurrentData(CurrentReading),
    Overcurrent {
        current: f64,
        limit: f64,
    },
    MonitoringStopped,
    CorrectionUpdated {
        a: f64,
        b: f64,
    },
    Error {
        message: String,
    },
}

/// One monitor telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentReading {
    /// Amplified shunt voltage at the ADC (V).
    pub shunt_voltage: f64,
    /// Current derived from the shunt voltage (mA).
    pub measured_current: f64,
    /// `measured_current` after the correction model (mA).
    pub corrected_current: f64,
    pub dac_code: u16,
    pub set_voltage: f64,
}

impl Event {
    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::CalibrationStarted => "calibration_started",
            Event::CalibrationUpdate { .. } => "calibration_update",
            Event::CalibrationComplete { .. } => "calibration_complete",
            Event::VoltageSet { .. } => "voltage_set",
            Event::CurrentData(_) => "current_data",
            Event::Overcurrent { .. } => "overcurrent",
            Event::MonitoringStopped => "monitoring_stopped",
            Event::CorrectionUpdated { .. } => "correction_updated",
            Event::Error { .. } => "error",
        }
    }
}

/// Sink for controller events. Called from controller and worker threads.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: Event);
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn publish(&self, event: Event) {
        (**self).publish(event);
    }
}

/// Forwards events into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: xch::Sender<Event>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its (unbounded) channel.
    pub fn new() -> (Self, xch::Receiver<Event>) {
        let (tx, rx) = xch::unbounded();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: Event) {
        // A departed consumer is not the controller's problem.
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = e.0.name(), "event receiver gone; dropping");
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, event: Event) {
        match &event {
            Event::CalibrationUpdate {
                code,
                voltage,
                percent,
            } => debug!(code, voltage, percent, "calibration_update"),
            Event::CurrentData(r) => debug!(
                shunt_v = r.shunt_voltage,
                measured_ma = r.measured_current,
                corrected_ma = r.corrected_current,
                code = r.dac_code,
                "current_data"
            ),
            Event::Overcurrent { current, limit } => {
                warn!(current_ma = current, limit_ma = limit, "overcurrent")
            }
            Event::Error { message } => error!(%message, "error"),
            other => info!(event = ?other, "{}", other.name()),
        }
    }
}

/// Fan an event out to several sinks in order.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

impl Notifier for FanoutNotifier {
    fn publish(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_delivers_in_order() {
        let (n, rx) = ChannelNotifier::new();
        n.publish(Event::CalibrationStarted);
        n.publish(Event::MonitoringStopped);
        let names: Vec<&str> = rx.try_iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["calibration_started", "monitoring_stopped"]);
    }

    #[test]
    fn channel_notifier_survives_dropped_receiver() {
        let (n, rx) = ChannelNotifier::new();
        drop(rx);
        n.publish(Event::MonitoringStopped);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, rx_a) = ChannelNotifier::new();
        let (b, rx_b) = ChannelNotifier::new();
        let fan = FanoutNotifier::new(vec![Arc::new(a), Arc::new(b)]);
        fan.publish(Event::CorrectionUpdated { a: 1.0, b: 2.0 });
        assert_eq!(rx_a.try_iter().count(), 1);
        assert_eq!(rx_b.try_iter().count(), 1);
    }
}
