use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounterVec, IntGauge, Registry};
use tracing::error;

use crate::signal::WatchdogSignal;

lazy_static! {
    static ref WATCHDOG_OBSERVERS: IntGauge =
        IntGauge::new("webpilot_watchdog_observers", "Watchdog observers currently attached").unwrap();
    static ref WATCHDOG_SIGNALS: IntCounterVec = IntCounterVec::new(
        opts!(
            "webpilot_watchdog_signals_total",
            "Signals raised grouped by category and severity"
        ),
        &["category", "severity"]
    )
    .unwrap();
    static ref WATCHDOG_LAGGED: IntCounterVec = IntCounterVec::new(
        opts!(
            "webpilot_watchdog_lagged_events_total",
            "Session events skipped because an observer fell behind"
        ),
        &["watchdog"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register watchdog metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, WATCHDOG_OBSERVERS.clone());
    register(registry, WATCHDOG_SIGNALS.clone());
    register(registry, WATCHDOG_LAGGED.clone());
}

pub fn observer_attached() {
    WATCHDOG_OBSERVERS.inc();
}

pub fn observer_detached() {
    WATCHDOG_OBSERVERS.dec();
}

pub fn record_signal(signal: &WatchdogSignal) {
    WATCHDOG_SIGNALS
        .with_label_values(&[signal.category().as_str(), signal.severity.as_str()])
        .inc();
}

pub fn record_lagged(watchdog: &str, skipped: u64) {
    WATCHDOG_LAGGED
        .with_label_values(&[watchdog])
        .inc_by(skipped);
}
