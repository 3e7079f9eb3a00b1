use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref ACTIONS_REGISTERED: IntGauge =
        IntGauge::new("webpilot_actions_registered", "Actions currently registered").unwrap();
    static ref ACTIONS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        opts!(
            "webpilot_actions_dispatched_total",
            "Dispatched actions grouped by name and outcome"
        ),
        &["action", "outcome"]
    )
    .unwrap();
    static ref ACTIONS_REJECTED: IntCounterVec = IntCounterVec::new(
        opts!(
            "webpilot_actions_rejected_total",
            "Actions rejected before dispatch grouped by reason"
        ),
        &["reason"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register action registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, ACTIONS_REGISTERED.clone());
    register(registry, ACTIONS_DISPATCHED.clone());
    register(registry, ACTIONS_REJECTED.clone());
}

pub fn set_registered_count(count: usize) {
    ACTIONS_REGISTERED.set(count as i64);
}

pub fn record_dispatch(action: &str, outcome: &str) {
    ACTIONS_DISPATCHED
        .with_label_values(&[action, outcome])
        .inc();
}

pub fn record_rejection(reason: &str) {
    ACTIONS_REJECTED.with_label_values(&[reason]).inc();
}
