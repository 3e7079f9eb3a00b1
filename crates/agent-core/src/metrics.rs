use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;

lazy_static! {
    static ref AGENT_STEPS: IntCounterVec = IntCounterVec::new(
        opts!("webpilot_agent_steps_total", "Recorded steps grouped by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref AGENT_RUNS: IntCounterVec = IntCounterVec::new(
        opts!("webpilot_agent_runs_total", "Finished runs grouped by final state"),
        &["state"]
    )
    .unwrap();
    static ref AGENT_ENGINE_RETRIES: IntCounter = IntCounter::new(
        "webpilot_agent_engine_retries_total",
        "Engine calls retried after a transient error",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register agent metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, AGENT_STEPS.clone());
    register(registry, AGENT_RUNS.clone());
    register(registry, AGENT_ENGINE_RETRIES.clone());
}

pub fn record_step(outcome: &str) {
    AGENT_STEPS.with_label_values(&[outcome]).inc();
}

pub fn record_run(state: &str) {
    AGENT_RUNS.with_label_values(&[state]).inc();
}

pub fn record_engine_retry() {
    AGENT_ENGINE_RETRIES.inc();
}
