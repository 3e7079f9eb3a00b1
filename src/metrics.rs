use anyhow::{Context, Result};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Register the collectors of every crate once per process.
pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        action_registry::metrics::register_metrics(registry);
        watchdog::metrics::register_metrics(registry);
        agent_core::metrics::register_metrics(registry);
    });
}

/// Prometheus text exposition of the global registry.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics output is not utf-8")
}
