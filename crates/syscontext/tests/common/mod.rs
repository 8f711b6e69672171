//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Once;
use syscontext::config::ContextConfig;
use syscontext::domain::{ApplicationConfig, ConfigurationItem, RecordId};
use syscontext::storage::in_memory::new_in_memory_storage;
use syscontext::SystemContext;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Fresh in-memory context with default configuration
pub fn new_context() -> SystemContext {
    init_tracing();
    SystemContext::new(new_in_memory_storage(), ContextConfig::default())
        .expect("default configuration is valid")
}

/// Register an application, panicking on failure
pub async fn app(context: &SystemContext, name: &str) -> ApplicationConfig {
    context
        .add_app(name, None)
        .await
        .expect("Failed to add application")
}

/// Add a configuration item, panicking on failure
pub async fn item(
    context: &SystemContext,
    app: RecordId,
    key: &str,
    value: &str,
    parent: Option<RecordId>,
) -> ConfigurationItem {
    context
        .add_item(app, key, value, parent)
        .await
        .expect("Failed to add configuration item")
}
