//! Logging setup and the logging capability handed to each component.
//!
//! The publisher and subscriber never reach for a global logger directly.
//! They receive an `Arc<dyn Log>` at construction; the default `TracingLog`
//! forwards to `tracing` and tags every line with the component name.

use std::sync::Arc;

/// Initialize tracing/logging for the application.
///
/// This uses a simple `with_max_level` configuration based on `default_level`.
pub fn init(default_level: &str) {
    let lvl = match default_level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    // Use try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}

/// Minimal logging capability injected into broker components.
pub trait Log: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// `Log` implementation backed by the `tracing` macros.
#[derive(Debug, Clone)]
pub struct TracingLog {
    component: &'static str,
}

impl TracingLog {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn shared(component: &'static str) -> Arc<dyn Log> {
        Arc::new(Self::new(component))
    }
}

impl Log for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!(component = self.component, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(component = self.component, "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(component = self.component, "{message}");
    }
}
