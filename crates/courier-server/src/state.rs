//! Shared state for HTTP handlers
//!
//! TigerStyle: Cheap to clone, one registry per process.

use courier_registry::InstanceRegistry;
use std::sync::Arc;
use std::time::Instant;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<InstanceRegistry>,
    start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                start_time: Instant::now(),
            }),
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.inner.registry
    }

    /// Seconds since the state was created
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
