//! Failure Injection for the Mock Repository
//!
//! Supports configurable failure injection per route for testing error paths.

use std::collections::HashMap;
use std::time::Duration;

use super::Route;

/// Failure configuration for a route
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// HTTP status to answer with (if any)
    pub status: Option<u16>,
    /// Message carried in the JSON error body
    pub message: Option<String>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Fail at the transport level instead of answering
    pub disconnect: bool,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Answer with an error status
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Drop the connection without answering
    pub fn disconnect() -> Self {
        Self {
            disconnect: true,
            ..Default::default()
        }
    }

    /// Answer normally after a delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Default::default()
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Per-route failure injector
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<Route, FailureConfig>,
    call_counts: HashMap<Route, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, route: Route, config: FailureConfig) {
        self.configs.insert(route, config);
        self.call_counts.insert(route, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_route(&mut self, route: Route) {
        self.configs.remove(&route);
        self.call_counts.remove(&route);
    }

    /// The failure to apply to this call of `route`, if any.
    pub fn check(&mut self, route: Route) -> Option<FailureConfig> {
        let config = self.configs.get(&route)?;
        let count = self.call_counts.entry(route).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_status_applies_to_route_only() {
        let mut injector = FailureInjector::new();
        injector.inject(Route::GetArtifact, FailureConfig::status(503, "busy"));

        let failure = injector.check(Route::GetArtifact).unwrap();
        assert_eq!(failure.status, Some(503));
        assert_eq!(failure.message.as_deref(), Some("busy"));
        assert!(injector.check(Route::DeleteArtifact).is_none());
    }

    #[test]
    fn test_fail_count_limits_failures() {
        let mut injector = FailureInjector::new();
        injector.inject(Route::Aus, FailureConfig::disconnect().with_fail_count(2));

        assert!(injector.check(Route::Aus).is_some());
        assert!(injector.check(Route::Aus).is_some());
        assert!(injector.check(Route::Aus).is_none());
    }

    #[test]
    fn test_clear_route() {
        let mut injector = FailureInjector::new();
        injector.inject(Route::Status, FailureConfig::delay(Duration::from_millis(1)));
        injector.clear_route(Route::Status);
        assert!(injector.check(Route::Status).is_none());
    }
}
