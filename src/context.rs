//! [`SwapContext`]: the ambient handle the embedding application builds
//! once at startup and hands to both coordinators. Bundles the adapter
//! registry and the refund watchdog so a caller never has to wire the
//! two together by hand, and never has to remember to start monitoring.

use crate::registry::AdapterRegistry;
use crate::standard::StandardCoordinator;
use crate::watchdog::{RefundWatchdog, WatchdogConfig};
use std::sync::Arc;

use crate::privacy_hub::PrivacyHubCoordinator;

pub struct SwapContext {
    pub registry: Arc<AdapterRegistry>,
    pub watchdog: Arc<RefundWatchdog>,
}

impl SwapContext {
    /// Build a context from an already-populated, already-initialized
    /// registry. Starts the watchdog's background scan loop immediately.
    pub fn new(registry: AdapterRegistry, watchdog_config: WatchdogConfig) -> Self {
        let registry = Arc::new(registry);
        let watchdog = RefundWatchdog::new(registry.clone(), watchdog_config);
        watchdog.start_monitoring();
        Self { registry, watchdog }
    }

    pub fn standard_coordinator(&self) -> StandardCoordinator {
        StandardCoordinator::new(self.registry.clone(), self.watchdog.clone())
    }

    pub fn privacy_hub_coordinator(&self) -> PrivacyHubCoordinator {
        PrivacyHubCoordinator::new(self.registry.clone(), self.watchdog.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdapterRegistry;

    #[tokio::test]
    async fn building_a_context_starts_the_watchdog_without_panicking() {
        let registry = AdapterRegistry::new();
        let context = SwapContext::new(registry, WatchdogConfig::default());
        let stats = context.watchdog.stats().await;
        assert_eq!(stats.pending, 0);
    }
}
