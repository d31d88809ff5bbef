//! [`AdapterRegistry`]: a process-wide `Chain -> adapter` dictionary
//! (§4.2). Unique per chain, constructed once at startup; no adapter is
//! used before its `initialize` has completed successfully.

use crate::adapter::ChainAdapter;
use crate::chain::Chain;
use crate::error::{AdapterError, Error, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Chain, Arc<RwLock<dyn ChainAdapter>>>,
    initialized: std::collections::HashSet<Chain>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            initialized: std::collections::HashSet::new(),
        }
    }

    /// Register an adapter for its chain. Overwrites any prior
    /// registration for the same chain (restart-time reconfiguration).
    pub fn register(&mut self, adapter: impl ChainAdapter + 'static) {
        let chain = adapter.chain();
        self.adapters.insert(chain, Arc::new(RwLock::new(adapter)));
        self.initialized.remove(&chain);
    }

    pub fn lookup(&self, chain: Chain) -> Result<Arc<RwLock<dyn ChainAdapter>>> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or(Error::Adapter(AdapterError::NotFound(chain)))
    }

    /// Call `initialize` on every registered adapter in parallel,
    /// collecting per-chain errors rather than failing fast.
    pub async fn initialize_all(&mut self) -> Vec<(Chain, Result<()>)> {
        let chains: Vec<Chain> = self.adapters.keys().copied().collect();
        let futures = chains.iter().map(|chain| {
            let adapter = self.adapters[chain].clone();
            async move {
                let mut guard = adapter.write().await;
                guard.initialize().await
            }
        });
        let outcomes = join_all(futures).await;

        let mut results = Vec::with_capacity(chains.len());
        for (chain, outcome) in chains.into_iter().zip(outcomes) {
            if outcome.is_ok() {
                self.initialized.insert(chain);
            }
            log::info!("adapter initialize {chain:?}: {}", if outcome.is_ok() { "ok" } else { "failed" });
            results.push((chain, outcome));
        }
        results
    }

    /// Look up an adapter, failing unless it has completed initialization.
    pub fn lookup_ready(&self, chain: Chain) -> Result<Arc<RwLock<dyn ChainAdapter>>> {
        if !self.initialized.contains(&chain) {
            return Err(Error::Adapter(AdapterError::NotInitialized(chain)));
        }
        self.lookup(chain)
    }

    pub fn registered_chains(&self) -> Vec<Chain> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EvmAdapter;

    #[test]
    fn lookup_fails_for_unregistered_chain() {
        let registry = AdapterRegistry::new();
        assert!(registry.lookup(Chain::Evm).is_err());
    }

    #[tokio::test]
    async fn initialize_all_reports_failure_without_panicking() {
        let mut registry = AdapterRegistry::new();
        registry.register(EvmAdapter::new("http://127.0.0.1:1", "0xhtlc"));
        let results = registry.initialize_all().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_err());
        assert!(registry.lookup_ready(Chain::Evm).is_err());
    }
}
