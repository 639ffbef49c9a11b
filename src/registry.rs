use failsafe::futures::CircuitBreaker;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::social::default_platforms;
use crate::adapters::{
    BreachAdapter, DomainAdapter, PhoneAdapter, SocialExistenceAdapter, SourceAdapter,
};
use crate::cache_validator::ResponseCache;
use crate::circuit_breaker::{create_adapter_circuit_breaker, AdapterBreaker};
use crate::config::Config;
use crate::errors::AdapterError;
use crate::models::{AdapterKind, AdapterQuery, Findings};

/// An adapter together with its call policy.
#[derive(Clone)]
pub struct RegisteredAdapter {
    pub adapter: Arc<dyn SourceAdapter>,
    pub timeout: Duration,
    breaker: AdapterBreaker,
}

impl RegisteredAdapter {
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// Run one probe under the adapter's timeout and circuit breaker.
    ///
    /// Only timeouts and transport errors count against the breaker.
    pub async fn invoke(&self, query: &AdapterQuery) -> Result<Findings, AdapterError> {
        let budget = self.timeout;
        let call = async {
            match tokio::time::timeout(budget, self.adapter.probe(query)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout(budget)),
            }
        };

        match self
            .breaker
            .call_with(|e: &AdapterError| e.trips_breaker(), call)
            .await
        {
            Ok(findings) => Ok(findings),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Circuit open for adapter {}, skipping call", self.name());
                Err(AdapterError::Unavailable)
            }
        }
    }
}

/// The active adapter set.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<RegisteredAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter with its own per-call budget and a fresh breaker.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, timeout: Duration) -> &mut Self {
        tracing::debug!("Registering adapter {} (timeout {:?})", adapter.name(), timeout);
        self.adapters.push(RegisteredAdapter {
            adapter,
            timeout,
            breaker: create_adapter_circuit_breaker(),
        });
        self
    }

    /// Breach, domain and phone adapters plus one social adapter per default platform.
    pub fn from_config(config: &Config) -> Result<Self, AdapterError> {
        let cache = ResponseCache::default();
        let mut registry = Self::new();

        registry
            .register(
                Arc::new(BreachAdapter::from_config(config, cache.clone())?),
                config.breach_timeout(),
            )
            .register(
                Arc::new(DomainAdapter::from_config(config, cache)?),
                config.domain_timeout(),
            )
            .register(
                Arc::new(PhoneAdapter::from_config(config)?),
                config.phone_timeout(),
            );

        for platform in default_platforms() {
            registry.register(
                Arc::new(SocialExistenceAdapter::new(platform, config.social_timeout())?),
                config.social_timeout(),
            );
        }

        tracing::info!("Adapter registry ready with {} adapters", registry.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn adapters(&self) -> &[RegisteredAdapter] {
        &self.adapters
    }

    /// Adapters that accept `query`, in registration order.
    pub fn applicable<'a>(
        &'a self,
        query: &'a AdapterQuery,
    ) -> impl Iterator<Item = &'a RegisteredAdapter> + 'a {
        self.adapters.iter().filter(move |r| r.adapter.accepts(query))
    }

    /// Longest per-call budget; the pass deadline is this plus a margin.
    pub fn max_timeout(&self) -> Duration {
        self.adapters
            .iter()
            .map(|r| r.timeout)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        error: AdapterError,
    }

    #[async_trait]
    impl SourceAdapter for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn kind(&self) -> AdapterKind {
            AdapterKind::Breach
        }
        fn accepts(&self, query: &AdapterQuery) -> bool {
            matches!(query, AdapterQuery::Email(_))
        }
        async fn probe(&self, _query: &AdapterQuery) -> Result<Findings, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl SourceAdapter for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn kind(&self) -> AdapterKind {
            AdapterKind::Phone
        }
        fn accepts(&self, _query: &AdapterQuery) -> bool {
            true
        }
        async fn probe(&self, _query: &AdapterQuery) -> Result<Findings, AdapterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Findings::Breaches(Vec::new()))
        }
    }

    fn email() -> AdapterQuery {
        AdapterQuery::Email("jane@example.com".to_string())
    }

    #[tokio::test]
    async fn test_breaker_opens_after_transport_failures() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            error: AdapterError::transport("connection refused"),
        });
        let mut registry = AdapterRegistry::new();
        registry.register(flaky.clone(), Duration::from_secs(1));
        let adapter = &registry.adapters()[0];

        for _ in 0..crate::circuit_breaker::FAILURE_THRESHOLD {
            let err = adapter.invoke(&email()).await.unwrap_err();
            assert!(matches!(err, AdapterError::Transport(_)));
        }

        let err = adapter.invoke(&email()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable));
        assert_eq!(
            flaky.calls.load(Ordering::SeqCst),
            crate::circuit_breaker::FAILURE_THRESHOLD as usize
        );
    }

    #[tokio::test]
    async fn test_malformed_input_does_not_open_breaker() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            error: AdapterError::MalformedInput {
                reason: "bad".to_string(),
                suggestion: None,
            },
        });
        let mut registry = AdapterRegistry::new();
        registry.register(flaky.clone(), Duration::from_secs(1));
        let adapter = &registry.adapters()[0];

        for _ in 0..10 {
            let err = adapter.invoke(&email()).await.unwrap_err();
            assert!(matches!(err, AdapterError::MalformedInput { .. }));
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(Slow), Duration::from_millis(50));

        let err = registry.adapters()[0].invoke(&email()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
    }

    #[test]
    fn test_applicable_and_max_timeout() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(
                Arc::new(Flaky {
                    calls: AtomicUsize::new(0),
                    error: AdapterError::Unavailable,
                }),
                Duration::from_secs(10),
            )
            .register(Arc::new(Slow), Duration::from_secs(3));

        let phone = AdapterQuery::Phone("+15555550100".to_string());
        assert_eq!(registry.applicable(&email()).count(), 2);
        assert_eq!(registry.applicable(&phone).count(), 1);
        assert_eq!(registry.max_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_config_registers_one_social_adapter_per_platform() {
        let registry = AdapterRegistry::from_config(&Config::default()).unwrap();
        let social = registry
            .adapters()
            .iter()
            .filter(|r| r.kind() == AdapterKind::Social)
            .count();
        assert_eq!(social, default_platforms().len());
        assert_eq!(registry.len(), social + 3);
    }
}
