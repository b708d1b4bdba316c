//! Static service discovery.
//!
//! Instances come from the `services` section of the configuration and are
//! handed out round-robin per service.

use portcullis_config::{InstanceConfig, ServiceConfig};
use portcullis_core::{BoxFuture, Instance, ServiceResolver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct Pool {
    instances: Vec<Instance>,
    cursor: AtomicUsize,
}

impl Pool {
    fn next(&self) -> Option<Instance> {
        if self.instances.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        self.instances.get(index).cloned()
    }
}

/// Resolves services to configured instances, rotating between them.
#[derive(Debug, Default)]
pub struct StaticServiceResolver {
    pools: HashMap<String, Pool>,
}

impl StaticServiceResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the instances for `service_id`.
    #[must_use]
    pub fn with_instances(mut self, service_id: impl Into<String>, instances: Vec<Instance>) -> Self {
        self.pools.insert(
            service_id.into(),
            Pool {
                instances,
                cursor: AtomicUsize::new(0),
            },
        );
        self
    }

    /// Builds a resolver from the configured services.
    pub fn from_config<'a>(services: impl IntoIterator<Item = (&'a String, &'a ServiceConfig)>) -> Self {
        services
            .into_iter()
            .fold(Self::new(), |resolver, (service_id, service)| {
                let instances = service
                    .instances
                    .iter()
                    .map(|config| instance_from_config(service_id, config))
                    .collect();
                resolver.with_instances(service_id.clone(), instances)
            })
    }

    /// Returns the number of instances configured for `service_id`.
    #[must_use]
    pub fn instance_count(&self, service_id: &str) -> usize {
        self.pools.get(service_id).map_or(0, |p| p.instances.len())
    }
}

fn instance_from_config(service_id: &str, config: &InstanceConfig) -> Instance {
    let mut instance = Instance::new(service_id, &config.host, config.port);
    instance.scheme.clone_from(&config.scheme);
    instance.metadata.clone_from(&config.metadata);
    instance
}

impl ServiceResolver for StaticServiceResolver {
    fn resolve_instance<'a>(&'a self, service_id: &'a str) -> BoxFuture<'a, Option<Instance>> {
        let instance = self.pools.get(service_id).and_then(Pool::next);
        trace!(service = %service_id, found = instance.is_some(), "resolved instance");
        Box::pin(async move { instance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn instance(host: &str, port: u16) -> InstanceConfig {
        InstanceConfig {
            host: host.to_string(),
            port,
            scheme: "http".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_round_robin() {
        let mut services = BTreeMap::new();
        services.insert(
            "orders".to_string(),
            ServiceConfig {
                instances: vec![instance("10.0.0.1", 8080), instance("10.0.0.2", 8080)],
                ..Default::default()
            },
        );
        let resolver = StaticServiceResolver::from_config(&services);

        let hosts: Vec<String> = resolve_hosts(&resolver, 3).await;
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.1"]);
        assert_eq!(resolver.instance_count("orders"), 2);
    }

    async fn resolve_hosts(resolver: &StaticServiceResolver, n: usize) -> Vec<String> {
        let mut hosts = Vec::new();
        for _ in 0..n {
            hosts.push(resolver.resolve_instance("orders").await.unwrap().host);
        }
        hosts
    }

    #[tokio::test]
    async fn test_unknown_or_empty_service_resolves_nothing() {
        let resolver = StaticServiceResolver::new().with_instances("billing", Vec::new());

        assert!(resolver.resolve_instance("billing").await.is_none());
        assert!(resolver.resolve_instance("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_and_scheme_carried() {
        let mut config = instance("billing.internal", 443);
        config.scheme = "https".to_string();
        config.metadata.insert(Instance::BASE_PATH.to_string(), "/v2".to_string());

        let mut services = BTreeMap::new();
        services.insert(
            "billing".to_string(),
            ServiceConfig {
                instances: vec![config],
                ..Default::default()
            },
        );
        let resolver = StaticServiceResolver::from_config(&services);

        let resolved = resolver.resolve_instance("billing").await.unwrap();
        assert_eq!(resolved.base_url(), "https://billing.internal:443");
        assert_eq!(resolved.base_path(), Some("/v2"));
        assert_eq!(resolved.service_id, "billing");
    }
}
