//! Plugin ordering and phased startup.
//!
//! # Ordering
//! ```text
//! order_index(n) = weight(n) + order_index(after(n))   if n runs after another
//!                = weight(n)                           otherwise
//! ```
//! Startup order is ascending `order_index`, ties in registration order.
//! Predecessor links form a forest of chains; cycles are rejected when they
//! are introduced.
//!
//! # Phases
//! Every plugin gets its own task. A task whose plugin runs after another
//! waits for that plugin's gate, calls the hook, then opens its own gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{ConfigurationError, PluginError, ServerError};
use crate::observability::metrics;
use crate::plugin::context::{Context, LifecyclePhase};
use crate::plugin::gate::Ready;
use crate::plugin::node::PluginNode;

/// Snapshot of one plugin for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub after: Option<String>,
    pub weight: u64,
    pub order_index: u64,
    pub ready: bool,
}

/// Owns every registered plugin node.
#[derive(Default)]
pub struct PluginRegistry {
    nodes: Vec<PluginNode>,
    by_name: HashMap<String, usize>,
    resolved: bool,
    ready_timeout: Option<Duration>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long a plugin waits for its predecessor. `None` waits forever.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PluginNode> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[PluginNode] {
        &self.nodes
    }

    /// Add a node. Duplicate names and cycles are rejected.
    pub fn register(&mut self, node: PluginNode) -> Result<usize, ConfigurationError> {
        if self.by_name.contains_key(node.name()) {
            return Err(ConfigurationError::DuplicatePlugin(node.name().to_string()));
        }

        if let Some(after) = node.after() {
            if let Some(cycle) = self.cycle_through(node.name(), after) {
                return Err(ConfigurationError::DependencyCycle(cycle));
            }
        }

        let index = self.nodes.len();
        tracing::debug!(plugin = %node.name(), after = ?node.after(), "Plugin registered");
        self.by_name.insert(node.name().to_string(), index);
        self.nodes.push(node);
        self.resolved = false;
        Ok(index)
    }

    /// Make `node` run after `after`, both given as registry indices.
    pub fn set_after_plug(&mut self, node: usize, after: usize) -> Result<(), ConfigurationError> {
        if node >= self.nodes.len() {
            return Err(ConfigurationError::DanglingPredecessor(node));
        }
        if after >= self.nodes.len() {
            return Err(ConfigurationError::DanglingPredecessor(after));
        }

        let name = self.nodes[node].name().to_string();
        let after_name = self.nodes[after].name().to_string();
        if let Some(cycle) = self.cycle_through(&name, &after_name) {
            return Err(ConfigurationError::DependencyCycle(cycle));
        }

        self.nodes[node].set_after(after_name, after);
        self.resolved = false;
        Ok(())
    }

    /// Walk the chain starting at `after`; report the path if it reaches `name`.
    fn cycle_through(&self, name: &str, after: &str) -> Option<Vec<String>> {
        let mut path = vec![name.to_string()];
        let mut next = Some(after);

        while let Some(current) = next {
            path.push(current.to_string());
            if current == name {
                return Some(path);
            }
            // The existing graph is acyclic, so every walk ends.
            next = self.get(current).and_then(PluginNode::after);
        }
        None
    }

    /// Resolve predecessor names and compute order indices.
    pub fn resolve(&mut self) -> Result<(), ConfigurationError> {
        for i in 0..self.nodes.len() {
            let after = match self.nodes[i].after() {
                Some(after) => Some(*self.by_name.get(after).ok_or_else(|| {
                    ConfigurationError::UnresolvedPredecessor {
                        plugin: self.nodes[i].name().to_string(),
                        after: after.to_string(),
                    }
                })?),
                None => None,
            };
            self.nodes[i].set_after_plug(after);
        }

        let mut memo: Vec<Option<u64>> = vec![None; self.nodes.len()];
        for start in 0..self.nodes.len() {
            self.order_index_of(start, &mut memo)?;
        }
        for (node, index) in self.nodes.iter_mut().zip(memo) {
            node.set_order_index(index.unwrap_or(node.weight()));
        }

        self.resolved = true;
        Ok(())
    }

    /// Memoised, iterative prefix sum along the predecessor chain.
    fn order_index_of(&self, start: usize, memo: &mut [Option<u64>]) -> Result<u64, ConfigurationError> {
        let mut chain = Vec::new();
        let mut on_chain = vec![false; self.nodes.len()];
        let mut current = Some(start);

        while let Some(i) = current {
            if memo[i].is_some() {
                break;
            }
            if on_chain[i] {
                let mut cycle: Vec<String> = chain.iter().map(|&j: &usize| self.nodes[j].name().to_string()).collect();
                cycle.push(self.nodes[i].name().to_string());
                return Err(ConfigurationError::DependencyCycle(cycle));
            }
            on_chain[i] = true;
            chain.push(i);
            current = self.nodes[i].after_plug();
        }

        while let Some(i) = chain.pop() {
            let base = self.nodes[i].after_plug().and_then(|p| memo[p]).unwrap_or(0);
            memo[i] = Some(base + self.nodes[i].weight());
        }

        Ok(memo[start].unwrap_or(0))
    }

    /// Node indices in startup order.
    pub fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        // sort_by_key is stable, so ties keep registration order.
        order.sort_by_key(|&i| self.nodes[i].order_index());
        order
    }

    pub fn ordered_names(&self) -> Vec<&str> {
        self.order().into_iter().map(|i| self.nodes[i].name()).collect()
    }

    pub fn statuses(&self) -> Vec<PluginStatus> {
        self.order()
            .into_iter()
            .map(|i| {
                let node = &self.nodes[i];
                PluginStatus {
                    name: node.name().to_string(),
                    after: node.after().map(str::to_string),
                    weight: node.weight(),
                    order_index: node.order_index(),
                    ready: node.is_ready(),
                }
            })
            .collect()
    }

    /// Run one lifecycle phase across every plugin.
    ///
    /// The first hook error or predecessor timeout aborts the phase.
    pub async fn run(&mut self, phase: LifecyclePhase, ctx: &Context) -> Result<(), ServerError> {
        if !self.resolved {
            self.resolve()?;
        }
        if self.nodes.is_empty() {
            return Ok(());
        }

        for node in &mut self.nodes {
            node.rearm();
        }

        let ctx = ctx.with_phase(phase);
        let mut tasks = JoinSet::new();

        for i in self.order() {
            let node = &self.nodes[i];
            let plugin = Arc::clone(node.plugin());
            let name = node.name().to_string();
            let gate = node.ready_gate().clone();
            let predecessor = node
                .after_plug()
                .map(|p| (self.nodes[p].name().to_string(), self.nodes[p].ready_gate().clone()));
            let timeout = self.ready_timeout;
            let ctx = ctx.clone();

            tasks.spawn(async move {
                if let Some((after, predecessor)) = predecessor {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, predecessor.wait())
                            .await
                            .map_err(|_| PluginError::ReadyTimeout {
                                plugin: name.clone(),
                                after: after.clone(),
                                secs: limit.as_secs(),
                            })?,
                        None => predecessor.wait().await,
                    }
                    tracing::debug!(plugin = %name, after = %after, "Predecessor ready");
                }

                let ready = Ready::new(gate.clone());
                match phase {
                    LifecyclePhase::BeforeServerStart => plugin.before_server_start(&ctx, &ready).await?,
                    LifecyclePhase::BeforeProcessStart => plugin.before_process_start(&ctx, &ready).await?,
                }
                gate.fire();
                tracing::debug!(plugin = %name, phase = %phase, "Plugin ready");
                Ok::<_, PluginError>(name)
            });
        }

        let mut ready = 0;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(PluginError::Panicked(e.to_string())),
            };
            if let Err(e) = result {
                tasks.abort_all();
                tracing::error!(phase = %phase, error = %e, "Plugin phase aborted");
                return Err(e.into());
            }
            ready += 1;
            metrics::record_plugins_ready(phase.as_str(), ready);
        }

        tracing::info!(phase = %phase, plugins = ready, "Plugin phase complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::net::connection::Connections;
    use crate::plugin::node::Plugin;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    struct Named(&'static str);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn node(name: &'static str) -> PluginNode {
        PluginNode::new(Arc::new(Named(name)))
    }

    fn ctx() -> Context {
        Context::new(Arc::new(ServerConfig::default()), Connections::new())
    }

    #[test]
    fn chain_order_index_is_prefix_sum() {
        let mut registry = PluginRegistry::new();
        registry.register(node("a").with_weight(3)).unwrap();
        registry.register(node("b").at_after("a").with_weight(5)).unwrap();
        registry.register(node("c").at_after("b").with_weight(2)).unwrap();
        registry.register(node("d").at_after("c")).unwrap();
        registry.resolve().unwrap();

        let index = |name| registry.get(name).unwrap().order_index();
        assert_eq!(index("a"), 3);
        assert_eq!(index("b"), 8);
        assert_eq!(index("c"), 10);
        assert_eq!(index("d"), 11);
    }

    #[test]
    fn order_is_stable_and_resolves_forward_references() {
        let mut registry = PluginRegistry::new();
        registry.register(node("late").at_after("base")).unwrap();
        registry.register(node("x")).unwrap();
        registry.register(node("base")).unwrap();
        registry.register(node("y")).unwrap();
        registry.resolve().unwrap();

        assert_eq!(registry.ordered_names(), vec!["x", "base", "y", "late"]);
    }

    #[test]
    fn shared_predecessor_forms_a_forest() {
        let mut registry = PluginRegistry::new();
        registry.register(node("root").with_weight(2)).unwrap();
        registry.register(node("left").at_after("root")).unwrap();
        registry.register(node("right").at_after("root").with_weight(4)).unwrap();
        registry.resolve().unwrap();

        assert_eq!(registry.get("left").unwrap().order_index(), 3);
        assert_eq!(registry.get("right").unwrap().order_index(), 6);
        assert_eq!(registry.get("left").unwrap().after_plug(), Some(0));
    }

    #[test]
    fn cycle_is_rejected_at_registration() {
        let mut registry = PluginRegistry::new();
        registry.register(node("a").at_after("b")).unwrap();

        let err = registry.register(node("b").at_after("a")).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DependencyCycle(vec!["b".into(), "a".into(), "b".into()])
        );
        assert!(registry.get("b").is_none());

        let self_loop = registry.register(node("s").at_after("s")).unwrap_err();
        assert!(matches!(self_loop, ConfigurationError::DependencyCycle(_)));
    }

    #[test]
    fn set_after_plug_rejects_cycles_and_dangling_indices() {
        let mut registry = PluginRegistry::new();
        let a = registry.register(node("a")).unwrap();
        let b = registry.register(node("b").at_after("a")).unwrap();

        assert!(matches!(
            registry.set_after_plug(a, b),
            Err(ConfigurationError::DependencyCycle(_))
        ));
        assert_eq!(
            registry.set_after_plug(a, 7),
            Err(ConfigurationError::DanglingPredecessor(7))
        );

        let c = registry.register(node("c")).unwrap();
        registry.set_after_plug(c, b).unwrap();
        registry.resolve().unwrap();
        assert_eq!(registry.get("c").unwrap().order_index(), 3);
    }

    #[test]
    fn unresolved_predecessor_is_fatal() {
        let mut registry = PluginRegistry::new();
        registry.register(node("a").at_after("ghost")).unwrap();
        assert_eq!(
            registry.resolve(),
            Err(ConfigurationError::UnresolvedPredecessor {
                plugin: "a".into(),
                after: "ghost".into(),
            })
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(node("a")).unwrap();
        assert_eq!(
            registry.register(node("a")).unwrap_err(),
            ConfigurationError::DuplicatePlugin("a".into())
        );
    }

    /// Both hooks must be inside `before_server_start` at once to pass the barrier.
    struct Rendezvous {
        name: &'static str,
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl Plugin for Rendezvous {
        fn name(&self) -> &str {
            self.name
        }

        async fn before_server_start(&self, _ctx: &Context, _ready: &Ready) -> Result<(), PluginError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn independent_plugins_start_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let mut registry = PluginRegistry::new().with_ready_timeout(Some(Duration::from_secs(1)));
        for name in ["one", "two"] {
            registry
                .register(PluginNode::new(Arc::new(Rendezvous {
                    name,
                    barrier: Arc::clone(&barrier),
                })))
                .unwrap();
        }

        tokio::time::timeout(
            Duration::from_secs(2),
            registry.run(LifecyclePhase::BeforeServerStart, &ctx()),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(registry.statuses().iter().all(|s| s.ready));
    }

    struct Logged {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for Logged {
        fn name(&self) -> &str {
            self.name
        }

        async fn before_process_start(&self, _ctx: &Context, ready: &Ready) -> Result<(), PluginError> {
            if self.fail {
                return Err(PluginError::hook(self.name, "before_process_start", "boom"));
            }
            // Yield so an unordered dependent would get a chance to run first.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.log.lock().unwrap().push(self.name.to_string());
            ready.fire();
            Ok(())
        }
    }

    #[tokio::test]
    async fn dependent_waits_for_predecessor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let logged = |name, fail| {
            PluginNode::new(Arc::new(Logged {
                name,
                log: Arc::clone(&log),
                fail,
            }))
        };

        let mut registry = PluginRegistry::new();
        registry.register(logged("second", false).at_after("first")).unwrap();
        registry.register(logged("third", false).at_after("second")).unwrap();
        registry.register(logged("first", false)).unwrap();

        registry.run(LifecyclePhase::BeforeProcessStart, &ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_predecessor_times_out_dependent_or_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new().with_ready_timeout(Some(Duration::from_millis(200)));
        registry
            .register(PluginNode::new(Arc::new(Logged {
                name: "broken",
                log: Arc::clone(&log),
                fail: true,
            })))
            .unwrap();
        registry
            .register(
                PluginNode::new(Arc::new(Logged {
                    name: "after",
                    log: Arc::clone(&log),
                    fail: false,
                }))
                .at_after("broken"),
            )
            .unwrap();

        let err = registry
            .run(LifecyclePhase::BeforeProcessStart, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Plugin(PluginError::Hook { .. })));
        assert!(log.lock().unwrap().is_empty());
    }
}
