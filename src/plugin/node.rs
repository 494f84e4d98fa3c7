//! Plugins and their registry entries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginError;
use crate::plugin::context::Context;
use crate::plugin::gate::{ReadinessGate, Ready};

/// A startup extension.
///
/// Hooks of unrelated plugins may run concurrently. A plugin that runs after
/// another is not called until that one is ready. A plugin becomes ready when
/// it fires `ready` or when its hook returns `Ok`, whichever comes first.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn before_server_start(&self, _ctx: &Context, _ready: &Ready) -> Result<(), PluginError> {
        Ok(())
    }

    async fn before_process_start(&self, _ctx: &Context, _ready: &Ready) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Default base weight of a node.
pub const DEFAULT_WEIGHT: u64 = 1;

/// A registered plugin with its ordering attributes.
pub struct PluginNode {
    plugin: Arc<dyn Plugin>,
    name: String,
    after: Option<String>,
    after_plug: Option<usize>,
    weight: u64,
    order_index: u64,
    gate: ReadinessGate,
}

impl PluginNode {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        let name = plugin.name().to_string();
        Self {
            plugin,
            name,
            after: None,
            after_plug: None,
            weight: DEFAULT_WEIGHT,
            order_index: DEFAULT_WEIGHT,
            gate: ReadinessGate::new(),
        }
    }

    /// Run after the plugin registered as `name`.
    pub fn at_after(mut self, name: impl Into<String>) -> Self {
        self.after = Some(name.into());
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self.order_index = weight;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Declared predecessor name.
    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Resolved predecessor, as a registry index.
    pub fn after_plug(&self) -> Option<usize> {
        self.after_plug
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Position in the startup order. Valid once the registry has resolved.
    pub fn order_index(&self) -> u64 {
        self.order_index
    }

    /// Gate dependents wait on.
    pub fn ready_gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub(crate) fn set_after(&mut self, name: String, index: usize) {
        self.after = Some(name);
        self.after_plug = Some(index);
    }

    pub(crate) fn set_after_plug(&mut self, index: Option<usize>) {
        self.after_plug = index;
    }

    pub(crate) fn set_order_index(&mut self, order_index: u64) {
        self.order_index = order_index;
    }

    /// Fresh gate for the next lifecycle phase.
    pub(crate) fn rearm(&mut self) {
        self.gate = ReadinessGate::new();
    }
}

impl std::fmt::Debug for PluginNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginNode")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("weight", &self.weight)
            .field("order_index", &self.order_index)
            .finish()
    }
}
