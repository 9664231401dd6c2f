use super::QuarryModule;
use crate::aggregation::{OperatorImpl, OperatorRegistry};
use crate::codec::SegmentResolver;
use crate::collection::Document;
use crate::errors::QuarryResult;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// What a module may do while it is being loaded.
pub trait PluginRegistrarProvider: Send + Sync {
    fn register_operator(&self, name: &str, operator: OperatorImpl) -> QuarryResult<()>;

    fn register_segment_resolver(&self, resolver: SegmentResolver) -> QuarryResult<()>;

    fn plugin_config(&self, plugin: &str) -> Option<Document>;

    fn registry(&self) -> OperatorRegistry;
}

/// Registers module contributions with the plugin manager.
///
/// This is the facade handed to [QuarryModule::load]: it exposes the
/// operator registry, codec registration and the module's own configuration,
/// and nothing else.
pub struct PluginRegistrar {
    inner: Arc<dyn PluginRegistrarProvider>,
}

impl PluginRegistrar {
    pub fn new<T: PluginRegistrarProvider + 'static>(inner: T) -> Self {
        PluginRegistrar {
            inner: Arc::new(inner),
        }
    }

    /// Registers an operator of any kind.
    pub fn register_operator(&self, name: &str, operator: OperatorImpl) -> QuarryResult<()> {
        self.inner.register_operator(name, operator)
    }

    /// Registers an additional format or layout resolver.
    pub fn register_segment_resolver(&self, resolver: SegmentResolver) -> QuarryResult<()> {
        self.inner.register_segment_resolver(resolver)
    }

    /// Returns the configuration document supplied for `plugin`.
    pub fn plugin_config(&self, plugin: &str) -> Option<Document> {
        self.inner.plugin_config(plugin)
    }

    pub fn registry(&self) -> OperatorRegistry {
        self.inner.registry()
    }
}

/// Loads modules and keeps what they contribute.
///
/// # Responsibilities
///
/// * **Module Loading**: Hands every module a [PluginRegistrar]
/// * **Operator Registry**: Owns the registry modules register into
/// * **Segment Resolvers**: Keeps codec resolvers in registration order
/// * **Plugin Configuration**: Serves per-plugin configuration documents
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<PluginManagerInner>,
}

impl PluginManager {
    pub fn new() -> Self {
        PluginManager {
            inner: Arc::new(PluginManagerInner::new()),
        }
    }

    pub fn load_module(&self, module: Box<dyn QuarryModule>) -> QuarryResult<()> {
        log::debug!("Loading module {}", module.name());
        let registrar = PluginRegistrar::new(self.clone());
        module.load(&registrar)
    }

    pub fn set_plugin_config(&self, plugin: &str, config: Document) {
        self.inner.plugin_configs.insert(plugin.to_string(), config);
    }

    pub fn registry(&self) -> OperatorRegistry {
        self.inner.registry.clone()
    }

    /// Segment resolvers, most recently registered first.
    pub fn segment_resolvers(&self) -> Vec<SegmentResolver> {
        self.inner.resolvers.read().iter().rev().cloned().collect()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        PluginManager::new()
    }
}

impl PluginRegistrarProvider for PluginManager {
    fn register_operator(&self, name: &str, operator: OperatorImpl) -> QuarryResult<()> {
        self.inner.registry.register(name, operator)
    }

    fn register_segment_resolver(&self, resolver: SegmentResolver) -> QuarryResult<()> {
        log::debug!("Registered segment resolver {}", resolver.name());
        self.inner.resolvers.write().push(resolver);
        Ok(())
    }

    fn plugin_config(&self, plugin: &str) -> Option<Document> {
        self.inner
            .plugin_configs
            .get(plugin)
            .map(|entry| entry.value().clone())
    }

    fn registry(&self) -> OperatorRegistry {
        self.inner.registry.clone()
    }
}

struct PluginManagerInner {
    registry: OperatorRegistry,
    resolvers: RwLock<Vec<SegmentResolver>>,
    plugin_configs: DashMap<String, Document>,
}

impl PluginManagerInner {
    fn new() -> Self {
        PluginManagerInner {
            registry: OperatorRegistry::new(),
            resolvers: RwLock::new(Vec::new()),
            plugin_configs: DashMap::new(),
        }
    }
}
