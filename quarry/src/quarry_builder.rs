use crate::aggregation::{Aggregator, CoreOperators};
use crate::codec::CodecOperators;
use crate::collection::Document;
use crate::common::{PluginManager, QuarryModule};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::quarry::Quarry;
use crate::quarry_config::{QuarryConfig, QuarryConfigInner};

/// Assembles a [Quarry] engine.
///
/// Settings are validated as they are given. The first invalid one is kept
/// and reported by [QuarryBuilder::build]; later calls are ignored.
///
/// The core operators and the codec operators are always loaded, before
/// any module added with [QuarryBuilder::load_module]. Modules see the
/// plugin configuration registered with [QuarryBuilder::plugin_config]
/// regardless of call order. The operator registry is sealed once the
/// engine is built.
#[derive(Default)]
pub struct QuarryBuilder {
    error: Option<QuarryError>,
    settings: QuarryConfigInner,
    modules: Vec<Box<dyn QuarryModule>>,
}

impl QuarryBuilder {
    pub fn new() -> Self {
        QuarryBuilder {
            error: None,
            settings: QuarryConfigInner::default(),
            modules: Vec::new(),
        }
    }

    pub fn default_batch_size(mut self, batch_size: usize) -> Self {
        if batch_size == 0 {
            self.fail("Default batch size must be positive");
        } else {
            self.settings.default_batch_size = batch_size;
        }
        self
    }

    pub fn content_key(mut self, content_key: &str) -> Self {
        if content_key.is_empty() || content_key.starts_with('$') || content_key.contains('.') {
            self.fail(&format!("Invalid content key '{}'", content_key));
        } else {
            self.settings.content_key = content_key.to_string();
        }
        self
    }

    pub fn auto_create_collections(mut self, enabled: bool) -> Self {
        self.settings.auto_create_collections = enabled;
        self
    }

    pub fn max_sort_documents(mut self, limit: usize) -> Self {
        if limit == 0 {
            self.fail("Sort document limit must be positive");
        } else {
            self.settings.max_sort_documents = limit;
        }
        self
    }

    /// Registers the configuration document a plugin reads while loading.
    pub fn plugin_config(mut self, plugin: &str, config: Document) -> Self {
        self.settings.plugin_configs.insert(plugin.to_string(), config);
        self
    }

    pub fn load_module<T: QuarryModule + 'static>(mut self, module: T) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn build(self) -> QuarryResult<Quarry> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let manager = PluginManager::new();
        for (plugin, config) in &self.settings.plugin_configs {
            manager.set_plugin_config(plugin, config.clone());
        }
        manager.load_module(Box::new(CoreOperators))?;
        manager.load_module(Box::new(CodecOperators))?;
        for module in self.modules {
            manager.load_module(module)?;
        }

        let registry = manager.registry();
        registry.seal();

        let config = QuarryConfig::from_inner(self.settings);
        let aggregator = Aggregator::new(registry, config.clone());
        log::debug!("Quarry engine built");
        Ok(Quarry::new(config, aggregator, manager.segment_resolvers()))
    }

    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            log::error!("{}", message);
            self.error = Some(QuarryError::new(message, ErrorKind::InvalidArgument));
        }
    }
}
