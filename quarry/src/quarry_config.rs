//! Engine-wide configuration.

use crate::collection::Document;
use crate::common::{CONTENT_KEY, DEFAULT_BATCH_SIZE, DEFAULT_MAX_SORT_DOCUMENTS};
use indexmap::IndexMap;
use std::sync::Arc;

/// Immutable configuration shared by the aggregator, validators and stores.
///
/// A configuration is assembled once by [crate::QuarryBuilder] and then
/// threaded explicitly into every component that needs it. Cloning is cheap
/// and every clone observes the same values.
///
/// # Examples
///
/// ```rust,ignore
/// use quarry::QuarryBuilder;
///
/// let quarry = QuarryBuilder::default()
///     .default_batch_size(50)
///     .content_key("body")
///     .build()?;
/// assert_eq!(quarry.config().default_batch_size(), 50);
/// ```
#[derive(Clone)]
pub struct QuarryConfig {
    inner: Arc<QuarryConfigInner>,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl QuarryConfig {
    /// Creates a configuration holding the default values.
    pub fn new() -> Self {
        QuarryConfig {
            inner: Arc::new(QuarryConfigInner::default()),
        }
    }

    pub(crate) fn from_inner(inner: QuarryConfigInner) -> Self {
        QuarryConfig {
            inner: Arc::new(inner),
        }
    }

    /// Number of documents returned in a first batch when the command does
    /// not say otherwise.
    pub fn default_batch_size(&self) -> usize {
        self.inner.default_batch_size
    }

    /// Field that holds raw file content in codec segments.
    pub fn content_key(&self) -> &str {
        &self.inner.content_key
    }

    /// Whether commands against an unknown collection create it.
    pub fn auto_create_collections(&self) -> bool {
        self.inner.auto_create_collections
    }

    /// Upper bound on documents a blocking sort may hold.
    pub fn max_sort_documents(&self) -> usize {
        self.inner.max_sort_documents
    }

    /// Returns the configuration document registered for a plugin.
    pub fn plugin_config(&self, plugin: &str) -> Option<Document> {
        self.inner.plugin_configs.get(plugin).cloned()
    }
}

/// Mutable settings a builder fills before freezing them.
#[derive(Clone)]
pub(crate) struct QuarryConfigInner {
    pub(crate) default_batch_size: usize,
    pub(crate) content_key: String,
    pub(crate) auto_create_collections: bool,
    pub(crate) max_sort_documents: usize,
    pub(crate) plugin_configs: IndexMap<String, Document>,
}

impl Default for QuarryConfigInner {
    fn default() -> Self {
        QuarryConfigInner {
            default_batch_size: DEFAULT_BATCH_SIZE,
            content_key: CONTENT_KEY.to_string(),
            auto_create_collections: true,
            max_sort_documents: DEFAULT_MAX_SORT_DOCUMENTS,
            plugin_configs: IndexMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_arc_sharing() {
        let config1 = QuarryConfig::new();
        let config2 = config1.clone();
        assert!(Arc::ptr_eq(&config1.inner, &config2.inner));
    }

    #[test]
    fn test_defaults() {
        let config = QuarryConfig::default();
        assert_eq!(config.default_batch_size(), 101);
        assert_eq!(config.content_key(), "content");
        assert!(config.auto_create_collections());
        assert_eq!(config.max_sort_documents(), DEFAULT_MAX_SORT_DOCUMENTS);
        assert!(config.plugin_config("anything").is_none());
    }

    #[test]
    fn test_plugin_config_lookup() {
        let mut inner = QuarryConfigInner::default();
        inner
            .plugin_configs
            .insert("fetch".to_string(), doc! { timeout: 5 });
        let config = QuarryConfig::from_inner(inner);
        assert_eq!(config.plugin_config("fetch"), Some(doc! { timeout: 5 }));
    }
}
