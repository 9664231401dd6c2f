use crate::codec::{parse_stats, SegmentSpec};
use crate::collection::{ChangeEventListener, Namespace};
use crate::common::Value;
use crate::errors::QuarryResult;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for a file store.
///
/// # Purpose
/// `FileStoreConfig` names the root directory a store owns and describes
/// how collections below it are encoded: a default format and layout for
/// every collection, and overrides for individual collections. Options given
/// to `create` take precedence over both.
///
/// # Characteristics
/// - **Thread-Safe**: Can be safely cloned and shared across threads
/// - **Lightweight Cloning**: Uses Arc internally, clones share settings
///
/// # Usage
/// ```text
/// let config = FileStoreConfig::new("/srv/content");
/// config.set_default_format(val!("yaml"));
/// config.set_collection_segment("site.posts", SegmentSpec {
///     format: val!(doc! { yaml: { frontMatter: true } }),
///     ..SegmentSpec::default()
/// })?;
/// let store = quarry.file_store(config)?;
/// ```
#[derive(Clone)]
pub struct FileStoreConfig {
    inner: Arc<FileStoreConfigInner>,
}

impl FileStoreConfig {
    /// Creates a configuration for `root` with json files in directories.
    pub fn new<P: AsRef<Path>>(root: P) -> FileStoreConfig {
        FileStoreConfig {
            inner: Arc::new(FileStoreConfigInner {
                root: root.as_ref().to_path_buf(),
                name: RwLock::new("file".to_string()),
                default_segment: RwLock::new(SegmentSpec::default()),
                collections: DashMap::new(),
                event_listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.inner.name.write() = name.to_string();
    }

    /// Sets the format descriptor used when nothing more specific is given.
    pub fn set_default_format(&self, format: Value) {
        self.inner.default_segment.write().format = format;
    }

    /// Sets the layout descriptor used when nothing more specific is given.
    pub fn set_default_layout(&self, layout: Value) {
        self.inner.default_segment.write().layout = layout;
    }

    /// Sets the stat fields merged into every document by default.
    pub fn set_default_stats(&self, stats: &Value) -> QuarryResult<()> {
        let stats = parse_stats(stats)?;
        self.inner.default_segment.write().stats = stats;
        Ok(())
    }

    pub fn default_segment(&self) -> SegmentSpec {
        self.inner.default_segment.read().clone()
    }

    /// Overrides the segment of one collection, given as `db.collection`.
    pub fn set_collection_segment(&self, namespace: &str, segment: SegmentSpec) -> QuarryResult<()> {
        let namespace = Namespace::parse(namespace)?;
        self.inner.collections.insert(namespace, segment);
        Ok(())
    }

    /// The segment a collection uses before any `create` options apply.
    pub fn segment_for(&self, namespace: &Namespace) -> SegmentSpec {
        match self.inner.collections.get(namespace) {
            Some(segment) => segment.value().clone(),
            None => self.default_segment(),
        }
    }

    /// Collections of a database with an explicit segment.
    pub fn configured_collections(&self, database: &str) -> Vec<Namespace> {
        self.inner
            .collections
            .iter()
            .filter(|entry| entry.key().database() == database)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Registers a change listener attached when the store opens.
    pub fn add_event_listener(&self, listener: ChangeEventListener) {
        self.inner.event_listeners.write().push(listener)
    }

    pub fn event_listeners(&self) -> Vec<ChangeEventListener> {
        let listeners = self.inner.event_listeners.read();
        let mut result = Vec::with_capacity(listeners.len());
        result.extend(listeners.iter().cloned());
        result
    }
}

struct FileStoreConfigInner {
    root: PathBuf,
    name: RwLock<String>,
    default_segment: RwLock<SegmentSpec>,
    collections: DashMap<Namespace, SegmentSpec>,
    event_listeners: RwLock<Vec<ChangeEventListener>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::val;

    #[test]
    fn test_defaults() {
        let config = FileStoreConfig::new("/tmp/quarry");
        assert_eq!(config.root(), Path::new("/tmp/quarry"));
        assert_eq!(config.name(), "file");
        assert_eq!(config.default_segment(), SegmentSpec::default());
        assert!(config.event_listeners().is_empty());
    }

    #[test]
    fn test_collection_override() {
        let config = FileStoreConfig::new("/tmp/quarry");
        config.set_default_format(val!("yaml"));
        config
            .set_collection_segment(
                "site.posts",
                SegmentSpec {
                    format: val!("text"),
                    ..SegmentSpec::default()
                },
            )
            .unwrap();

        let posts = config.segment_for(&Namespace::new("site", "posts"));
        assert_eq!(posts.format, val!("text"));
        let other = config.segment_for(&Namespace::new("site", "pages"));
        assert_eq!(other.format, val!("yaml"));
        assert_eq!(config.configured_collections("site").len(), 1);
        assert!(config.set_collection_segment("nodot", SegmentSpec::default()).is_err());
    }

    #[test]
    fn test_default_stats_are_validated() {
        let config = FileStoreConfig::new("/tmp/quarry");
        config.set_default_stats(&val!(vec!["size"])).unwrap();
        assert_eq!(config.default_segment().stats, vec!["size".to_string()]);
        assert!(config.set_default_stats(&val!(vec!["owner"])).is_err());
    }

    #[test]
    fn test_clones_share_settings() {
        let config = FileStoreConfig::new("/tmp/quarry");
        let clone = config.clone();
        clone.set_name("content");
        clone.add_event_listener(ChangeEventListener::new(|_| Ok(())));
        assert_eq!(config.name(), "content");
        assert_eq!(config.event_listeners().len(), 1);
    }
}
