use crate::codec::{IOSegment, SegmentFactory};
use crate::collection::{Document, Namespace};
use crate::common::{collect_documents, empty_stream, stream_of, DocumentStream, Value};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::backend::id_key;
use crate::store::file::raw::{read_raw, remove_raw, write_raw};
use crate::store::file::FileStoreConfig;
use crate::store::{BackendProvider, WriteBatch};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

static CLAIMED_ROOTS: OnceLock<Mutex<Vec<PathBuf>>> = OnceLock::new();

fn claimed_roots() -> &'static Mutex<Vec<PathBuf>> {
    CLAIMED_ROOTS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Exclusive ownership of a root directory within this process.
struct RootClaim {
    path: PathBuf,
}

impl RootClaim {
    fn acquire(root: &Path) -> QuarryResult<RootClaim> {
        fs::create_dir_all(root)?;
        let path = root.canonicalize()?;

        let mut roots = claimed_roots().lock();
        if let Some(owner) = roots
            .iter()
            .find(|claimed| claimed.starts_with(&path) || path.starts_with(claimed))
        {
            log::error!("Root {} overlaps {} owned by another file store", path.display(), owner.display());
            return Err(QuarryError::new(
                &format!(
                    "Root {} overlaps {} which is owned by another file store",
                    path.display(),
                    owner.display()
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        roots.push(path.clone());
        Ok(RootClaim { path })
    }
}

impl Drop for RootClaim {
    fn drop(&mut self) {
        claimed_roots().lock().retain(|claimed| claimed != &self.path);
    }
}

/// Stores collections as files below a root directory.
///
/// Each collection is read and written through an [IOSegment] built from
/// the store configuration and the collection's `create` options. Reads
/// open files lazily, one per pulled document for one-file-per-document
/// layouts. A file that disappears between listing and reading is skipped.
///
/// # Ids
/// Layouts with one file per document derive `_id` from the file path, so
/// such collections only accept string ids.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<FileBackendInner>,
}

impl FileBackend {
    /// Claims the configured root and opens a backend over it.
    pub fn open(config: FileStoreConfig, factory: SegmentFactory) -> QuarryResult<FileBackend> {
        let claim = RootClaim::acquire(config.root())?;
        log::debug!("File backend opened at {}", claim.path.display());
        Ok(FileBackend {
            inner: Arc::new(FileBackendInner {
                root: claim.path.clone(),
                config,
                factory,
                segments: DashMap::new(),
                claim: Mutex::new(Some(claim)),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

impl BackendProvider for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn create(&self, namespace: &Namespace, options: &Document) -> QuarryResult<()> {
        self.inner.create(namespace, options)
    }

    fn exists(&self, namespace: &Namespace) -> QuarryResult<bool> {
        self.inner.exists(namespace)
    }

    fn list_collections(&self, database: &str) -> QuarryResult<Vec<String>> {
        self.inner.list_collections(database)
    }

    fn drop_collection(&self, namespace: &Namespace) -> QuarryResult<()> {
        self.inner.drop_collection(namespace)
    }

    fn read(&self, namespace: &Namespace, id: Option<&Value>) -> QuarryResult<DocumentStream> {
        self.inner.read(namespace, id)
    }

    fn write(&self, namespace: &Namespace, batch: WriteBatch) -> QuarryResult<()> {
        self.inner.write(namespace, batch)
    }

    fn close(&self) -> QuarryResult<()> {
        self.inner.segments.clear();
        self.inner.claim.lock().take();
        Ok(())
    }
}

/// A collection's segment and the stat fields its files are read with.
#[derive(Clone)]
struct Encoding {
    segment: IOSegment,
    stats: Vec<String>,
}

struct FileBackendInner {
    root: PathBuf,
    config: FileStoreConfig,
    factory: SegmentFactory,
    segments: DashMap<Namespace, Encoding>,
    claim: Mutex<Option<RootClaim>>,
}

impl FileBackendInner {
    fn ensure_open(&self) -> QuarryResult<()> {
        if self.claim.lock().is_none() {
            log::error!("File backend at {} is closed", self.root.display());
            return Err(QuarryError::new(
                &format!("File backend at {} is closed", self.root.display()),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn encoding(&self, namespace: &Namespace) -> QuarryResult<Encoding> {
        if let Some(encoding) = self.segments.get(namespace) {
            return Ok(encoding.value().clone());
        }
        let spec = self.config.segment_for(namespace);
        let encoding = Encoding {
            segment: self.factory.build(namespace, &spec)?,
            stats: spec.stats,
        };
        self.segments.insert(namespace.clone(), encoding.clone());
        Ok(encoding)
    }

    fn segment(&self, namespace: &Namespace) -> QuarryResult<IOSegment> {
        Ok(self.encoding(namespace)?.segment)
    }

    fn create(&self, namespace: &Namespace, options: &Document) -> QuarryResult<()> {
        self.ensure_open()?;
        let spec = self.config.segment_for(namespace).with_options(options)?;
        let segment = self.factory.build(namespace, &spec)?;
        let layout = segment.layout();

        if layout.is_single_file() {
            if layout.enumerate(&self.root)?.is_empty() {
                // an empty collection still has its container
                self.write_documents(&segment, Vec::new())?;
            }
        } else if let Some(directory) = layout.collection_path() {
            fs::create_dir_all(self.root.join(directory))?;
        }

        self.segments.insert(
            namespace.clone(),
            Encoding {
                segment,
                stats: spec.stats,
            },
        );
        Ok(())
    }

    fn exists(&self, namespace: &Namespace) -> QuarryResult<bool> {
        let segment = self.segment(namespace)?;
        match segment.layout().collection_path() {
            Some(path) => Ok(self.root.join(path).exists()),
            None => Ok(!segment.layout().enumerate(&self.root)?.is_empty()),
        }
    }

    fn list_collections(&self, database: &str) -> QuarryResult<Vec<String>> {
        let mut names = Vec::new();
        let database_dir = self.root.join(database);
        match fs::read_dir(&database_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    let path = entry.path();
                    let name = if path.is_dir() {
                        entry.file_name().to_string_lossy().into_owned()
                    } else {
                        match path.file_stem() {
                            Some(stem) => stem.to_string_lossy().into_owned(),
                            None => continue,
                        }
                    };
                    if !name.starts_with('.') && !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(QuarryError::from(e)),
        }

        let known = self
            .config
            .configured_collections(database)
            .into_iter()
            .chain(
                self.segments
                    .iter()
                    .filter(|entry| entry.key().database() == database)
                    .map(|entry| entry.key().clone()),
            )
            .collect::<Vec<_>>();
        for namespace in known {
            let name = namespace.collection().to_string();
            if !names.contains(&name) && self.exists(&namespace)? {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    fn drop_collection(&self, namespace: &Namespace) -> QuarryResult<()> {
        self.ensure_open()?;
        let segment = self.segment(namespace)?;
        let layout = segment.layout();
        for file in layout.enumerate(&self.root)? {
            remove_raw(&self.root, &file)?;
        }

        if !layout.is_single_file() {
            if let Some(directory) = layout.collection_path() {
                let directory = self.root.join(directory);
                if let Err(e) = fs::remove_dir(&directory) {
                    if e.kind() != IoErrorKind::NotFound {
                        log::warn!("Could not remove directory {}: {}", directory.display(), e);
                    }
                }
            }
        }

        self.segments.remove(namespace);
        log::debug!("Dropped files of {}", namespace);
        Ok(())
    }

    fn read(&self, namespace: &Namespace, id: Option<&Value>) -> QuarryResult<DocumentStream> {
        self.ensure_open()?;
        let Encoding { segment, stats } = self.encoding(namespace)?;
        let layout = segment.layout();

        let files = match id {
            Some(id) if !layout.is_single_file() => match layout.path_for_id(id) {
                Ok(Some(path)) => vec![path],
                Ok(None) => layout.enumerate(&self.root)?,
                // no file can hold an id that is not a valid file name
                Err(_) => return Ok(empty_stream()),
            },
            _ => layout.enumerate(&self.root)?,
        };
        log::debug!("Reading {} file(s) of {}", files.len(), namespace);

        let root = self.root.clone();
        let raw: DocumentStream = Box::new(files.into_iter().filter_map(move |file| {
            match read_raw(&root, &file, &stats) {
                Ok(Some(raw)) => Some(Ok(raw)),
                Ok(None) => {
                    log::warn!("File {} vanished before it could be read, skipping", file);
                    None
                }
                Err(e) => Some(Err(e)),
            }
        }));
        Ok(segment.input().apply(raw))
    }

    fn write(&self, namespace: &Namespace, batch: WriteBatch) -> QuarryResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }
        let segment = self.segment(namespace)?;
        if segment.layout().is_single_file() {
            self.rewrite_single_file(namespace, &segment, batch)
        } else {
            self.write_document_files(&segment, batch)
        }
    }

    fn rewrite_single_file(&self, namespace: &Namespace, segment: &IOSegment, batch: WriteBatch) -> QuarryResult<()> {
        let current = collect_documents(self.read(namespace, None)?)?;
        let mut documents: IndexMap<String, Document> = IndexMap::with_capacity(current.len());
        for doc in current {
            let key = doc.id().map(id_key).unwrap_or_default();
            documents.insert(key, doc);
        }
        for id in &batch.deletes {
            documents.shift_remove(&id_key(id));
        }
        for doc in batch.upserts {
            let key = doc.id().map(id_key).unwrap_or_default();
            documents.insert(key, doc);
        }
        self.write_documents(segment, documents.into_values().collect())
    }

    fn write_document_files(&self, segment: &IOSegment, batch: WriteBatch) -> QuarryResult<()> {
        let layout = segment.layout();

        // resolve every path before touching the disk
        for doc in &batch.upserts {
            match doc.id() {
                Some(id @ Value::String(_)) => {
                    layout.path_for_id(id)?;
                }
                other => {
                    let found = other.map(|id| id.type_name()).unwrap_or("missing");
                    log::error!("Layout {} needs a string _id, found {}", layout.name(), found);
                    return Err(QuarryError::new(
                        &format!(
                            "The {} layout stores one file per document and needs a string _id, found {}",
                            layout.name(),
                            found
                        ),
                        ErrorKind::InvalidArgument,
                    ));
                }
            }
        }
        let mut deletes = Vec::with_capacity(batch.deletes.len());
        for id in &batch.deletes {
            if let Some(path) = layout.path_for_id(id)? {
                deletes.push(path);
            }
        }

        for path in deletes {
            remove_raw(&self.root, &path)?;
        }
        self.write_documents(segment, batch.upserts)
    }

    fn write_documents(&self, segment: &IOSegment, documents: Vec<Document>) -> QuarryResult<()> {
        let raw = collect_documents(segment.output().apply(stream_of(documents)))?;
        for file in &raw {
            write_raw(&self.root, file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::codec::{SegmentResolver, SegmentSpec};
    use crate::doc;
    use crate::val;

    fn factory() -> SegmentFactory {
        use crate::codec::BuiltinResolver;
        SegmentFactory::new(vec![SegmentResolver::new(BuiltinResolver)], test_aggregator())
    }

    fn open(dir: &tempfile::TempDir) -> FileBackend {
        FileBackend::open(FileStoreConfig::new(dir.path()), factory()).unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("db", "posts")
    }

    fn upserts(docs: Vec<Document>) -> WriteBatch {
        WriteBatch {
            upserts: docs,
            deletes: Vec::new(),
        }
    }

    #[test]
    fn test_directory_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        backend.create(&ns(), &Document::new()).unwrap();
        assert!(dir.path().join("db/posts").is_dir());

        backend
            .write(&ns(), upserts(vec![doc! { _id: "p1", title: "t" }]))
            .unwrap();
        let text = fs::read_to_string(dir.path().join("db/posts/p1.json")).unwrap();
        assert_eq!(text, r#"{"title":"t"}"#);

        let docs = collect_documents(backend.read(&ns(), None).unwrap()).unwrap();
        assert_eq!(docs, vec![doc! { _id: "p1", title: "t" }]);

        let one = collect_documents(backend.read(&ns(), Some(&val!("p1"))).unwrap()).unwrap();
        assert_eq!(one.len(), 1);
        let none = collect_documents(backend.read(&ns(), Some(&val!("nope"))).unwrap()).unwrap();
        assert!(none.is_empty());
        let invalid = collect_documents(backend.read(&ns(), Some(&val!("../x"))).unwrap()).unwrap();
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_directory_requires_string_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        backend.create(&ns(), &Document::new()).unwrap();
        let err = backend
            .write(&ns(), upserts(vec![doc! { _id: "ok" }, doc! { _id: 1 }]))
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
        assert!(!dir.path().join("db/posts/ok.json").exists());
    }

    #[test]
    fn test_delete_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        backend.create(&ns(), &Document::new()).unwrap();
        backend
            .write(&ns(), upserts(vec![doc! { _id: "a" }, doc! { _id: "b" }]))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(val!("a"));
        backend.write(&ns(), batch).unwrap();
        assert!(!dir.path().join("db/posts/a.json").exists());
        assert_eq!(backend.list_collections("db").unwrap(), vec!["posts"]);

        // a foreign file keeps the directory alive
        fs::write(dir.path().join("db/posts/notes.txt"), "keep").unwrap();
        backend.drop_collection(&ns()).unwrap();
        assert!(!dir.path().join("db/posts/b.json").exists());
        assert!(dir.path().join("db/posts/notes.txt").exists());
        assert!(!backend.exists(&Namespace::new("db", "other")).unwrap());
    }

    #[test]
    fn test_single_file_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        backend
            .create(&ns(), &doc! { layout: "object-in-file" })
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("db/posts.json")).unwrap(), "{}");

        backend
            .write(&ns(), upserts(vec![doc! { _id: "a", n: 1 }, doc! { _id: "b", n: 2 }]))
            .unwrap();
        let mut batch = upserts(vec![doc! { _id: "a", n: 10 }]);
        batch.delete(val!("b"));
        backend.write(&ns(), batch).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("db/posts.json")).unwrap(),
            r#"{"a":{"n":10}}"#
        );
        assert_eq!(backend.list_collections("db").unwrap(), vec!["posts"]);
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        backend.create(&ns(), &Document::new()).unwrap();
        backend
            .write(&ns(), upserts(vec![doc! { _id: "a" }, doc! { _id: "b" }]))
            .unwrap();

        let mut stream = backend.read(&ns(), None).unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.id(), Some(&val!("a")));
        fs::remove_file(dir.path().join("db/posts/b.json")).unwrap();
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_stats_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileStoreConfig::new(dir.path());
        config
            .set_collection_segment(
                "db.posts",
                SegmentSpec {
                    stats: vec!["size".to_string()],
                    ..SegmentSpec::default()
                },
            )
            .unwrap();
        let backend = FileBackend::open(config, factory()).unwrap();
        backend.create(&ns(), &Document::new()).unwrap();
        backend
            .write(&ns(), upserts(vec![doc! { _id: "a", n: 1 }]))
            .unwrap();
        let docs = collect_documents(backend.read(&ns(), None).unwrap()).unwrap();
        assert_eq!(docs, vec![doc! { _id: "a", n: 1, size: 7 }]);
    }

    #[test]
    fn test_overlapping_roots_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        let nested = dir.path().join("db");
        let err = FileBackend::open(FileStoreConfig::new(&nested), factory()).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);

        backend.close().unwrap();
        assert!(FileBackend::open(FileStoreConfig::new(&nested), factory()).is_ok());
    }
}
