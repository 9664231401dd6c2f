use crate::aggregation::{pipeline_stages, Aggregator, Pipeline};
use crate::collection::snowflake::SnowflakeIdGenerator;
use crate::collection::{
    ChangeEvent, ChangeEventListener, Document, Namespace, OperationType, Update, ValidationAction, Validator,
};
use crate::common::{
    empty_stream, DocumentStream, EventAware, LockRegistry, QuarryEventBus, SubscriberRef, Value, DOC_ID,
};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::filter::Filter;
use crate::store::backend::id_key;
use crate::store::command::{
    command_name, cursor_reply, document_list, flag, invalid_command, ok_reply, optional_count, optional_document,
};
use crate::store::cursor::CursorRegistry;
use crate::store::{StoreBackend, StoreProvider, WriteBatch};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const VIEW_ON: &str = "viewOn";
const VIEW_PIPELINE: &str = "pipeline";
const VALIDATOR: &str = "validator";
const VALIDATION_ACTION: &str = "validationAction";

struct View {
    source: Namespace,
    pipeline: Pipeline,
}

struct CollectionInfo {
    options: Document,
    validator: Option<Validator>,
    view: Option<View>,
}

impl CollectionInfo {
    fn plain() -> Self {
        CollectionInfo {
            options: Document::new(),
            validator: None,
            view: None,
        }
    }

    fn validate(&self, document: &Document) -> QuarryResult<()> {
        match &self.validator {
            Some(validator) => validator.validate(document),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
enum CollectionState {
    Ready(Arc<CollectionInfo>),
    Dropped,
}

/// A store implementing the command surface over a [StoreBackend].
///
/// # Collection lifecycle
/// A collection starts uninitialized. `create` makes it ready; so does the
/// first write when `auto_create_collections` is on, and so does finding
/// its storage already present in the backend. `drop` moves it to dropped,
/// after which every command but `create` fails with
/// [ErrorKind::NamespaceNotFound].
///
/// # Writes
/// A write command computes every affected document, validates all of them
/// and only then persists them as one [WriteBatch], all under the
/// namespace's writer lock. One [ChangeEvent] per affected document is
/// published after the batch is persisted.
///
/// # Reads
/// `find`, `aggregate` and `count` build a lazy stream over the backend and
/// never take the writer lock. Results beyond the first batch stay in a
/// cursor until `getMore` drains it or `killCursors` drops it.
#[derive(Clone)]
pub struct BackedStore {
    inner: Arc<BackedStoreInner>,
}

impl BackedStore {
    pub fn new(name: &str, backend: StoreBackend, aggregator: Aggregator) -> Self {
        BackedStore {
            inner: Arc::new(BackedStoreInner {
                name: name.to_string(),
                backend,
                aggregator,
                catalog: DashMap::new(),
                cursors: CursorRegistry::new(),
                locks: LockRegistry::new(),
                event_bus: QuarryEventBus::new(),
                id_generator: SnowflakeIdGenerator::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &StoreBackend {
        &self.inner.backend
    }

    /// Number of open cursors.
    pub fn open_cursors(&self) -> usize {
        self.inner.cursors.len()
    }
}

impl EventAware for BackedStore {
    fn subscribe(&self, listener: ChangeEventListener) -> QuarryResult<Option<SubscriberRef>> {
        self.inner.event_bus.register(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> QuarryResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }
}

impl StoreProvider for BackedStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document> {
        self.inner.execute(namespace, command)
    }

    fn close(&self) -> QuarryResult<()> {
        self.inner.close()
    }
}

struct BackedStoreInner {
    name: String,
    backend: StoreBackend,
    aggregator: Aggregator,
    catalog: DashMap<Namespace, CollectionState>,
    cursors: CursorRegistry,
    locks: LockRegistry,
    event_bus: QuarryEventBus<ChangeEvent, ChangeEventListener>,
    id_generator: SnowflakeIdGenerator,
    closed: AtomicBool,
}

impl BackedStoreInner {
    fn execute(&self, namespace: &Namespace, command: Document) -> QuarryResult<Document> {
        if self.closed.load(Ordering::Acquire) {
            log::error!("Store {} is closed", self.name);
            return Err(QuarryError::new(
                &format!("Store {} is closed", self.name),
                ErrorKind::InvalidOperation,
            ));
        }

        let name = command_name(&command)?.to_string();
        log::debug!("Store {} executing {} on {}", self.name, name, namespace);
        match name.as_str() {
            "create" => self.create(namespace, &command),
            "drop" => self.drop_collection(namespace),
            "dropDatabase" => self.drop_database(namespace.database()),
            "find" => self.find(namespace, &command),
            "aggregate" => self.aggregate(namespace, &command),
            "count" => self.count(namespace, &command),
            "insert" => self.insert(namespace, &command),
            "update" => self.update(namespace, &command),
            "delete" => self.delete(namespace, &command),
            "getMore" => self.get_more(namespace, &command),
            "killCursors" => self.kill_cursors(&command),
            "listCollections" => self.list_collections(namespace, &command),
            other => {
                log::error!("Unknown command {}", other);
                Err(QuarryError::new(
                    &format!("no such command: '{}'", other),
                    ErrorKind::CommandNotFound,
                ))
            }
        }
    }

    fn close(&self) -> QuarryResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cursors.close();
        self.event_bus.close()?;
        self.backend.close()
    }

    // collection state

    fn state(&self, namespace: &Namespace) -> QuarryResult<Option<CollectionState>> {
        if let Some(state) = self.catalog.get(namespace) {
            return Ok(Some(state.value().clone()));
        }
        if self.backend.exists(namespace)? {
            let state = self
                .catalog
                .entry(namespace.clone())
                .or_insert_with(|| CollectionState::Ready(Arc::new(CollectionInfo::plain())))
                .value()
                .clone();
            return Ok(Some(state));
        }
        Ok(None)
    }

    /// The collection to read from, `None` when it does not exist yet and
    /// reads of missing collections are allowed.
    fn for_read(&self, namespace: &Namespace) -> QuarryResult<Option<Arc<CollectionInfo>>> {
        match self.state(namespace)? {
            Some(CollectionState::Ready(info)) => Ok(Some(info)),
            Some(CollectionState::Dropped) => Err(namespace_not_found(namespace)),
            None if self.aggregator.config().auto_create_collections() => Ok(None),
            None => Err(namespace_not_found(namespace)),
        }
    }

    /// The collection to write to, materializing it when allowed.
    ///
    /// Callers hold the namespace's writer lock.
    fn for_write(&self, namespace: &Namespace) -> QuarryResult<Arc<CollectionInfo>> {
        let info = match self.state(namespace)? {
            Some(CollectionState::Ready(info)) => info,
            Some(CollectionState::Dropped) => return Err(namespace_not_found(namespace)),
            None if self.aggregator.config().auto_create_collections() => {
                self.backend.create(namespace, &Document::new())?;
                let info = Arc::new(CollectionInfo::plain());
                self.catalog
                    .insert(namespace.clone(), CollectionState::Ready(info.clone()));
                log::debug!("Collection {} created implicitly", namespace);
                self.publish(ChangeEvent::for_namespace(OperationType::Create, namespace.clone()));
                info
            }
            None => return Err(namespace_not_found(namespace)),
        };

        if info.view.is_some() {
            log::error!("Cannot write to view {}", namespace);
            return Err(QuarryError::new(
                &format!("Namespace {} is a view, not a collection", namespace),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(info)
    }

    fn read_namespace(&self, namespace: &Namespace, id: Option<&Value>) -> QuarryResult<DocumentStream> {
        let info = match self.for_read(namespace)? {
            Some(info) => info,
            None => return Ok(empty_stream()),
        };
        match &info.view {
            Some(view) => {
                let source = self.read_namespace(&view.source, None)?;
                Ok(view.pipeline.apply(source))
            }
            None => self.backend.read(namespace, id),
        }
    }

    fn publish(&self, event: ChangeEvent) {
        if !self.event_bus.has_listeners() {
            return;
        }
        if let Err(e) = self.event_bus.publish(event) {
            log::warn!("Store {} failed to publish change event: {}", self.name, e);
        }
    }

    fn batch_size(&self, value: Option<usize>) -> usize {
        match value {
            Some(0) | None => self.aggregator.config().default_batch_size(),
            Some(size) => size,
        }
    }

    // collection commands

    fn create(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let mut options = command.clone();
        options.remove("create");

        let lock = self.locks.get_lock(namespace);
        let _guard = lock.lock();

        if let Some(CollectionState::Ready(info)) = self.state(namespace)? {
            if info.options == options {
                return Ok(ok_reply());
            }
            log::error!("Collection {} already exists with different options", namespace);
            return Err(QuarryError::new(
                &format!("Collection {} already exists", namespace),
                ErrorKind::CollectionExists,
            ));
        }

        let info = self.compile_collection(namespace, options)?;
        if info.view.is_none() {
            self.backend.create(namespace, &info.options)?;
        }
        self.catalog
            .insert(namespace.clone(), CollectionState::Ready(Arc::new(info)));
        log::debug!("Collection {} created", namespace);
        self.publish(ChangeEvent::for_namespace(OperationType::Create, namespace.clone()));
        Ok(ok_reply())
    }

    fn compile_collection(&self, namespace: &Namespace, options: Document) -> QuarryResult<CollectionInfo> {
        let validator = match optional_document(&options, VALIDATOR)? {
            Some(rule) => {
                let action = ValidationAction::parse(options.get(VALIDATION_ACTION))?;
                Some(Validator::compile(rule, action, &self.aggregator)?)
            }
            None => None,
        };

        let view = match options.get(VIEW_ON) {
            None => None,
            Some(Value::String(source)) => {
                let source = namespace.sibling(source);
                self.check_view_cycle(namespace, &source)?;
                let pipeline = match options.get(VIEW_PIPELINE) {
                    Some(pipeline) => self.aggregator.compile(&pipeline_stages(pipeline)?)?,
                    None => Pipeline::default(),
                };
                Some(View { source, pipeline })
            }
            Some(other) => {
                return Err(invalid_command(format!(
                    "'{}' must be a collection name, found {}",
                    VIEW_ON,
                    other.type_name()
                )))
            }
        };

        if view.is_some() && validator.is_some() {
            return Err(invalid_command(format!(
                "View {} cannot have a validator",
                namespace
            )));
        }

        Ok(CollectionInfo {
            options,
            validator,
            view,
        })
    }

    fn check_view_cycle(&self, view: &Namespace, source: &Namespace) -> QuarryResult<()> {
        let mut current = source.clone();
        loop {
            if &current == view {
                return Err(invalid_command(format!(
                    "View {} would depend on itself",
                    view
                )));
            }
            let next = match self.catalog.get(&current).map(|s| s.value().clone()) {
                Some(CollectionState::Ready(info)) => info.view.as_ref().map(|v| v.source.clone()),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    fn drop_collection(&self, namespace: &Namespace) -> QuarryResult<Document> {
        {
            let lock = self.locks.get_lock(namespace);
            let _guard = lock.lock();

            let info = match self.state(namespace)? {
                Some(CollectionState::Ready(info)) => info,
                _ => return Err(namespace_not_found(namespace)),
            };
            if info.view.is_none() {
                self.backend.drop_collection(namespace)?;
            }
            self.catalog.insert(namespace.clone(), CollectionState::Dropped);
            log::debug!("Collection {} dropped", namespace);
            self.publish(ChangeEvent::for_namespace(OperationType::Drop, namespace.clone()));
        }
        self.locks.remove_idle_lock(namespace);

        let mut reply = Document::new();
        reply.insert("ns", namespace.to_string());
        reply.insert("ok", 1);
        Ok(reply)
    }

    fn drop_database(&self, database: &str) -> QuarryResult<Document> {
        for collection in self.collection_names(database)? {
            let namespace = Namespace::new(database, &collection);
            {
                let lock = self.locks.get_lock(&namespace);
                let _guard = lock.lock();

                let is_view = match self.state(&namespace)? {
                    Some(CollectionState::Ready(info)) => info.view.is_some(),
                    _ => continue,
                };
                if !is_view {
                    self.backend.drop_collection(&namespace)?;
                }
                self.catalog.remove(&namespace);
                self.publish(ChangeEvent::for_namespace(OperationType::Drop, namespace.clone()));
            }
            self.locks.remove_idle_lock(&namespace);
        }
        self.catalog.retain(|ns, _| ns.database() != database);
        log::debug!("Database {} dropped", database);

        let mut reply = Document::new();
        reply.insert("dropped", database);
        reply.insert("ok", 1);
        Ok(reply)
    }

    /// Ready collections of a database: those in the catalog plus those the
    /// backend has storage for, minus dropped ones.
    fn collection_names(&self, database: &str) -> QuarryResult<Vec<String>> {
        let mut names: Vec<String> = self
            .catalog
            .iter()
            .filter(|entry| entry.key().database() == database)
            .filter(|entry| matches!(entry.value(), CollectionState::Ready(_)))
            .map(|entry| entry.key().collection().to_string())
            .collect();
        for name in self.backend.list_collections(database)? {
            let dropped = matches!(
                self.catalog.get(&Namespace::new(database, &name)).map(|s| s.value().clone()),
                Some(CollectionState::Dropped)
            );
            if !dropped && !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_collections(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let database = namespace.database();
        let mut entries = Vec::new();
        for name in self.collection_names(database)? {
            let ns = Namespace::new(database, &name);
            let info = match self.state(&ns)? {
                Some(CollectionState::Ready(info)) => info,
                _ => continue,
            };
            let mut entry = Document::new();
            entry.insert("name", name.as_str());
            entry.insert("type", if info.view.is_some() { "view" } else { "collection" });
            entry.insert("options", info.options.clone());
            entries.push(entry);
        }

        if let Some(query) = optional_document(command, "filter")? {
            let filter = Filter::parse(query, &self.aggregator)?;
            let mut matched = Vec::with_capacity(entries.len());
            for entry in entries {
                if filter.apply(&entry)? {
                    matched.push(entry);
                }
            }
            entries = matched;
        }

        let cursor_ns = Namespace::new(database, "$cmd.listCollections");
        Ok(cursor_reply(&cursor_ns, entries, 0, true))
    }

    // reads

    fn find(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let filter = optional_document(command, "filter")?;
        let mut stages = query_stages(filter, command, "limit")?;
        if let Some(sort) = optional_document(command, "sort")? {
            stages.insert(if filter.is_some() { 1 } else { 0 }, single("$sort", sort.clone()));
        }
        if let Some(projection) = optional_document(command, "projection")? {
            stages.push(single("$project", projection.clone()));
        }

        let pipeline = self.aggregator.compile(&stages)?;
        let hint = self.id_hint(filter)?;
        let stream = pipeline.apply(self.read_namespace(namespace, hint.as_ref())?);

        let batch_size = self.batch_size(optional_count(command, "batchSize")?);
        let (batch, cursor_id) = self
            .cursors
            .open(namespace, stream, batch_size, flag(command, "singleBatch"))?;
        Ok(cursor_reply(namespace, batch, cursor_id, true))
    }

    fn aggregate(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let stages = match command.get("pipeline") {
            Some(pipeline) => pipeline_stages(pipeline)?,
            None => return Err(invalid_command("'pipeline' is required for aggregate".to_string())),
        };
        let pipeline = self.aggregator.compile(&stages)?;

        let first_match = stages
            .first()
            .and_then(|stage| stage.get("$match"))
            .and_then(|m| m.as_document());
        let hint = self.id_hint(first_match)?;
        let stream = pipeline.apply(self.read_namespace(namespace, hint.as_ref())?);

        let cursor_options = optional_document(command, "cursor")?;
        let batch_size = match cursor_options {
            Some(options) => optional_count(options, "batchSize")?,
            None => None,
        };
        let batch_size = self.batch_size(batch_size);
        let (batch, cursor_id) = self.cursors.open(namespace, stream, batch_size, false)?;
        Ok(cursor_reply(namespace, batch, cursor_id, true))
    }

    fn count(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let query = optional_document(command, "query")?;
        let stages = query_stages(query, command, "limit")?;
        let pipeline = self.aggregator.compile(&stages)?;
        let hint = self.id_hint(query)?;

        let mut n = 0i64;
        for doc in pipeline.apply(self.read_namespace(namespace, hint.as_ref())?) {
            doc?;
            n += 1;
        }

        let mut reply = Document::new();
        reply.insert("n", n);
        reply.insert("ok", 1);
        Ok(reply)
    }

    fn get_more(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let id = match command.get("getMore").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return Err(invalid_command("'getMore' must be a cursor id".to_string())),
        };
        let batch_size = self.batch_size(optional_count(command, "batchSize")?);
        let (batch, cursor_id) = self.cursors.get_more(namespace, id, batch_size)?;
        Ok(cursor_reply(namespace, batch, cursor_id, false))
    }

    fn kill_cursors(&self, command: &Document) -> QuarryResult<Document> {
        let ids: Vec<i64> = match command.get("cursors") {
            Some(Value::Array(ids)) => ids.iter().filter_map(|id| id.as_i64()).collect(),
            _ => return Err(invalid_command("'cursors' must be an array of cursor ids".to_string())),
        };
        let (killed, not_found) = self.cursors.kill(&ids);

        let mut reply = Document::new();
        reply.insert("cursorsKilled", Value::Array(killed.into_iter().map(Value::from).collect()));
        reply.insert("cursorsNotFound", Value::Array(not_found.into_iter().map(Value::from).collect()));
        reply.insert("ok", 1);
        Ok(reply)
    }

    fn id_hint(&self, query: Option<&Document>) -> QuarryResult<Option<Value>> {
        match query {
            Some(query) => Ok(Filter::parse(query, &self.aggregator)?.id_equality()),
            None => Ok(None),
        }
    }

    /// Looks up which of `ids` are already stored.
    fn existing_ids(&self, namespace: &Namespace, ids: &[Value]) -> QuarryResult<HashSet<String>> {
        let wanted: HashSet<String> = ids.iter().map(id_key).collect();
        let hint = if ids.len() == 1 { ids.first() } else { None };

        let mut found = HashSet::new();
        for doc in self.backend.read(namespace, hint)? {
            let doc = doc?;
            if let Some(id) = doc.id() {
                let key = id_key(id);
                if wanted.contains(&key) {
                    found.insert(key);
                }
            }
        }
        Ok(found)
    }

    fn with_generated_id(&self, document: Document) -> Document {
        if document.contains_key(DOC_ID) {
            return document;
        }
        let mut with_id = Document::new();
        with_id.insert(DOC_ID, self.id_generator.next_id());
        for (key, value) in document {
            with_id.insert(key, value);
        }
        with_id
    }

    // writes

    fn insert(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let documents: Vec<Document> = document_list(command, "documents")?
            .into_iter()
            .map(|doc| self.with_generated_id(doc))
            .collect();

        let lock = self.locks.get_lock(namespace);
        let _guard = lock.lock();
        let info = self.for_write(namespace)?;

        let ids: Vec<Value> = documents.iter().filter_map(|doc| doc.id().cloned()).collect();
        let existing = self.existing_ids(namespace, &ids)?;
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            let key = id_key(id);
            if existing.contains(&key) || !seen.insert(key) {
                return Err(duplicate_key(namespace, id));
            }
        }

        for doc in &documents {
            info.validate(doc)?;
        }

        let mut batch = WriteBatch::new();
        batch.upserts = documents.clone();
        self.backend.write(namespace, batch)?;

        for doc in &documents {
            self.publish(ChangeEvent::new(
                OperationType::Insert,
                namespace.clone(),
                doc.id().cloned(),
                Some(doc.clone()),
            ));
        }

        let mut reply = Document::new();
        reply.insert("n", documents.len());
        reply.insert("ok", 1);
        Ok(reply)
    }

    fn update(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let statements = document_list(command, "updates")?;

        let lock = self.locks.get_lock(namespace);
        let _guard = lock.lock();
        let info = self.for_write(namespace)?;

        // id key -> latest version, in first-touched order
        let mut overlay: IndexMap<String, Document> = IndexMap::new();
        let mut upserted_keys: HashSet<String> = HashSet::new();
        let mut upserted = Vec::new();
        let mut matched = 0i64;
        let mut modified = 0i64;

        for (index, statement) in statements.iter().enumerate() {
            let query = optional_document(statement, "q")?.cloned().unwrap_or_default();
            let update = match statement.get("u") {
                Some(spec) => Update::compile(spec, &self.aggregator)?,
                None => return Err(invalid_command(format!("Update statement {} has no 'u'", index))),
            };
            let multi = flag(statement, "multi");
            let filter = Filter::parse(&query, &self.aggregator)?;
            let hint = filter.id_equality();

            let mut targets = Vec::new();
            let stored = self.backend.read(namespace, hint.as_ref())?;
            for doc in stored {
                let doc = doc?;
                let key = doc.id().map(id_key).unwrap_or_default();
                let current = overlay.get(&key).cloned().unwrap_or(doc);
                if filter.apply(&current)? {
                    targets.push((key, current));
                    if !multi {
                        break;
                    }
                }
            }
            if targets.is_empty() || multi {
                for key in &upserted_keys {
                    if targets.iter().any(|(k, _)| k == key) {
                        continue;
                    }
                    if let Some(current) = overlay.get(key) {
                        if filter.apply(current)? {
                            targets.push((key.clone(), current.clone()));
                            if !multi {
                                break;
                            }
                        }
                    }
                }
            }

            if targets.is_empty() {
                if flag(statement, "upsert") {
                    let doc = self.with_generated_id(update.upsert_document(&query)?);
                    let id = doc.id().cloned().unwrap_or_default();
                    let key = id_key(&id);
                    if upserted_keys.contains(&key) || !self.existing_ids(namespace, &[id.clone()])?.is_empty() {
                        return Err(duplicate_key(namespace, &id));
                    }
                    let mut entry = Document::new();
                    entry.insert("index", index);
                    entry.insert(DOC_ID, id);
                    upserted.push(Value::Document(entry));
                    upserted_keys.insert(key.clone());
                    overlay.insert(key, doc);
                    matched += 1;
                }
                continue;
            }

            for (key, current) in targets {
                matched += 1;
                let updated = update.apply(&current)?;
                if updated != current {
                    modified += 1;
                    overlay.insert(key, updated);
                }
            }
        }

        for doc in overlay.values() {
            info.validate(doc)?;
        }

        if !overlay.is_empty() {
            let mut batch = WriteBatch::new();
            batch.upserts = overlay.values().cloned().collect();
            self.backend.write(namespace, batch)?;
        }

        for (key, doc) in overlay {
            let operation = if upserted_keys.contains(&key) {
                OperationType::Insert
            } else {
                OperationType::Update
            };
            self.publish(ChangeEvent::new(operation, namespace.clone(), doc.id().cloned(), Some(doc)));
        }

        let mut reply = Document::new();
        reply.insert("n", matched);
        reply.insert("nModified", modified);
        if !upserted.is_empty() {
            reply.insert("upserted", Value::Array(upserted));
        }
        reply.insert("ok", 1);
        Ok(reply)
    }

    fn delete(&self, namespace: &Namespace, command: &Document) -> QuarryResult<Document> {
        let statements = document_list(command, "deletes")?;

        let lock = self.locks.get_lock(namespace);
        let _guard = lock.lock();
        self.for_write(namespace)?;

        let mut removed: IndexMap<String, Value> = IndexMap::new();
        for (index, statement) in statements.iter().enumerate() {
            let query = optional_document(statement, "q")?.cloned().unwrap_or_default();
            let single = match optional_count(statement, "limit")? {
                None | Some(0) => false,
                Some(1) => true,
                Some(other) => {
                    return Err(invalid_command(format!(
                        "Delete statement {} has limit {}, expected 0 or 1",
                        index, other
                    )))
                }
            };
            let filter = Filter::parse(&query, &self.aggregator)?;
            let hint = filter.id_equality();

            for doc in self.backend.read(namespace, hint.as_ref())? {
                let doc = doc?;
                let id = match doc.id() {
                    Some(id) => id.clone(),
                    None => continue,
                };
                let key = id_key(&id);
                if removed.contains_key(&key) || !filter.apply(&doc)? {
                    continue;
                }
                removed.insert(key, id);
                if single {
                    break;
                }
            }
        }

        if !removed.is_empty() {
            let mut batch = WriteBatch::new();
            batch.deletes = removed.values().cloned().collect();
            self.backend.write(namespace, batch)?;
        }

        let n = removed.len();
        for (_, id) in removed {
            self.publish(ChangeEvent::new(OperationType::Delete, namespace.clone(), Some(id), None));
        }

        let mut reply = Document::new();
        reply.insert("n", n);
        reply.insert("ok", 1);
        Ok(reply)
    }
}

fn single(key: &str, value: impl Into<Value>) -> Document {
    let mut doc = Document::new();
    doc.insert(key, value);
    doc
}

/// `$match`, `$skip` and `$limit` stages for a query command.
fn query_stages(query: Option<&Document>, command: &Document, limit_key: &str) -> QuarryResult<Vec<Document>> {
    let mut stages = Vec::new();
    if let Some(query) = query {
        stages.push(single("$match", query.clone()));
    }
    if let Some(skip) = optional_count(command, "skip")? {
        if skip > 0 {
            stages.push(single("$skip", skip));
        }
    }
    if let Some(limit) = optional_count(command, limit_key)? {
        if limit > 0 {
            stages.push(single("$limit", limit));
        }
    }
    Ok(stages)
}

fn namespace_not_found(namespace: &Namespace) -> QuarryError {
    log::error!("Namespace {} not found", namespace);
    QuarryError::new(&format!("ns not found: {}", namespace), ErrorKind::NamespaceNotFound)
}

fn duplicate_key(namespace: &Namespace, id: &Value) -> QuarryError {
    log::error!("Duplicate _id {} in {}", id, namespace);
    let mut details = Document::new();
    details.insert(DOC_ID, id.clone());
    QuarryError::new(
        &format!("E11000 duplicate key error collection: {} dup key: {{ _id: {} }}", namespace, id),
        ErrorKind::DuplicateKey,
    )
    .with_details(details)
}
