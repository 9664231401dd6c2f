use crate::collection::{Document, Namespace};
use crate::common::Value;
use crate::errors::QuarryResult;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// The kind of mutation a [ChangeEvent] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Drop,
    Create,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Drop => "drop",
            OperationType::Create => "create",
        }
    }

    pub fn parse(name: &str) -> Option<OperationType> {
        match name {
            "insert" => Some(OperationType::Insert),
            "update" => Some(OperationType::Update),
            "delete" => Some(OperationType::Delete),
            "drop" => Some(OperationType::Drop),
            "create" => Some(OperationType::Create),
            _ => None,
        }
    }
}

impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification of a mutation affecting a namespace.
///
/// Stores publish one event per affected document for writes and one
/// event per namespace for `create` and `drop`. The bridge re-publishes
/// store events unchanged.
#[derive(Clone)]
pub struct ChangeEvent {
    inner: Arc<ChangeEventInner>,
}

struct ChangeEventInner {
    operation_type: OperationType,
    ns: Namespace,
    document_id: Option<Value>,
    full_document: Option<Document>,
}

impl ChangeEvent {
    pub fn new(
        operation_type: OperationType,
        ns: Namespace,
        document_id: Option<Value>,
        full_document: Option<Document>,
    ) -> Self {
        ChangeEvent {
            inner: Arc::new(ChangeEventInner {
                operation_type,
                ns,
                document_id,
                full_document,
            }),
        }
    }

    /// An event about the namespace itself, carrying no document.
    pub fn for_namespace(operation_type: OperationType, ns: Namespace) -> Self {
        ChangeEvent::new(operation_type, ns, None, None)
    }

    pub fn operation_type(&self) -> OperationType {
        self.inner.operation_type
    }

    pub fn ns(&self) -> &Namespace {
        &self.inner.ns
    }

    pub fn document_id(&self) -> Option<&Value> {
        self.inner.document_id.as_ref()
    }

    pub fn full_document(&self) -> Option<&Document> {
        self.inner.full_document.as_ref()
    }

    /// Renders the event as `{operationType, ns: {db, coll}, documentKey?, fullDocument?}`.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("operationType", self.inner.operation_type.as_str());
        let mut ns = Document::new();
        ns.insert("db", self.inner.ns.database());
        ns.insert("coll", self.inner.ns.collection());
        doc.insert("ns", ns);
        if let Some(id) = &self.inner.document_id {
            let mut key = Document::new();
            key.insert("_id", id.clone());
            doc.insert("documentKey", key);
        }
        if let Some(full_document) = &self.inner.full_document {
            doc.insert("fullDocument", full_document.clone());
        }
        doc
    }

    /// Rebuilds an event from its document form, as received over a transport.
    pub fn from_document(doc: &Document) -> Option<ChangeEvent> {
        let operation_type = OperationType::parse(doc.get("operationType")?.as_str()?)?;
        let ns = doc.get("ns")?.as_document()?;
        let ns = Namespace::new(ns.get("db")?.as_str()?, ns.get("coll")?.as_str()?);
        let document_id = doc.get_path("documentKey._id").cloned();
        let full_document = doc
            .get("fullDocument")
            .and_then(|v| v.as_document())
            .cloned();
        Some(ChangeEvent::new(operation_type, ns, document_id, full_document))
    }
}

impl Debug for ChangeEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("operation_type", &self.inner.operation_type)
            .field("ns", &self.inner.ns.to_string())
            .field("document_id", &self.inner.document_id)
            .finish()
    }
}

pub trait ChangeEventCallback: Send + Sync + Fn(ChangeEvent) -> QuarryResult<()> {}

impl<F> ChangeEventCallback for F where F: Send + Sync + Fn(ChangeEvent) -> QuarryResult<()> {}

/// A listener attached to a store's or a bridge's change feed.
#[derive(Clone)]
pub struct ChangeEventListener {
    on_event: Arc<dyn ChangeEventCallback>,
}

impl ChangeEventListener {
    pub fn new(on_event: impl ChangeEventCallback + 'static) -> Self {
        ChangeEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<ChangeEvent> for ChangeEventListener {
    fn handle(&self, event: &Event<ChangeEvent>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for ChangeEventListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEventListener").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::errors::QuarryError;
    use parking_lot::Mutex;

    #[test]
    fn to_document_round_trips() {
        let event = ChangeEvent::new(
            OperationType::Insert,
            Namespace::new("db", "c"),
            Some(Value::from("p1")),
            Some(doc! { _id: "p1", title: "t" }),
        );
        let doc = event.to_document();
        assert_eq!(doc.get_path("ns.coll"), Some(&Value::from("c")));

        let back = ChangeEvent::from_document(&doc).unwrap();
        assert_eq!(back.operation_type(), OperationType::Insert);
        assert_eq!(back.ns(), &Namespace::new("db", "c"));
        assert_eq!(back.document_id(), Some(&Value::from("p1")));
        assert!(back.full_document().is_some());
    }

    #[test]
    fn namespace_event_has_no_document() {
        let event = ChangeEvent::for_namespace(OperationType::Drop, Namespace::new("db", "c"));
        let doc = event.to_document();
        assert!(!doc.contains_key("documentKey"));
        assert!(!doc.contains_key("fullDocument"));
    }

    #[test]
    fn listener_receives_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = ChangeEventListener::new(move |event: ChangeEvent| {
            sink.lock().push(event.operation_type());
            Ok(())
        });
        let event = ChangeEvent::for_namespace(OperationType::Create, Namespace::new("db", "c"));
        listener.handle(&Event::new(event)).unwrap();
        assert_eq!(*seen.lock(), vec![OperationType::Create]);
    }

    #[test]
    fn listener_error_becomes_handler_error() {
        let listener = ChangeEventListener::new(|_: ChangeEvent| Err(QuarryError::from("nope")));
        let event = ChangeEvent::for_namespace(OperationType::Create, Namespace::new("db", "c"));
        assert!(listener.handle(&Event::new(event)).is_err());
    }
}
