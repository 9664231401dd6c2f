use crate::collection::{Document, Namespace};
use crate::common::Value;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// The command name: the first key of the command document.
pub fn command_name(command: &Document) -> QuarryResult<&str> {
    match command.keys().next() {
        Some(name) => Ok(name.as_str()),
        None => {
            log::error!("Empty command document");
            Err(QuarryError::new("Command document is empty", ErrorKind::InvalidArgument))
        }
    }
}

/// The collection a command targets, taken from the command's first value.
///
/// `getMore` names its collection in a `collection` field instead, and
/// database-level commands target the pseudo collection `$cmd`.
pub fn command_collection(command: &Document) -> QuarryResult<String> {
    let name = command_name(command)?;
    if name == "getMore" {
        if let Some(collection) = command.get("collection").and_then(|c| c.as_str()) {
            return Ok(collection.to_string());
        }
    }
    match command.get(name) {
        Some(Value::String(collection)) if !collection.is_empty() => Ok(collection.clone()),
        _ => Ok("$cmd".to_string()),
    }
}

pub(crate) fn invalid_command(message: String) -> QuarryError {
    log::error!("{}", message);
    QuarryError::new(&message, ErrorKind::InvalidArgument)
}

/// An optional sub-document; absent and null both give `None`.
pub(crate) fn optional_document<'a>(command: &'a Document, key: &str) -> QuarryResult<Option<&'a Document>> {
    match command.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Document(doc)) => Ok(Some(doc)),
        Some(other) => Err(invalid_command(format!(
            "Field '{}' must be an object, found {}",
            key,
            other.type_name()
        ))),
    }
}

/// An optional non-negative integer.
pub(crate) fn optional_count(command: &Document, key: &str) -> QuarryResult<Option<usize>> {
    match command.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n as usize)),
            _ => Err(invalid_command(format!(
                "Field '{}' must be a non-negative integer, found {}",
                key, value
            ))),
        },
    }
}

pub(crate) fn flag(command: &Document, key: &str) -> bool {
    command.get(key).map(Value::is_truthy).unwrap_or(false)
}

/// An array of documents, such as `documents` of `insert`.
pub(crate) fn document_list(command: &Document, key: &str) -> QuarryResult<Vec<Document>> {
    match command.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Document(doc) => Ok(doc.clone()),
                other => Err(invalid_command(format!(
                    "Each element of '{}' must be an object, found {}",
                    key,
                    other.type_name()
                ))),
            })
            .collect(),
        Some(Value::Document(doc)) => Ok(vec![doc.clone()]),
        _ => Err(invalid_command(format!("Field '{}' must be an array of objects", key))),
    }
}

pub(crate) fn ok_reply() -> Document {
    let mut reply = Document::new();
    reply.insert("ok", 1);
    reply
}

/// `{cursor: {firstBatch | nextBatch, id, ns}, ok: 1}`.
pub(crate) fn cursor_reply(namespace: &Namespace, batch: Vec<Document>, cursor_id: i64, first: bool) -> Document {
    let mut cursor = Document::new();
    let key = if first { "firstBatch" } else { "nextBatch" };
    cursor.insert(key, Value::Array(batch.into_iter().map(Value::Document).collect()));
    cursor.insert("id", cursor_id);
    cursor.insert("ns", namespace.to_string());

    let mut reply = Document::new();
    reply.insert("cursor", cursor);
    reply.insert("ok", 1);
    reply
}

/// Reads the documents out of a cursor reply.
pub fn cursor_batch(reply: &Document) -> Vec<Document> {
    let cursor = reply.get("cursor").and_then(|c| c.as_document());
    let batch = cursor.and_then(|c| c.get("firstBatch").or_else(|| c.get("nextBatch")));
    match batch {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_document().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads the cursor id out of a cursor reply, `0` when exhausted.
pub fn cursor_id(reply: &Document) -> i64 {
    reply
        .get_path("cursor.id")
        .and_then(|id| id.as_i64())
        .unwrap_or(0)
}
