use crate::common::{Value, DOC_ID, FIELD_SEPARATOR, MAX_ARRAY_PADDING};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

/// An ordered mapping from string keys to [Value]s.
///
/// Keys keep their insertion order, which is the order fields are written
/// back to json and yaml files. Top-level access goes through [Document::get]
/// and [Document::insert]; dotted paths such as `address.city` or `tags.0`
/// go through the `*_path` methods.
///
/// # Examples
///
/// ```rust
/// use quarry::doc;
///
/// let mut doc = doc! { "name": "Alice", "address": { "city": "Oslo" } };
/// assert_eq!(doc.get_path("address.city").and_then(|v| v.as_str()), Some("Oslo"));
///
/// doc.put_path("address.zip", "0150").unwrap();
/// assert!(doc.get_path("address.zip").is_some());
/// ```
#[derive(Clone, Default, PartialEq)]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    /// Parses a document from a json object string.
    pub fn from_json(json: &str) -> QuarryResult<Document> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the document as compact json.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Sets a top-level field, keeping its position if it already exists.
    ///
    /// The key is taken literally; dots are not interpreted.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Removes a top-level field, preserving the order of the remaining fields.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.values()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the `_id` field if present.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(DOC_ID)
    }

    /// Returns the single key of a one-field document, such as a pipeline stage.
    pub fn single_entry(&self) -> Option<(&String, &Value)> {
        if self.data.len() == 1 {
            self.data.first()
        } else {
            None
        }
    }

    /// Copies every top-level field of `other` over this document.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.iter() {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Looks up a dotted path. Numeric segments index into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split(FIELD_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolves a dotted path the way field references do in expressions.
    ///
    /// A non-numeric segment applied to an array maps over the array's
    /// document elements and collects the values found, so `items.sku` over
    /// `items: [{sku: "a"}, {sku: "b"}]` yields `["a", "b"]`. Returns `None`
    /// when the path is absent.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split(FIELD_SEPARATOR).collect();
        let first = self.data.get(segments[0])?;
        resolve_value(first, &segments[1..])
    }

    /// Sets a value at a dotted path, creating intermediate documents.
    ///
    /// A numeric segment addresses an array element; the array is padded
    /// with nulls when the index is past its end. Traversing into a scalar
    /// is an error.
    pub fn put_path<V: Into<Value>>(&mut self, path: &str, value: V) -> QuarryResult<()> {
        let segments: Vec<&str> = path.split(FIELD_SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            log::error!("Invalid field path {}", path);
            return Err(QuarryError::new(
                &format!("Invalid field path '{}'", path),
                ErrorKind::InvalidArgument,
            ));
        }
        put_in_document(self, &segments, value.into(), path)
    }

    /// Removes the value at a dotted path and returns it.
    ///
    /// Removing an array element by index replaces it with null, keeping
    /// the positions of the following elements stable.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split(FIELD_SEPARATOR).collect();
        if segments.len() == 1 {
            return self.remove(path);
        }
        let mut current = self.data.get_mut(segments[0])?;
        for segment in &segments[1..segments.len() - 1] {
            current = match current {
                Value::Document(doc) => doc.data.get_mut(*segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        let last = segments[segments.len() - 1];
        match current {
            Value::Document(doc) => doc.remove(last),
            Value::Array(items) => {
                let index = last.parse::<usize>().ok()?;
                items.get_mut(index).map(|v| v.take())
            }
            _ => None,
        }
    }

    /// Order-sensitive comparison: field by field, key first then value.
    pub fn compare(&self, other: &Document) -> Ordering {
        for ((k1, v1), (k2, v2)) in self.data.iter().zip(other.data.iter()) {
            let ordering = v1
                .type_order()
                .cmp(&v2.type_order())
                .then_with(|| k1.cmp(k2))
                .then_with(|| v1.cmp(v2));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.data.len().cmp(&other.data.len())
    }
}

fn resolve_value(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Document(doc) => doc
            .get(segments[0])
            .and_then(|v| resolve_value(v, &segments[1..])),
        Value::Array(items) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                return items
                    .get(index)
                    .and_then(|v| resolve_value(v, &segments[1..]));
            }
            let collected = items
                .iter()
                .filter(|item| item.is_document())
                .filter_map(|item| resolve_value(item, segments))
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

fn put_in_document(
    doc: &mut Document,
    segments: &[&str],
    value: Value,
    path: &str,
) -> QuarryResult<()> {
    if segments.len() == 1 {
        doc.data.insert(segments[0].to_string(), value);
        return Ok(());
    }
    let entry = doc
        .data
        .entry(segments[0].to_string())
        .or_insert_with(|| Value::Document(Document::new()));
    put_in_value(entry, &segments[1..], value, path)
}

fn put_in_value(target: &mut Value, segments: &[&str], value: Value, path: &str) -> QuarryResult<()> {
    match target {
        Value::Document(doc) => put_in_document(doc, segments, value, path),
        Value::Array(items) => {
            let index = segments[0].parse::<usize>().map_err(|_| {
                log::error!("Cannot create field {} in array for path {}", segments[0], path);
                QuarryError::new(
                    &format!("Cannot create field '{}' in an array element of '{}'", segments[0], path),
                    ErrorKind::InvalidOperation,
                )
            })?;
            if index >= items.len() {
                if index - items.len() > MAX_ARRAY_PADDING {
                    log::error!("Index {} pads array too far for path {}", index, path);
                    return Err(QuarryError::new(
                        &format!(
                            "Cannot pad array of length {} up to index {} for '{}'",
                            items.len(),
                            index,
                            path
                        ),
                        ErrorKind::InvalidArgument,
                    ));
                }
                items.resize(index + 1, Value::Null);
            }
            if segments.len() == 1 {
                items[index] = value;
                Ok(())
            } else {
                if items[index].is_null() {
                    items[index] = Value::Document(Document::new());
                }
                put_in_value(&mut items[index], &segments[1..], value, path)
            }
        }
        other => {
            log::error!("Cannot traverse scalar {} for path {}", other, path);
            Err(QuarryError::new(
                &format!("Cannot create field '{}' in scalar value of '{}'", segments[0], path),
                ErrorKind::InvalidOperation,
            ))
        }
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document {
            data: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.data.len()))?;
        for (key, value) in &self.data {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Map keys in yaml may be numbers or booleans; they become strings.
struct DocumentKey(String);

struct DocumentKeyVisitor;

impl<'de> Visitor<'de> for DocumentKeyVisitor {
    type Value = DocumentKey;

    fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str("a scalar map key")
    }

    fn visit_str<E>(self, v: &str) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v.to_string()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v.to_string()))
    }

    fn visit_f64<E>(self, v: f64) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v.to_string()))
    }

    fn visit_bool<E>(self, v: bool) -> Result<DocumentKey, E> {
        Ok(DocumentKey(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for DocumentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DocumentKeyVisitor)
    }
}

pub(crate) struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str("a document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<DocumentKey, Value>()? {
            doc.data.insert(key.0, value);
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Strips surrounding quotes from a stringified macro key.
#[doc(hidden)]
pub fn normalize(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// Keys are taken literally, so `"a.b"` is a single top-level key, which is
/// what query documents need. Negative numbers and other multi-token values
/// go in parentheses.
///
/// # Examples
///
/// ```rust
/// use quarry::doc;
///
/// let stage = doc! { "$sort": { "age": (-1) } };
/// let person = doc! {
///     name: "Alice",
///     tags: ["a", "b"],
///     address: { city: "Oslo" },
///     nickname: null,
/// };
/// ```
#[macro_export]
macro_rules! doc {
    ({}) => {
        $crate::collection::Document::new()
    };

    () => {
        $crate::collection::Document::new()
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::doc!($($key : $value),*)
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            #[allow(unused_mut)]
            let mut doc = $crate::collection::Document::new();
            $(
                doc.insert(
                    $crate::collection::normalize(stringify!($key)),
                    $crate::doc_value!($value),
                );
            )*
            doc
        }
    };
}

/// Helper macro to convert values for the doc! macro.
#[macro_export]
macro_rules! doc_value {
    (null) => {
        $crate::common::Value::Null
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{doc, val};

    fn set_up() -> Document {
        doc! {
            score: 1034,
            location: {
                state: "NY",
                address: {
                    line1: "40",
                    house: ["1", "2", "3"],
                },
            },
            category: ["food", "produce"],
            obj_array: [{ value: 1 }, { value: 2 }, { other: 3 }],
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("\"ABC\""), "ABC");
        assert_eq!(normalize("ABC"), "ABC");
    }

    #[test]
    fn macro_keeps_dollar_keys_and_dotted_keys_literal() {
        let doc = doc! { "$match": { "a.b": 1 } };
        let inner = doc.get("$match").and_then(|v| v.as_document()).unwrap();
        assert!(inner.contains_key("a.b"));
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut doc = doc! { b: 1, a: 2 };
        doc.insert("c", 3);
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);

        doc.remove("b");
        let keys: Vec<&String> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn get_path_descends_documents_and_indexes() {
        let doc = set_up();
        assert_eq!(doc.get_path("location.state"), Some(&val!("NY")));
        assert_eq!(doc.get_path("location.address.house.1"), Some(&val!("2")));
        assert_eq!(doc.get_path("location.address.house.9"), None);
        assert_eq!(doc.get_path("score.x"), None);
        assert_eq!(doc.get_path("missing"), None);
    }

    #[test]
    fn resolve_path_maps_over_arrays_of_documents() {
        let doc = set_up();
        assert_eq!(
            doc.resolve_path("obj_array.value"),
            Some(Value::Array(vec![val!(1), val!(2)]))
        );
        assert_eq!(doc.resolve_path("obj_array.1.value"), Some(val!(2)));
        assert_eq!(doc.resolve_path("score.value"), None);
    }

    #[test]
    fn put_path_creates_intermediate_documents() {
        let mut doc = Document::new();
        doc.put_path("a.b.c", 1).unwrap();
        assert_eq!(doc.get_path("a.b.c"), Some(&val!(1)));
    }

    #[test]
    fn put_path_pads_arrays() {
        let mut doc = doc! { list: [1] };
        doc.put_path("list.3", 4).unwrap();
        assert_eq!(
            doc.get("list"),
            Some(&Value::Array(vec![val!(1), Value::Null, Value::Null, val!(4)]))
        );
    }

    #[test]
    fn put_path_rejects_huge_array_index() {
        let mut doc = Document::new();
        doc.insert("a", Value::Array(vec![]));
        let err = doc.put_path("a.1000000000000000000", 1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
        assert_eq!(doc.get("a"), Some(&Value::Array(vec![])));

        doc.put_path("a.1500", 1).unwrap();
        assert_eq!(doc.get_path("a.1500"), Some(&val!(1)));
    }

    #[test]
    fn put_path_into_scalar_fails() {
        let mut doc = doc! { a: 1 };
        let err = doc.put_path("a.b", 2).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert!(doc.put_path("a..b", 2).is_err());
    }

    #[test]
    fn remove_path_removes_nested_fields() {
        let mut doc = set_up();
        assert_eq!(doc.remove_path("location.state"), Some(val!("NY")));
        assert!(doc.get_path("location.state").is_none());
        assert_eq!(doc.remove_path("category.0"), Some(val!("food")));
        assert_eq!(doc.get_path("category.0"), Some(&Value::Null));
        assert_eq!(doc.remove_path("nothing.here"), None);
    }

    #[test]
    fn compare_is_order_sensitive() {
        let a = doc! { x: 1, y: 2 };
        let b = doc! { y: 2, x: 1 };
        assert_eq!(a, b);
        assert_ne!(a.compare(&b), Ordering::Equal);
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn yaml_numeric_keys_become_strings() {
        let doc: Document = serde_yaml::from_str("1: one\ntrue: yes\n").unwrap();
        assert_eq!(doc.get("1"), Some(&val!("one")));
        assert!(doc.contains_key("true"));
    }

    #[test]
    fn json_keeps_field_order() {
        let doc = Document::from_json(r#"{"z":1,"a":{"m":2,"b":3}}"#).unwrap();
        assert_eq!(doc.to_json(), r#"{"z":1,"a":{"m":2,"b":3}}"#);
    }

    #[test]
    fn single_entry_only_for_one_field() {
        assert!(doc! { "$limit": 1 }.single_entry().is_some());
        assert!(doc! { a: 1, b: 2 }.single_entry().is_none());
    }
}
