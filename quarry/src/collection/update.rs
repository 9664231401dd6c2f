use crate::aggregation::{add_numbers, multiply_numbers, Aggregator, Pipeline};
use crate::collection::Document;
use crate::common::{collect_documents, stream_of, Value, DOC_ID, OPERATOR_SIGIL};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::filter::{is_operator_document, Filter};
use std::cmp::Ordering;

/// A compiled update specification.
///
/// The `u` of an update statement is a replacement document, a document of
/// update operators, or an aggregation pipeline. `_id` never changes.
#[derive(Clone)]
pub enum Update {
    Replacement(Document),
    Operators(Vec<FieldUpdate>),
    Pipeline(Pipeline),
}

/// One operator applied to one path.
#[derive(Clone)]
pub struct FieldUpdate {
    operator: UpdateOperator,
    path: String,
    value: Value,
    pull_filter: Option<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOperator {
    Set,
    Unset,
    Inc,
    Mul,
    Rename,
    Push,
    AddToSet,
    Pull,
    Min,
    Max,
    SetOnInsert,
}

impl UpdateOperator {
    fn parse(name: &str) -> QuarryResult<UpdateOperator> {
        match name {
            "$set" => Ok(UpdateOperator::Set),
            "$unset" => Ok(UpdateOperator::Unset),
            "$inc" => Ok(UpdateOperator::Inc),
            "$mul" => Ok(UpdateOperator::Mul),
            "$rename" => Ok(UpdateOperator::Rename),
            "$push" => Ok(UpdateOperator::Push),
            "$addToSet" => Ok(UpdateOperator::AddToSet),
            "$pull" => Ok(UpdateOperator::Pull),
            "$min" => Ok(UpdateOperator::Min),
            "$max" => Ok(UpdateOperator::Max),
            "$setOnInsert" => Ok(UpdateOperator::SetOnInsert),
            other => {
                log::error!("Unknown update operator {}", other);
                Err(QuarryError::new(
                    &format!("Unknown modifier: {}", other),
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }
}

fn invalid_update(message: String) -> QuarryError {
    log::error!("{}", message);
    QuarryError::new(&message, ErrorKind::InvalidArgument)
}

impl Update {
    pub fn compile(spec: &Value, aggregator: &Aggregator) -> QuarryResult<Update> {
        match spec {
            Value::Array(_) => Ok(Update::Pipeline(aggregator.compile_value(spec)?)),
            Value::Document(doc) => {
                let operators = doc.keys().filter(|k| k.starts_with(OPERATOR_SIGIL)).count();
                if operators == 0 {
                    Ok(Update::Replacement(doc.clone()))
                } else if operators == doc.len() {
                    Update::compile_operators(doc, aggregator)
                } else {
                    Err(invalid_update(
                        "An update document must contain either only operators or no operators".to_string(),
                    ))
                }
            }
            other => Err(invalid_update(format!(
                "Update must be an object or a pipeline, found {}",
                other.type_name()
            ))),
        }
    }

    fn compile_operators(doc: &Document, aggregator: &Aggregator) -> QuarryResult<Update> {
        let mut updates = Vec::new();
        for (name, fields) in doc {
            let operator = UpdateOperator::parse(name)?;
            let fields = fields
                .as_document()
                .ok_or_else(|| invalid_update(format!("Modifier {} expects an object", name)))?;
            for (path, value) in fields {
                let pull_filter = match operator {
                    UpdateOperator::Pull => pull_filter(value, aggregator)?,
                    UpdateOperator::Rename => match value {
                        Value::String(_) => None,
                        _ => {
                            return Err(invalid_update(format!(
                                "The 'to' field for $rename must be a string: {}",
                                path
                            )))
                        }
                    },
                    _ => None,
                };
                updates.push(FieldUpdate {
                    operator,
                    path: path.clone(),
                    value: value.clone(),
                    pull_filter,
                });
            }
        }
        Ok(Update::Operators(updates))
    }

    /// Applies the update to a stored document.
    pub fn apply(&self, original: &Document) -> QuarryResult<Document> {
        let updated = self.apply_inner(original, false)?;
        keep_id(original, updated)
    }

    /// Builds the document inserted by an upsert that matched nothing.
    ///
    /// Equality conditions of the query seed the document, then the update
    /// runs with `$setOnInsert` enabled.
    pub fn upsert_document(&self, query: &Document) -> QuarryResult<Document> {
        let seed = seed_from_query(query)?;
        match self {
            Update::Replacement(replacement) => {
                let mut doc = Document::new();
                if let Some(id) = seed.get(DOC_ID) {
                    doc.insert(DOC_ID, id.clone());
                }
                for (key, value) in replacement {
                    doc.insert(key.as_str(), value.clone());
                }
                Ok(doc)
            }
            _ => {
                let updated = self.apply_inner(&seed, true)?;
                match seed.get(DOC_ID) {
                    Some(_) => keep_id(&seed, updated),
                    None => Ok(updated),
                }
            }
        }
    }

    fn apply_inner(&self, original: &Document, inserting: bool) -> QuarryResult<Document> {
        match self {
            Update::Replacement(replacement) => {
                let mut doc = Document::new();
                if let Some(id) = original.id() {
                    doc.insert(DOC_ID, id.clone());
                }
                for (key, value) in replacement {
                    doc.insert(key.as_str(), value.clone());
                }
                Ok(doc)
            }
            Update::Operators(updates) => {
                let mut doc = original.clone();
                for update in updates {
                    update.apply(&mut doc, inserting)?;
                }
                Ok(doc)
            }
            Update::Pipeline(pipeline) => {
                let mut output = collect_documents(pipeline.apply(stream_of(vec![original.clone()])))?;
                if output.len() != 1 {
                    return Err(invalid_update(format!(
                        "An update pipeline must produce exactly one document, produced {}",
                        output.len()
                    )));
                }
                Ok(output.remove(0))
            }
        }
    }
}

fn keep_id(original: &Document, updated: Document) -> QuarryResult<Document> {
    if original.id() != updated.id() {
        log::error!("Update would change _id of {}", original);
        return Err(QuarryError::new(
            "Performing an update on the path '_id' would modify the immutable field '_id'",
            ErrorKind::InvalidOperation,
        ));
    }
    Ok(updated)
}

fn seed_from_query(query: &Document) -> QuarryResult<Document> {
    let mut seed = Document::new();
    for (field, condition) in query {
        if field.starts_with(OPERATOR_SIGIL) {
            continue;
        }
        match condition {
            Value::Document(ops) if is_operator_document(condition) => {
                if let Some(value) = ops.get("$eq") {
                    seed.put_path(field, value.clone())?;
                }
            }
            other => seed.put_path(field, other.clone())?,
        }
    }
    Ok(seed)
}

/// `$pull` takes a value, a query on element fields, or operator conditions
/// on the element itself.
fn pull_filter(value: &Value, aggregator: &Aggregator) -> QuarryResult<Option<Filter>> {
    match value {
        Value::Document(condition) if is_operator_document(value) => {
            let mut wrapped = Document::new();
            wrapped.insert(PULL_ELEMENT, condition.clone());
            Ok(Some(Filter::parse(&wrapped, aggregator)?))
        }
        Value::Document(query) => Ok(Some(Filter::parse(query, aggregator)?)),
        _ => Ok(None),
    }
}

const PULL_ELEMENT: &str = "element";

impl FieldUpdate {
    fn apply(&self, doc: &mut Document, inserting: bool) -> QuarryResult<()> {
        if self.path == DOC_ID && !matches!(self.operator, UpdateOperator::SetOnInsert) && !inserting {
            if self.operator != UpdateOperator::Set || doc.id() != Some(&self.value) {
                log::error!("Update operator {:?} targets _id", self.operator);
                return Err(QuarryError::new(
                    "Performing an update on the path '_id' would modify the immutable field '_id'",
                    ErrorKind::InvalidOperation,
                ));
            }
        }

        let current = doc.get_path(&self.path).cloned();
        match self.operator {
            UpdateOperator::Set => doc.put_path(&self.path, self.value.clone()),
            UpdateOperator::SetOnInsert => {
                if inserting {
                    doc.put_path(&self.path, self.value.clone())?;
                }
                Ok(())
            }
            UpdateOperator::Unset => {
                doc.remove_path(&self.path);
                Ok(())
            }
            UpdateOperator::Inc | UpdateOperator::Mul => {
                let name = if self.operator == UpdateOperator::Inc { "$inc" } else { "$mul" };
                if !self.value.is_number() {
                    return Err(invalid_update(format!("Cannot {} with non-numeric argument", name)));
                }
                let result = match current {
                    None => match self.operator {
                        UpdateOperator::Inc => self.value.clone(),
                        _ => multiply_numbers(&Value::Int(0), &self.value),
                    },
                    Some(existing) if existing.is_number() => match self.operator {
                        UpdateOperator::Inc => add_numbers(&existing, &self.value),
                        _ => multiply_numbers(&existing, &self.value),
                    },
                    Some(existing) => {
                        return Err(invalid_update(format!(
                            "Cannot apply {} to a value of non-numeric type {} at '{}'",
                            name,
                            existing.type_name(),
                            self.path
                        )))
                    }
                };
                doc.put_path(&self.path, result)
            }
            UpdateOperator::Min | UpdateOperator::Max => {
                let wanted = if self.operator == UpdateOperator::Min { Ordering::Less } else { Ordering::Greater };
                match current {
                    Some(existing) if self.value.cmp(&existing) != wanted => Ok(()),
                    _ => doc.put_path(&self.path, self.value.clone()),
                }
            }
            UpdateOperator::Rename => {
                if let Some(value) = doc.remove_path(&self.path) {
                    let target = self.value.as_str().unwrap_or_default();
                    doc.put_path(target, value)?;
                }
                Ok(())
            }
            UpdateOperator::Push | UpdateOperator::AddToSet => {
                let mut items = self.existing_array(current)?;
                let additions = match &self.value {
                    Value::Document(each) if each.contains_key("$each") => match each.get("$each") {
                        Some(Value::Array(values)) => values.clone(),
                        _ => return Err(invalid_update("$each requires an array".to_string())),
                    },
                    value => vec![value.clone()],
                };
                for value in additions {
                    if self.operator == UpdateOperator::Push || !items.contains(&value) {
                        items.push(value);
                    }
                }
                doc.put_path(&self.path, Value::Array(items))
            }
            UpdateOperator::Pull => {
                if current.is_none() {
                    return Ok(());
                }
                let items = self.existing_array(current)?;
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    if !self.pull_matches(&item)? {
                        kept.push(item);
                    }
                }
                doc.put_path(&self.path, Value::Array(kept))
            }
        }
    }

    fn existing_array(&self, current: Option<Value>) -> QuarryResult<Vec<Value>> {
        match current {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(invalid_update(format!(
                "The field '{}' must be an array but is of type {}",
                self.path,
                other.type_name()
            ))),
        }
    }

    fn pull_matches(&self, item: &Value) -> QuarryResult<bool> {
        match &self.pull_filter {
            None => Ok(item == &self.value),
            Some(filter) if is_operator_document(&self.value) => {
                let mut wrapped = Document::new();
                wrapped.insert(PULL_ELEMENT, item.clone());
                filter.apply(&wrapped)
            }
            Some(filter) => match item {
                Value::Document(element) => filter.apply(element),
                _ => Ok(false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::{doc, val};

    fn update(spec: Document, original: Document) -> QuarryResult<Document> {
        Update::compile(&Value::Document(spec), &test_aggregator())?.apply(&original)
    }

    #[test]
    fn test_replacement_keeps_id() {
        let out = update(doc! { title: "new" }, doc! { _id: "a", title: "old", n: 1 }).unwrap();
        assert_eq!(out, doc! { _id: "a", title: "new" });
        assert!(update(doc! { _id: "b" }, doc! { _id: "a" }).is_err());
    }

    #[test]
    fn test_mixed_update_is_rejected() {
        assert!(Update::compile(&Value::Document(doc! { a: 1, "$set": { b: 1 } }), &test_aggregator()).is_err());
    }

    #[test]
    fn test_field_operators() {
        let out = update(
            doc! {
                "$set": { "a.b": 1 },
                "$unset": { gone: "" },
                "$inc": { n: 2, fresh: 5 },
                "$mul": { price: 2 },
                "$rename": { old: "renamed" },
                "$min": { low: 3 },
                "$max": { high: 3 }
            },
            doc! { _id: 1, gone: true, n: 1, price: 1.5, old: "x", low: 5, high: 5 },
        )
        .unwrap();
        assert_eq!(
            out,
            doc! {
                _id: 1, a: { b: 1 }, n: 3, fresh: 5, price: 3.0,
                renamed: "x", low: 3, high: 5
            }
        );
    }

    #[test]
    fn test_array_operators() {
        let out = update(
            doc! {
                "$push": { tags: { "$each": ["c", "a"] } },
                "$addToSet": { set: "x" },
                "$pull": { nums: { "$gte": 3 }, items: { kind: "bad" } }
            },
            doc! {
                _id: 1, tags: ["a"], set: ["x"], nums: [1, 3, 5, 2],
                items: [{ kind: "bad" }, { kind: "ok" }]
            },
        )
        .unwrap();
        assert_eq!(out.get("tags"), Some(&Value::Array(vec![val!("a"), val!("c"), val!("a")])));
        assert_eq!(out.get("set"), Some(&Value::Array(vec![val!("x")])));
        assert_eq!(out.get("nums"), Some(&Value::Array(vec![val!(1), val!(2)])));
        assert_eq!(out.get("items"), Some(&Value::Array(vec![Value::Document(doc! { kind: "ok" })])));
    }

    #[test]
    fn test_inc_on_string_fails() {
        assert!(update(doc! { "$inc": { s: 1 } }, doc! { s: "x" }).is_err());
    }

    #[test]
    fn test_set_with_huge_array_index_fails() {
        let err = update(doc! { "$set": { "tags.1000000000000000000": "x" } }, doc! { tags: ["a"] }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_id_is_immutable() {
        let err = update(doc! { "$set": { _id: "b" } }, doc! { _id: "a" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert!(update(doc! { "$set": { _id: "a" } }, doc! { _id: "a" }).is_ok());
    }

    #[test]
    fn test_pipeline_update() {
        let spec = Value::Array(vec![Value::Document(doc! { "$set": { total: { "$add": ["$a", "$b"] } } })]);
        let out = Update::compile(&spec, &test_aggregator())
            .unwrap()
            .apply(&doc! { _id: 1, a: 1, b: 2 })
            .unwrap();
        assert_eq!(out, doc! { _id: 1, a: 1, b: 2, total: 3 });
    }

    #[test]
    fn test_upsert_seeds_from_query() {
        let update = Update::compile(
            &Value::Document(doc! { "$set": { title: "t" }, "$setOnInsert": { created: true } }),
            &test_aggregator(),
        )
        .unwrap();
        let doc = update
            .upsert_document(&doc! { _id: "p1", kind: { "$eq": "post" }, n: { "$gt": 1 } })
            .unwrap();
        assert_eq!(doc, doc! { _id: "p1", kind: "post", title: "t", created: true });
        let applied = update.apply(&doc! { _id: "p1" }).unwrap();
        assert_eq!(applied, doc! { _id: "p1", title: "t" });
    }
}
