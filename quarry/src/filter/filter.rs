use crate::aggregation::Aggregator;
use crate::collection::Document;
use crate::common::{Value, DOC_ID, FIELD_SEPARATOR, OPERATOR_SIGIL};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use regex::Regex;
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

use super::{
    AllFilter, AndFilter, ArrayFilter, ArrayOp, ComparisonFilter, ComparisonOp, ElemMatchFilter,
    ExistsFilter, ExprFilter, InFilter, NorFilter, NotFilter, OrFilter, RegexFilter,
};

/// A predicate over documents.
///
/// Filters are compiled once from a query document (see [Filter::parse]) and
/// then applied to every candidate document. They back `$match`, the
/// `filter` of `find`, the `q` of `update` and `delete`, and query-style
/// collection validators.
pub trait FilterProvider: Send + Sync + Display {
    /// Returns whether the document satisfies the filter.
    fn apply(&self, entry: &Document) -> QuarryResult<bool>;

    /// Returns the `_id` value when the filter pins a single id by equality.
    ///
    /// Stores use this to read one file instead of scanning a directory.
    fn id_equality(&self) -> Option<Value> {
        None
    }
}

/// A cloneable handle to a compiled [FilterProvider].
#[derive(Clone)]
pub struct Filter {
    inner: Arc<dyn FilterProvider>,
}

impl Filter {
    pub fn new<T: FilterProvider + 'static>(inner: T) -> Self {
        Filter {
            inner: Arc::new(inner),
        }
    }

    /// A filter that accepts every document.
    pub fn all() -> Self {
        Filter::new(AllFilter)
    }

    /// Equality on a field path, with array-element matching.
    pub fn eq<V: Into<Value>>(field: &str, value: V) -> Self {
        Filter::new(ComparisonFilter::new(field, ComparisonOp::Eq, value.into()))
    }

    /// Compiles a query document such as `{age: {$gte: 18}, $or: [...]}`.
    ///
    /// The aggregator supplies the operator registry for `$expr`.
    pub fn parse(query: &Document, aggregator: &Aggregator) -> QuarryResult<Filter> {
        let mut filters = Vec::with_capacity(query.len());
        for (key, value) in query.iter() {
            if key.starts_with(OPERATOR_SIGIL) {
                filters.push(parse_top_level_operator(key, value, aggregator)?);
            } else {
                filters.push(parse_field_condition(key, value, aggregator)?);
            }
        }

        Ok(match filters.len() {
            0 => Filter::all(),
            1 => filters.remove(0),
            _ => Filter::new(AndFilter::new(filters)),
        })
    }
}

impl Deref for Filter {
    type Target = Arc<dyn FilterProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

fn parse_top_level_operator(key: &str, value: &Value, aggregator: &Aggregator) -> QuarryResult<Filter> {
    match key {
        "$and" | "$or" | "$nor" => {
            let clauses = sub_queries(key, value, aggregator)?;
            Ok(match key {
                "$and" => Filter::new(AndFilter::new(clauses)),
                "$or" => Filter::new(OrFilter::new(clauses)),
                _ => Filter::new(NorFilter::new(clauses)),
            })
        }
        "$expr" => {
            let expression = aggregator.compile_expression(value)?;
            Ok(Filter::new(ExprFilter::new(expression)))
        }
        "$comment" => Ok(Filter::all()),
        _ => {
            log::error!("Unknown top level query operator {}", key);
            Err(QuarryError::new(
                &format!("Unknown top level operator: {}", key),
                ErrorKind::UnknownOperator,
            ))
        }
    }
}

fn sub_queries(key: &str, value: &Value, aggregator: &Aggregator) -> QuarryResult<Vec<Filter>> {
    let clauses = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            log::error!("{} requires a non-empty array, found {}", key, value);
            return Err(QuarryError::new(
                &format!("{} must be a non-empty array", key),
                ErrorKind::InvalidArgument,
            ));
        }
    };

    clauses
        .iter()
        .map(|clause| match clause {
            Value::Document(query) => Filter::parse(query, aggregator),
            other => {
                log::error!("{} entries must be documents, found {}", key, other);
                Err(QuarryError::new(
                    &format!("{} entries must be documents", key),
                    ErrorKind::InvalidArgument,
                ))
            }
        })
        .collect()
}

/// Whether a condition value is an operator document like `{$gt: 1, $lt: 5}`.
pub(crate) fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Document(doc) => {
            !doc.is_empty() && doc.keys().all(|k| k.starts_with(OPERATOR_SIGIL))
        }
        _ => false,
    }
}

/// Compiles the condition for one field path.
pub(crate) fn parse_field_condition(field: &str, condition: &Value, aggregator: &Aggregator) -> QuarryResult<Filter> {
    if !is_operator_document(condition) {
        return Ok(Filter::new(ComparisonFilter::new(
            field,
            ComparisonOp::Eq,
            condition.clone(),
        )));
    }

    let operators = condition.as_document().cloned().unwrap_or_default();
    let options = operators
        .get("$options")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut filters = Vec::with_capacity(operators.len());
    for (operator, operand) in operators.iter() {
        let filter = match operator.as_str() {
            "$eq" => Filter::new(ComparisonFilter::new(field, ComparisonOp::Eq, operand.clone())),
            "$ne" => Filter::new(NotFilter::new(Filter::new(ComparisonFilter::new(
                field,
                ComparisonOp::Eq,
                operand.clone(),
            )))),
            "$gt" => Filter::new(ComparisonFilter::new(field, ComparisonOp::Gt, operand.clone())),
            "$gte" => Filter::new(ComparisonFilter::new(field, ComparisonOp::Gte, operand.clone())),
            "$lt" => Filter::new(ComparisonFilter::new(field, ComparisonOp::Lt, operand.clone())),
            "$lte" => Filter::new(ComparisonFilter::new(field, ComparisonOp::Lte, operand.clone())),
            "$in" => Filter::new(InFilter::new(field, array_operand(operator, operand)?)),
            "$nin" => Filter::new(NotFilter::new(Filter::new(InFilter::new(
                field,
                array_operand(operator, operand)?,
            )))),
            "$exists" => Filter::new(ExistsFilter::new(field, operand.is_truthy())),
            "$regex" => Filter::new(RegexFilter::new(field, compile_regex(operand, &options)?)),
            "$options" => continue,
            "$size" => {
                let size = operand.as_i64().filter(|s| *s >= 0).ok_or_else(|| {
                    log::error!("$size requires a non-negative integer, found {}", operand);
                    QuarryError::new("$size requires a non-negative integer", ErrorKind::InvalidArgument)
                })?;
                Filter::new(ArrayFilter::new(field, ArrayOp::Size(size as usize)))
            }
            "$all" => Filter::new(ArrayFilter::new(
                field,
                ArrayOp::All(array_operand(operator, operand)?),
            )),
            "$elemMatch" => {
                let query = operand.as_document().ok_or_else(|| {
                    log::error!("$elemMatch requires a document, found {}", operand);
                    QuarryError::new("$elemMatch requires a document", ErrorKind::InvalidArgument)
                })?;
                Filter::new(ElemMatchFilter::parse(field, query, aggregator)?)
            }
            "$not" => {
                let inner = match operand {
                    Value::String(_) => {
                        Filter::new(RegexFilter::new(field, compile_regex(operand, "")?))
                    }
                    Value::Document(_) if is_operator_document(operand) => {
                        parse_field_condition(field, operand, aggregator)?
                    }
                    _ => {
                        log::error!("$not requires an operator document, found {}", operand);
                        return Err(QuarryError::new(
                            "$not requires an operator document or a regex",
                            ErrorKind::InvalidArgument,
                        ));
                    }
                };
                Filter::new(NotFilter::new(inner))
            }
            other => {
                log::error!("Unknown query operator {} on field {}", other, field);
                return Err(QuarryError::new(
                    &format!("Unknown query operator: {}", other),
                    ErrorKind::UnknownOperator,
                ));
            }
        };
        filters.push(filter);
    }

    Ok(match filters.len() {
        0 => Filter::all(),
        1 => filters.remove(0),
        _ => Filter::new(AndFilter::new(filters)),
    })
}

fn array_operand(operator: &str, operand: &Value) -> QuarryResult<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        other => {
            log::error!("{} requires an array, found {}", operator, other);
            Err(QuarryError::new(
                &format!("{} requires an array", operator),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

fn compile_regex(pattern: &Value, options: &str) -> QuarryResult<Regex> {
    let pattern = pattern.as_str().ok_or_else(|| {
        log::error!("$regex requires a string pattern, found {}", pattern);
        QuarryError::new("$regex requires a string pattern", ErrorKind::InvalidArgument)
    })?;

    let mut flags = String::new();
    for option in options.chars() {
        match option {
            'i' | 'm' | 's' | 'x' => flags.push(option),
            other => {
                log::error!("Unsupported regex option {}", other);
                return Err(QuarryError::new(
                    &format!("Unsupported regex option: {}", other),
                    ErrorKind::InvalidArgument,
                ));
            }
        }
    }

    let pattern = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Ok(Regex::new(&pattern)?)
}

/// Collects every value a dotted path reaches.
///
/// Arrays met along the way fan out: `a.b` over `a: [{b: 1}, {b: 2}]`
/// reaches both `1` and `2`. A numeric segment also indexes the array.
pub(crate) fn field_candidates<'a>(doc: &'a Document, field: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = field.split(FIELD_SEPARATOR).collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(segments[0]) {
        collect_candidates(first, &segments[1..], &mut out);
    }
    out
}

fn collect_candidates<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    if segments.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Document(doc) => {
            if let Some(next) = doc.get(segments[0]) {
                collect_candidates(next, &segments[1..], out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect_candidates(next, &segments[1..], out);
                }
            }
            for item in items.iter().filter(|item| item.is_document()) {
                collect_candidates(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Applies a predicate to each candidate and, for array candidates, to each element.
pub(crate) fn any_candidate<F: Fn(&Value) -> bool>(candidates: &[&Value], predicate: F) -> bool {
    candidates.iter().any(|candidate| {
        predicate(candidate)
            || matches!(candidate, Value::Array(items) if items.iter().any(&predicate))
    })
}

/// Whether the filter pins `_id` by plain equality.
pub(crate) fn pins_id(field: &str, op: ComparisonOp, value: &Value) -> Option<Value> {
    if field == DOC_ID && op == ComparisonOp::Eq && !value.is_array() && !value.is_document() {
        Some(value.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::doc;

    fn matches(query: Document, doc: Document) -> bool {
        let filter = Filter::parse(&query, &test_aggregator()).unwrap();
        filter.apply(&doc).unwrap()
    }

    #[test]
    fn implicit_equality_and_missing_null() {
        assert!(matches(doc! { a: 1 }, doc! { a: 1.0 }));
        assert!(!matches(doc! { a: 1 }, doc! { a: 2 }));
        assert!(matches(doc! { a: null }, doc! { b: 1 }));
        assert!(matches(doc! { a: null }, doc! { a: null }));
        assert!(!matches(doc! { a: null }, doc! { a: 0 }));
    }

    #[test]
    fn equality_reaches_array_elements() {
        assert!(matches(doc! { tags: "x" }, doc! { tags: ["y", "x"] }));
        assert!(matches(doc! { tags: ["y", "x"] }, doc! { tags: ["y", "x"] }));
        assert!(!matches(doc! { tags: ["x", "y"] }, doc! { tags: ["y", "x"] }));
    }

    #[test]
    fn dotted_paths_fan_out_over_arrays() {
        let doc = doc! { items: [{ sku: "a", qty: 1 }, { sku: "b", qty: 5 }] };
        assert!(matches(doc! { "items.sku": "b" }, doc.clone()));
        assert!(matches(doc! { "items.1.sku": "b" }, doc.clone()));
        assert!(!matches(doc! { "items.0.sku": "b" }, doc.clone()));
        assert!(matches(doc! { "items.qty": { "$gt": 4 } }, doc));
    }

    #[test]
    fn comparisons_bracket_types() {
        assert!(matches(doc! { a: { "$gt": 1 } }, doc! { a: 2 }));
        assert!(!matches(doc! { a: { "$gt": 1 } }, doc! { a: "2" }));
        assert!(matches(doc! { a: { "$gte": 1, "$lt": 3 } }, doc! { a: 2.5 }));
        assert!(!matches(doc! { a: { "$lte": 1 } }, doc! { b: 0 }));
    }

    #[test]
    fn ne_and_nin_match_missing_fields() {
        assert!(matches(doc! { a: { "$ne": 1 } }, doc! { b: 1 }));
        assert!(!matches(doc! { a: { "$ne": 1 } }, doc! { a: [1, 2] }));
        assert!(matches(doc! { a: { "$nin": [1, 2] } }, doc! { a: 3 }));
        assert!(matches(doc! { a: { "$in": [null] } }, doc! {}));
    }

    #[test]
    fn exists_regex_size_all() {
        assert!(matches(doc! { a: { "$exists": true } }, doc! { a: null }));
        assert!(matches(doc! { a: { "$exists": false } }, doc! { b: 1 }));
        assert!(matches(doc! { s: { "$regex": "^ab", "$options": "i" } }, doc! { s: "ABc" }));
        assert!(!matches(doc! { s: { "$regex": "^ab" } }, doc! { s: "ABc" }));
        assert!(matches(doc! { l: { "$size": 2 } }, doc! { l: [1, 2] }));
        assert!(matches(doc! { l: { "$all": [2, 1] } }, doc! { l: [1, 2, 3] }));
        assert!(!matches(doc! { l: { "$all": [4] } }, doc! { l: [1, 2, 3] }));
    }

    #[test]
    fn elem_match_on_documents_and_values() {
        let doc = doc! { results: [{ product: "x", score: 8 }, { product: "y", score: 2 }] };
        assert!(matches(
            doc! { results: { "$elemMatch": { product: "y", score: { "$lt": 5 } } } },
            doc.clone()
        ));
        assert!(!matches(
            doc! { results: { "$elemMatch": { product: "x", score: { "$lt": 5 } } } },
            doc
        ));
        assert!(matches(
            doc! { scores: { "$elemMatch": { "$gte": 80, "$lt": 85 } } },
            doc! { scores: [70, 82, 90] }
        ));
    }

    #[test]
    fn logical_operators() {
        let doc = doc! { a: 1, b: 2 };
        assert!(matches(doc! { "$or": [{ a: 5 }, { b: 2 }] }, doc.clone()));
        assert!(!matches(doc! { "$and": [{ a: 1 }, { b: 3 }] }, doc.clone()));
        assert!(matches(doc! { "$nor": [{ a: 5 }, { b: 5 }] }, doc.clone()));
        assert!(matches(doc! { a: { "$not": { "$gt": 3 } } }, doc));
    }

    #[test]
    fn expr_uses_aggregation_expressions() {
        assert!(matches(doc! { "$expr": { "$gt": ["$a", "$b"] } }, doc! { a: 3, b: 2 }));
        assert!(!matches(doc! { "$expr": { "$gt": ["$a", "$b"] } }, doc! { a: 1, b: 2 }));
    }

    #[test]
    fn unknown_operators_fail_to_compile() {
        let aggregator = test_aggregator();
        let err = Filter::parse(&doc! { a: { "$near": 1 } }, &aggregator).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::UnknownOperator);
        assert!(Filter::parse(&doc! { "$or": [] }, &aggregator).is_err());
    }

    #[test]
    fn id_equality_is_detected() {
        let aggregator = test_aggregator();
        let filter = Filter::parse(&doc! { _id: "p1" }, &aggregator).unwrap();
        assert_eq!(filter.id_equality(), Some(Value::from("p1")));
        let filter = Filter::parse(&doc! { _id: "p1", title: "t" }, &aggregator).unwrap();
        assert_eq!(filter.id_equality(), Some(Value::from("p1")));
        let filter = Filter::parse(&doc! { _id: { "$in": ["p1"] } }, &aggregator).unwrap();
        assert_eq!(filter.id_equality(), None);
    }
}
