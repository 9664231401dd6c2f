use crate::aggregation::Aggregator;
use crate::collection::Document;
use crate::common::Value;
use crate::errors::QuarryResult;
use regex::Regex;
use std::fmt::Display;

use super::filter::{any_candidate, field_candidates, is_operator_document, parse_field_condition, pins_id};
use super::{Filter, FilterProvider};

/// Field name used to test bare array elements against operator conditions.
const ELEMENT_FIELD: &str = "element";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComparisonOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
        };
        write!(f, "{}", symbol)
    }
}

/// Equality and range comparison against a constant.
///
/// Range operators only compare values of the same type class, so
/// `{a: {$gt: 1}}` never matches a string.
pub(crate) struct ComparisonFilter {
    field: String,
    op: ComparisonOp,
    value: Value,
}

impl ComparisonFilter {
    pub(crate) fn new(field: &str, op: ComparisonOp, value: Value) -> Self {
        ComparisonFilter {
            field: field.to_string(),
            op,
            value,
        }
    }

    fn compare(&self, candidate: &Value) -> bool {
        match self.op {
            ComparisonOp::Eq => candidate == &self.value,
            _ if candidate.type_order() != self.value.type_order() => false,
            ComparisonOp::Gt => candidate > &self.value,
            ComparisonOp::Gte => candidate >= &self.value,
            ComparisonOp::Lt => candidate < &self.value,
            ComparisonOp::Lte => candidate <= &self.value,
        }
    }
}

impl Display for ComparisonFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.field, self.op, self.value)
    }
}

impl FilterProvider for ComparisonFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        let candidates = field_candidates(entry, &self.field);
        if candidates.is_empty() {
            // a missing field compares equal to null
            return Ok(self.value.is_null()
                && matches!(self.op, ComparisonOp::Eq | ComparisonOp::Gte | ComparisonOp::Lte));
        }
        Ok(any_candidate(&candidates, |c| self.compare(c)))
    }

    fn id_equality(&self) -> Option<Value> {
        pins_id(&self.field, self.op, &self.value)
    }
}

pub(crate) struct InFilter {
    field: String,
    values: Vec<Value>,
}

impl InFilter {
    pub(crate) fn new(field: &str, values: Vec<Value>) -> Self {
        InFilter {
            field: field.to_string(),
            values,
        }
    }
}

impl Display for InFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} in {})", self.field, Value::Array(self.values.clone()))
    }
}

impl FilterProvider for InFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        let candidates = field_candidates(entry, &self.field);
        if candidates.is_empty() {
            return Ok(self.values.iter().any(|v| v.is_null()));
        }
        Ok(any_candidate(&candidates, |c| self.values.contains(c)))
    }
}

pub(crate) struct ExistsFilter {
    field: String,
    exists: bool,
}

impl ExistsFilter {
    pub(crate) fn new(field: &str, exists: bool) -> Self {
        ExistsFilter {
            field: field.to_string(),
            exists,
        }
    }
}

impl Display for ExistsFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} exists {})", self.field, self.exists)
    }
}

impl FilterProvider for ExistsFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        Ok(!field_candidates(entry, &self.field).is_empty() == self.exists)
    }
}

pub(crate) struct RegexFilter {
    field: String,
    regex: Regex,
}

impl RegexFilter {
    pub(crate) fn new(field: &str, regex: Regex) -> Self {
        RegexFilter {
            field: field.to_string(),
            regex,
        }
    }
}

impl Display for RegexFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} =~ /{}/)", self.field, self.regex.as_str())
    }
}

impl FilterProvider for RegexFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        let candidates = field_candidates(entry, &self.field);
        Ok(any_candidate(&candidates, |c| {
            c.as_str().map(|s| self.regex.is_match(s)).unwrap_or(false)
        }))
    }
}

pub(crate) enum ArrayOp {
    Size(usize),
    All(Vec<Value>),
}

/// Conditions on an array as a whole: `$size` and `$all`.
pub(crate) struct ArrayFilter {
    field: String,
    op: ArrayOp,
}

impl ArrayFilter {
    pub(crate) fn new(field: &str, op: ArrayOp) -> Self {
        ArrayFilter {
            field: field.to_string(),
            op,
        }
    }

    fn test(&self, items: &[Value]) -> bool {
        match &self.op {
            ArrayOp::Size(size) => items.len() == *size,
            ArrayOp::All(values) => {
                !values.is_empty() && values.iter().all(|v| items.contains(v))
            }
        }
    }
}

impl Display for ArrayFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.op {
            ArrayOp::Size(size) => write!(f, "(size({}) == {})", self.field, size),
            ArrayOp::All(values) => write!(
                f,
                "({} contains all {})",
                self.field,
                Value::Array(values.clone())
            ),
        }
    }
}

impl FilterProvider for ArrayFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        Ok(field_candidates(entry, &self.field)
            .iter()
            .any(|c| matches!(c, Value::Array(items) if self.test(items))))
    }
}

enum ElementMatcher {
    /// Sub-query applied to document elements.
    Document(Filter),
    /// Operator conditions applied to the element value itself.
    Value(Filter),
}

/// Matches when at least one array element satisfies every condition.
pub(crate) struct ElemMatchFilter {
    field: String,
    matcher: ElementMatcher,
}

impl ElemMatchFilter {
    pub(crate) fn parse(field: &str, query: &Document, aggregator: &Aggregator) -> QuarryResult<Self> {
        let logical = ["$and", "$or", "$nor", "$expr"];
        let as_value = Value::Document(query.clone());
        let matcher = if is_operator_document(&as_value)
            && !query.keys().any(|k| logical.contains(&k.as_str()))
        {
            ElementMatcher::Value(parse_field_condition(ELEMENT_FIELD, &as_value, aggregator)?)
        } else {
            ElementMatcher::Document(Filter::parse(query, aggregator)?)
        };
        Ok(ElemMatchFilter {
            field: field.to_string(),
            matcher,
        })
    }

    fn element_matches(&self, element: &Value) -> QuarryResult<bool> {
        match &self.matcher {
            ElementMatcher::Document(filter) => match element {
                Value::Document(doc) => filter.apply(doc),
                _ => Ok(false),
            },
            ElementMatcher::Value(filter) => {
                let mut wrapper = Document::new();
                wrapper.insert(ELEMENT_FIELD, element.clone());
                filter.apply(&wrapper)
            }
        }
    }
}

impl Display for ElemMatchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.matcher {
            ElementMatcher::Document(filter) | ElementMatcher::Value(filter) => {
                write!(f, "({} elemMatch {})", self.field, filter)
            }
        }
    }
}

impl FilterProvider for ElemMatchFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        for candidate in field_candidates(entry, &self.field) {
            if let Value::Array(items) = candidate {
                for item in items {
                    if self.element_matches(item)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}
