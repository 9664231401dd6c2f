use crate::aggregation::Expression;
use crate::collection::Document;
use crate::common::Value;
use crate::errors::QuarryResult;
use itertools::Itertools;
use std::fmt::Display;

use super::{Filter, FilterProvider};

pub(crate) struct AllFilter;

impl FilterProvider for AllFilter {
    fn apply(&self, _entry: &Document) -> QuarryResult<bool> {
        Ok(true)
    }
}

impl Display for AllFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AllFilter")
    }
}

pub(crate) struct AndFilter {
    filters: Vec<Filter>,
}

impl AndFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        AndFilter { filters }
    }
}

impl Display for AndFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.filters.iter().join(" && "))
    }
}

impl FilterProvider for AndFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        for filter in &self.filters {
            if !filter.apply(entry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn id_equality(&self) -> Option<Value> {
        self.filters.iter().find_map(|f| f.id_equality())
    }
}

pub(crate) struct OrFilter {
    filters: Vec<Filter>,
}

impl OrFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        OrFilter { filters }
    }
}

impl Display for OrFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.filters.iter().join(" || "))
    }
}

impl FilterProvider for OrFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        for filter in &self.filters {
            if filter.apply(entry)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub(crate) struct NorFilter {
    filters: Vec<Filter>,
}

impl NorFilter {
    pub(crate) fn new(filters: Vec<Filter>) -> Self {
        NorFilter { filters }
    }
}

impl Display for NorFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!({})", self.filters.iter().join(" || "))
    }
}

impl FilterProvider for NorFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        for filter in &self.filters {
            if filter.apply(entry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub(crate) struct NotFilter {
    filter: Filter,
}

impl NotFilter {
    pub(crate) fn new(filter: Filter) -> Self {
        NotFilter { filter }
    }
}

impl Display for NotFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.filter)
    }
}

impl FilterProvider for NotFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        Ok(!self.filter.apply(entry)?)
    }
}

/// `$expr`: an aggregation expression evaluated for truthiness.
pub(crate) struct ExprFilter {
    expression: Expression,
}

impl ExprFilter {
    pub(crate) fn new(expression: Expression) -> Self {
        ExprFilter { expression }
    }
}

impl Display for ExprFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "$expr({})", self.expression)
    }
}

impl FilterProvider for ExprFilter {
    fn apply(&self, entry: &Document) -> QuarryResult<bool> {
        Ok(self
            .expression
            .evaluate(entry)?
            .map(|v| v.is_truthy())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_and_filter_display() {
        let filter = AndFilter::new(vec![Filter::eq("a", 1), Filter::eq("b", 2)]);
        assert_eq!(filter.to_string(), "((a == 1) && (b == 2))");
    }

    #[test]
    fn test_or_short_circuits() {
        let filter = OrFilter::new(vec![Filter::eq("a", 1), Filter::eq("b", 2)]);
        assert!(filter.apply(&doc! { a: 1 }).unwrap());
        assert!(!filter.apply(&doc! { a: 2 }).unwrap());
    }

    #[test]
    fn test_not_filter() {
        let filter = NotFilter::new(Filter::eq("a", 1));
        assert!(filter.apply(&doc! { a: 2 }).unwrap());
        assert!(!filter.apply(&doc! { a: 1 }).unwrap());
    }

    #[test]
    fn test_and_exposes_id_equality() {
        let filter = AndFilter::new(vec![Filter::eq("a", 1), Filter::eq("_id", "k")]);
        assert_eq!(filter.id_equality(), Some(Value::from("k")));
        let filter = OrFilter::new(vec![Filter::eq("_id", "k")]);
        assert_eq!(filter.id_equality(), None);
    }
}
