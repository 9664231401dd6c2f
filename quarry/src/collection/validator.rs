use crate::aggregation::Aggregator;
use crate::collection::Document;
use crate::common::Value;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::filter::Filter;
use regex::Regex;
use std::sync::Arc;

const JSON_SCHEMA: &str = "$jsonSchema";

/// What happens when a document fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationAction {
    /// Reject the write.
    Error,
    /// Log the failure and accept the write.
    Warn,
}

impl ValidationAction {
    pub fn parse(value: Option<&Value>) -> QuarryResult<ValidationAction> {
        match value.and_then(|v| v.as_str()) {
            None | Some("error") => Ok(ValidationAction::Error),
            Some("warn") => Ok(ValidationAction::Warn),
            Some(other) => {
                log::error!("Unknown validation action {}", other);
                Err(QuarryError::new(
                    &format!("Unknown validationAction '{}', expected 'error' or 'warn'", other),
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }
}

/// A collection validator compiled once from its rule document.
///
/// The rule is a query document, a `{$jsonSchema: ...}` document, or both
/// side by side. A document is valid when it satisfies every part.
#[derive(Clone)]
pub struct Validator {
    rule: Arc<Document>,
    schema: Option<Arc<Schema>>,
    filter: Option<Filter>,
    action: ValidationAction,
}

impl Validator {
    pub fn compile(rule: &Document, action: ValidationAction, aggregator: &Aggregator) -> QuarryResult<Validator> {
        let mut query = rule.clone();
        let schema = match query.remove(JSON_SCHEMA) {
            Some(Value::Document(schema)) => Some(Arc::new(Schema::compile(&schema)?)),
            Some(other) => {
                log::error!("$jsonSchema must be an object, found {}", other.type_name());
                return Err(QuarryError::new(
                    "$jsonSchema must be an object",
                    ErrorKind::InvalidArgument,
                ));
            }
            None => None,
        };
        let filter = if query.is_empty() {
            None
        } else {
            Some(Filter::parse(&query, aggregator)?)
        };

        Ok(Validator {
            rule: Arc::new(rule.clone()),
            schema,
            filter,
            action,
        })
    }

    pub fn rule(&self) -> &Document {
        &self.rule
    }

    pub fn action(&self) -> ValidationAction {
        self.action
    }

    /// Checks a candidate document, failing with [ErrorKind::ValidationError].
    ///
    /// The error details hold the offending document and the rule.
    pub fn validate(&self, document: &Document) -> QuarryResult<()> {
        let failure = match self.check(document)? {
            Some(reason) => reason,
            None => return Ok(()),
        };

        if self.action == ValidationAction::Warn {
            log::warn!("Document {} failed validation: {}", document, failure);
            return Ok(());
        }

        log::error!("Document {} failed validation: {}", document, failure);
        let mut details = Document::new();
        details.insert("document", document.clone());
        details.insert("rule", self.rule.as_ref().clone());
        details.insert("reason", failure.as_str());
        Err(QuarryError::new(
            &format!("Document failed validation: {}", failure),
            ErrorKind::ValidationError,
        )
        .with_details(details))
    }

    fn check(&self, document: &Document) -> QuarryResult<Option<String>> {
        if let Some(schema) = &self.schema {
            if let Err(reason) = schema.check(&Value::Document(document.clone()), "") {
                return Ok(Some(reason));
            }
        }
        if let Some(filter) = &self.filter {
            if !filter.apply(document)? {
                return Ok(Some(format!("query {} did not match", filter)));
            }
        }
        Ok(None)
    }
}

/// The supported subset of JSON schema.
#[derive(Default)]
struct Schema {
    types: Vec<String>,
    required: Vec<String>,
    properties: Vec<(String, Schema)>,
    additional_properties: Option<bool>,
    enumeration: Option<Vec<Value>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    items: Option<Box<Schema>>,
    min_items: Option<usize>,
    max_items: Option<usize>,
}

fn schema_error(message: String) -> QuarryError {
    log::error!("{}", message);
    QuarryError::new(&message, ErrorKind::InvalidArgument)
}

fn string_list(keyword: &str, value: &Value) -> QuarryResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| schema_error(format!("{} must list strings", keyword)))
            })
            .collect(),
        _ => Err(schema_error(format!("{} must be a string or an array of strings", keyword))),
    }
}

fn count(keyword: &str, value: &Value) -> QuarryResult<usize> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(schema_error(format!("{} must be a non-negative integer", keyword))),
    }
}

fn number(keyword: &str, value: &Value) -> QuarryResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| schema_error(format!("{} must be a number", keyword)))
}

impl Schema {
    fn compile(spec: &Document) -> QuarryResult<Schema> {
        let mut schema = Schema::default();
        for (keyword, value) in spec {
            match keyword.as_str() {
                "bsonType" | "type" => schema.types = string_list(keyword, value)?,
                "required" => schema.required = string_list(keyword, value)?,
                "properties" => {
                    let properties = value
                        .as_document()
                        .ok_or_else(|| schema_error("properties must be an object".to_string()))?;
                    for (name, property) in properties {
                        let property = property.as_document().ok_or_else(|| {
                            schema_error(format!("schema for property {} must be an object", name))
                        })?;
                        schema.properties.push((name.clone(), Schema::compile(property)?));
                    }
                }
                "additionalProperties" => match value {
                    Value::Bool(allowed) => schema.additional_properties = Some(*allowed),
                    _ => return Err(schema_error("additionalProperties must be a boolean".to_string())),
                },
                "enum" => match value {
                    Value::Array(items) => schema.enumeration = Some(items.clone()),
                    _ => return Err(schema_error("enum must be an array".to_string())),
                },
                "minimum" => schema.minimum = Some(number(keyword, value)?),
                "maximum" => schema.maximum = Some(number(keyword, value)?),
                "minLength" => schema.min_length = Some(count(keyword, value)?),
                "maxLength" => schema.max_length = Some(count(keyword, value)?),
                "minItems" => schema.min_items = Some(count(keyword, value)?),
                "maxItems" => schema.max_items = Some(count(keyword, value)?),
                "pattern" => {
                    let pattern = value
                        .as_str()
                        .ok_or_else(|| schema_error("pattern must be a string".to_string()))?;
                    schema.pattern = Some(Regex::new(pattern)?);
                }
                "items" => {
                    let items = value
                        .as_document()
                        .ok_or_else(|| schema_error("items must be an object".to_string()))?;
                    schema.items = Some(Box::new(Schema::compile(items)?));
                }
                "title" | "description" => {}
                other => {
                    return Err(schema_error(format!("Unsupported $jsonSchema keyword: {}", other)));
                }
            }
        }
        Ok(schema)
    }

    fn check(&self, value: &Value, path: &str) -> Result<(), String> {
        let at = if path.is_empty() { "document".to_string() } else { format!("'{}'", path) };

        if !self.types.is_empty() && !self.types.iter().any(|t| type_matches(value, t)) {
            return Err(format!("{} must be of type {}", at, self.types.join(" or ")));
        }
        if let Some(allowed) = &self.enumeration {
            if !allowed.contains(value) {
                return Err(format!("{} must be one of the enumerated values", at));
            }
        }

        match value {
            Value::Document(doc) => self.check_document(doc, path, &at)?,
            Value::Array(items) => self.check_array(items, path, &at)?,
            Value::String(s) => {
                let length = s.chars().count();
                if self.min_length.is_some_and(|min| length < min) {
                    return Err(format!("{} is shorter than {}", at, self.min_length.unwrap_or(0)));
                }
                if self.max_length.is_some_and(|max| length > max) {
                    return Err(format!("{} is longer than {}", at, self.max_length.unwrap_or(0)));
                }
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(s) {
                        return Err(format!("{} does not match {}", at, pattern));
                    }
                }
            }
            Value::Int(_) | Value::Float(_) => {
                let n = value.as_f64().unwrap_or(0.0);
                if self.minimum.is_some_and(|min| n < min) {
                    return Err(format!("{} is below the minimum", at));
                }
                if self.maximum.is_some_and(|max| n > max) {
                    return Err(format!("{} is above the maximum", at));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_document(&self, doc: &Document, path: &str, at: &str) -> Result<(), String> {
        for field in &self.required {
            if !doc.contains_key(field) {
                return Err(format!("{} is missing required field '{}'", at, field));
            }
        }
        for (name, schema) in &self.properties {
            if let Some(value) = doc.get(name) {
                schema.check(value, &join(path, name))?;
            }
        }
        if self.additional_properties == Some(false) {
            if let Some(extra) = doc
                .keys()
                .find(|k| k.as_str() != "_id" && !self.properties.iter().any(|(name, _)| name == *k))
            {
                return Err(format!("{} has unexpected field '{}'", at, extra));
            }
        }
        Ok(())
    }

    fn check_array(&self, items: &[Value], path: &str, at: &str) -> Result<(), String> {
        if self.min_items.is_some_and(|min| items.len() < min) {
            return Err(format!("{} has too few items", at));
        }
        if self.max_items.is_some_and(|max| items.len() > max) {
            return Err(format!("{} has too many items", at));
        }
        if let Some(schema) = &self.items {
            for (index, item) in items.iter().enumerate() {
                schema.check(item, &join(path, &index.to_string()))?;
            }
        }
        Ok(())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "object" => value.is_document(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "int" | "long" | "integer" => match value {
            Value::Int(_) => true,
            Value::Float(f) => f.fract() == 0.0,
            _ => false,
        },
        "double" | "decimal" => matches!(value, Value::Float(_)),
        "bool" | "boolean" => matches!(value, Value::Bool(_)),
        "null" => value.is_null(),
        "binData" => matches!(value, Value::Bytes(_)),
        _ => false,
    }
}
