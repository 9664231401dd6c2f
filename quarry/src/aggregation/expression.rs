use crate::aggregation::{ExpressionOperator, OperatorRegistry};
use crate::collection::Document;
use crate::common::{Value, OPERATOR_SIGIL, VAR_CURRENT, VAR_REMOVE, VAR_ROOT};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// One node of a compiled expression.
///
/// Every node of the source value is classified once at compile time, so
/// evaluation never re-inspects the shape of the configuration.
enum Expr {
    /// A constant, including anything wrapped in `$literal`.
    Literal(Value),
    /// `"$a.b"`: a field path resolved against the current document.
    Field(String),
    /// `"$$ROOT"` / `"$$CURRENT"`, optionally followed by a path.
    Root(Option<String>),
    /// `"$$REMOVE"`: always absent.
    Remove,
    /// `{$op: operand}`.
    Operator {
        op: ExpressionOperator,
        args: Arguments,
    },
    /// A document whose fields are expressions.
    Document(Vec<(String, Expr)>),
    /// An array whose elements are expressions.
    Array(Vec<Expr>),
}

/// How an operator's operand turns into its argument list.
enum Arguments {
    /// `{$op: [a, b]}`: each element is one argument.
    List(Vec<Expr>),
    /// `{$op: a}`: one argument, or none when `a` is absent.
    Single(Box<Expr>),
}

/// A compiled aggregation expression.
///
/// Evaluation returns `None` for an absent value. Absent values inside an
/// array become `null`, and absent fields of a document expression are
/// omitted, so `{a: "$missing"}` evaluates to `{}`.
///
/// # Examples
///
/// ```rust,ignore
/// let expression = aggregator.compile_expression(&val!(doc! { "$concat": ["$first", " ", "$last"] }))?;
/// let name = expression.evaluate(&doc! { first: "Ada", last: "Lovelace" })?;
/// assert_eq!(name, Some(val!("Ada Lovelace")));
/// ```
#[derive(Clone)]
pub struct Expression {
    root: Arc<Expr>,
    source: Arc<Value>,
}

impl Expression {
    /// Compiles a value against the registry's expression operators.
    pub fn compile(value: &Value, registry: &OperatorRegistry) -> QuarryResult<Expression> {
        let root = compile_node(value, registry)?;
        Ok(Expression {
            root: Arc::new(root),
            source: Arc::new(value.clone()),
        })
    }

    /// A constant expression.
    pub fn literal(value: Value) -> Expression {
        Expression {
            root: Arc::new(Expr::Literal(value.clone())),
            source: Arc::new(value),
        }
    }

    /// Evaluates the expression with `doc` as both `$$ROOT` and `$$CURRENT`.
    pub fn evaluate(&self, doc: &Document) -> QuarryResult<Option<Value>> {
        evaluate_node(&self.root, doc)
    }

    /// Evaluates the expression, mapping an absent result to `null`.
    pub fn evaluate_or_null(&self, doc: &Document) -> QuarryResult<Value> {
        Ok(self.evaluate(doc)?.unwrap_or(Value::Null))
    }

    /// Whether the expression is a constant.
    pub fn is_literal(&self) -> bool {
        matches!(self.root.as_ref(), Expr::Literal(_))
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn compile_node(value: &Value, registry: &OperatorRegistry) -> QuarryResult<Expr> {
    match value {
        Value::String(s) if s.starts_with("$$") => compile_variable(&s[2..]),
        Value::String(s) if s.starts_with(OPERATOR_SIGIL) => {
            let path = &s[1..];
            if path.is_empty() {
                log::error!("Empty field path in expression");
                return Err(QuarryError::new(
                    "'$' by itself is not a valid field path",
                    ErrorKind::InvalidArgument,
                ));
            }
            Ok(Expr::Field(path.to_string()))
        }
        Value::Document(doc) => compile_document(doc, registry),
        Value::Array(items) => {
            let compiled = items
                .iter()
                .map(|item| compile_node(item, registry))
                .collect::<QuarryResult<Vec<_>>>()?;
            Ok(Expr::Array(compiled))
        }
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn compile_variable(reference: &str) -> QuarryResult<Expr> {
    let (name, path) = match reference.split_once('.') {
        Some((name, path)) => (name, Some(path.to_string())),
        None => (reference, None),
    };

    match name {
        VAR_ROOT | VAR_CURRENT => Ok(Expr::Root(path)),
        VAR_REMOVE => Ok(Expr::Remove),
        _ => {
            log::error!("Use of undefined variable {}", name);
            Err(QuarryError::new(
                &format!("Use of undefined variable: {}", name),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

fn compile_document(doc: &Document, registry: &OperatorRegistry) -> QuarryResult<Expr> {
    let operator_keys = doc.keys().filter(|k| k.starts_with(OPERATOR_SIGIL)).count();

    if operator_keys == 0 {
        let fields = doc
            .iter()
            .map(|(key, value)| Ok((key.clone(), compile_node(value, registry)?)))
            .collect::<QuarryResult<Vec<_>>>()?;
        return Ok(Expr::Document(fields));
    }

    let (name, operand) = match doc.single_entry() {
        Some(entry) if operator_keys == 1 => entry,
        _ => {
            log::error!("Expression object {} mixes operators and fields", doc);
            return Err(QuarryError::new(
                &format!(
                    "An expression object must have exactly one operator and no other fields: {}",
                    doc
                ),
                ErrorKind::InvalidArgument,
            ));
        }
    };

    if name == "$literal" {
        return Ok(Expr::Literal(operand.clone()));
    }

    let op = registry.resolve_expression(name)?;
    let args = match compile_node(operand, registry)? {
        Expr::Array(items) => Arguments::List(items),
        single => Arguments::Single(Box::new(single)),
    };
    Ok(Expr::Operator { op, args })
}

fn evaluate_node(expr: &Expr, doc: &Document) -> QuarryResult<Option<Value>> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Field(path) => Ok(doc.resolve_path(path)),
        Expr::Root(None) => Ok(Some(Value::Document(doc.clone()))),
        Expr::Root(Some(path)) => Ok(doc.resolve_path(path)),
        Expr::Remove => Ok(None),
        Expr::Operator { op, args } => {
            let args = match args {
                Arguments::List(items) => evaluate_all(items, doc)?,
                Arguments::Single(item) => evaluate_node(item, doc)?.into_iter().collect(),
            };
            op(args, doc)
        }
        Expr::Document(fields) => {
            let mut result = Document::new();
            for (key, field) in fields {
                if let Some(value) = evaluate_node(field, doc)? {
                    result.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Document(result)))
        }
        Expr::Array(items) => Ok(Some(Value::Array(evaluate_all(items, doc)?))),
    }
}

fn evaluate_all(items: &[Expr], doc: &Document) -> QuarryResult<Vec<Value>> {
    let mut result = Vec::with_capacity(items.len());
    for item in items {
        result.push(evaluate_node(item, doc)?.unwrap_or(Value::Null));
    }
    Ok(result)
}

/// Checks an operator received exactly `count` arguments.
pub fn expect_args(name: &str, args: &[Value], count: usize) -> QuarryResult<()> {
    if args.len() != count {
        log::error!("{} takes {} arguments, got {}", name, count, args.len());
        return Err(QuarryError::new(
            &format!(
                "Expression {} takes exactly {} arguments. {} were passed in.",
                name,
                count,
                args.len()
            ),
            ErrorKind::InvalidArgument,
        ));
    }
    Ok(())
}

/// Reads named arguments from a single document operand.
pub fn operand_document(name: &str, args: Vec<Value>) -> QuarryResult<Document> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Value::Document(doc)), None) => Ok(doc),
        _ => {
            log::error!("{} requires a single document argument", name);
            Err(QuarryError::new(
                &format!("{} requires a document argument", name),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::{doc, val};

    fn eval(expression: Value, doc: Document) -> QuarryResult<Option<Value>> {
        let aggregator = test_aggregator();
        aggregator.compile_expression(&expression)?.evaluate(&doc)
    }

    #[test]
    fn field_paths_and_literals() {
        let doc = doc! { a: { b: 2 }, s: "x" };
        assert_eq!(eval(val!("$a.b"), doc.clone()).unwrap(), Some(val!(2)));
        assert_eq!(eval(val!("plain"), doc.clone()).unwrap(), Some(val!("plain")));
        assert_eq!(eval(val!("$missing"), doc).unwrap(), None);
    }

    #[test]
    fn variables() {
        let doc = doc! { a: 1 };
        assert_eq!(eval(val!("$$ROOT"), doc.clone()).unwrap(), Some(Value::Document(doc.clone())));
        assert_eq!(eval(val!("$$CURRENT.a"), doc.clone()).unwrap(), Some(val!(1)));
        assert_eq!(eval(val!("$$REMOVE"), doc.clone()).unwrap(), None);
        assert!(eval(val!("$$NOPE"), doc).is_err());
    }

    #[test]
    fn absent_handling_in_containers() {
        let doc = doc! { a: 1 };
        assert_eq!(
            eval(Value::Document(doc! { x: "$a", y: "$missing" }), doc.clone()).unwrap(),
            Some(Value::Document(doc! { x: 1 }))
        );
        assert_eq!(
            eval(Value::Array(vec![val!("$a"), val!("$missing")]), doc).unwrap(),
            Some(Value::Array(vec![val!(1), Value::Null]))
        );
    }

    #[test]
    fn literal_is_not_evaluated() {
        let result = eval(Value::Document(doc! { "$literal": "$a" }), doc! { a: 1 }).unwrap();
        assert_eq!(result, Some(val!("$a")));
    }

    #[test]
    fn nested_operators() {
        let expression = Value::Document(doc! { "$add": [{ "$multiply": ["$a", 2] }, 1] });
        assert_eq!(eval(expression, doc! { a: 3 }).unwrap(), Some(val!(7)));
    }

    #[test]
    fn unknown_operator_fails_at_compile_time() {
        let aggregator = test_aggregator();
        let err = aggregator
            .compile_expression(&Value::Document(doc! { "$frobnicate": 1 }))
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::UnknownOperator);
    }

    #[test]
    fn mixed_operator_object_fails() {
        let aggregator = test_aggregator();
        assert!(aggregator
            .compile_expression(&Value::Document(doc! { "$add": [1], x: 1 }))
            .is_err());
    }

    #[test]
    fn single_array_argument_is_not_spread() {
        let doc = doc! { tags: ["a", "b", "c"] };
        assert_eq!(eval(Value::Document(doc! { "$size": "$tags" }), doc.clone()).unwrap(), Some(val!(3)));
        assert_eq!(eval(Value::Document(doc! { "$size": ["$tags"] }), doc).unwrap(), Some(val!(3)));
    }

    #[test]
    fn operand_document_requires_one_document() {
        assert!(operand_document("$trim", vec![Value::Document(doc! { input: "x" })]).is_ok());
        assert!(operand_document("$trim", vec![]).is_err());
        assert!(operand_document("$trim", vec![val!(1)]).is_err());
    }
}
