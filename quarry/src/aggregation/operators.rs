use crate::aggregation::{expect_args, operand_document, OperatorImpl, OperatorRegistry};
use crate::collection::Document;
use crate::common::Value;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::cmp::Ordering;
use std::path::Path;

/// Registers the built-in expression operators.
pub(crate) fn register_expression_operators(registry: &OperatorRegistry) -> QuarryResult<()> {
    registry.register("$eq", OperatorImpl::expression(eq))?;
    registry.register("$ne", OperatorImpl::expression(ne))?;
    registry.register("$gt", OperatorImpl::expression(gt))?;
    registry.register("$gte", OperatorImpl::expression(gte))?;
    registry.register("$lt", OperatorImpl::expression(lt))?;
    registry.register("$lte", OperatorImpl::expression(lte))?;
    registry.register("$cmp", OperatorImpl::expression(cmp))?;
    registry.register("$and", OperatorImpl::expression(and))?;
    registry.register("$or", OperatorImpl::expression(or))?;
    registry.register("$not", OperatorImpl::expression(not))?;
    registry.register("$add", OperatorImpl::expression(add))?;
    registry.register("$subtract", OperatorImpl::expression(subtract))?;
    registry.register("$multiply", OperatorImpl::expression(multiply))?;
    registry.register("$divide", OperatorImpl::expression(divide))?;
    registry.register("$mod", OperatorImpl::expression(modulo))?;
    registry.register("$concat", OperatorImpl::expression(concat))?;
    registry.register("$toLower", OperatorImpl::expression(to_lower))?;
    registry.register("$toUpper", OperatorImpl::expression(to_upper))?;
    registry.register("$toString", OperatorImpl::expression(to_string))?;
    registry.register("$split", OperatorImpl::expression(split))?;
    registry.register("$trim", OperatorImpl::expression(trim))?;
    registry.register("$strLenCP", OperatorImpl::expression(str_len))?;
    registry.register("$cond", OperatorImpl::expression(cond))?;
    registry.register("$ifNull", OperatorImpl::expression(if_null))?;
    registry.register("$size", OperatorImpl::expression(size))?;
    registry.register("$arrayElemAt", OperatorImpl::expression(array_elem_at))?;
    registry.register("$in", OperatorImpl::expression(in_array))?;
    registry.register("$mergeObjects", OperatorImpl::expression(merge_objects))?;
    registry.register("$objectToArray", OperatorImpl::expression(object_to_array))?;
    registry.register("$arrayToObject", OperatorImpl::expression(array_to_object))?;
    registry.register("$basename", OperatorImpl::expression(basename))?;
    registry.register("$dirname", OperatorImpl::expression(dirname))?;
    Ok(())
}

/// Adds two numbers, staying integral unless either side is a float or
/// the sum overflows.
pub(crate) fn add_numbers(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_add(*y) {
            Some(sum) => Value::Int(sum),
            None => Value::Float(*x as f64 + *y as f64),
        },
        _ => Value::Float(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
    }
}

pub(crate) fn multiply_numbers(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_mul(*y) {
            Some(product) => Value::Int(product),
            None => Value::Float(*x as f64 * *y as f64),
        },
        _ => Value::Float(a.as_f64().unwrap_or(0.0) * b.as_f64().unwrap_or(0.0)),
    }
}

fn invalid(message: String) -> QuarryError {
    log::error!("{}", message);
    QuarryError::new(&message, ErrorKind::InvalidArgument)
}

fn single(name: &str, args: Vec<Value>) -> QuarryResult<Option<Value>> {
    match args.len() {
        0 => Ok(None),
        1 => Ok(args.into_iter().next()),
        n => Err(invalid(format!(
            "Expression {} takes exactly 1 argument. {} were passed in.",
            name, n
        ))),
    }
}

fn pair(name: &str, args: Vec<Value>) -> QuarryResult<(Value, Value)> {
    expect_args(name, &args, 2)?;
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(invalid(format!("Expression {} takes exactly 2 arguments", name))),
    }
}

fn numbers(name: &str, args: &[Value]) -> QuarryResult<Option<()>> {
    if args.iter().any(Value::is_null) {
        return Ok(None);
    }
    match args.iter().find(|v| !v.is_number()) {
        Some(bad) => Err(invalid(format!(
            "{} only supports numeric types, not {}",
            name,
            bad.type_name()
        ))),
        None => Ok(Some(())),
    }
}

fn compare<F: Fn(Ordering) -> bool>(args: Vec<Value>, name: &str, test: F) -> QuarryResult<Option<Value>> {
    let (a, b) = pair(name, args)?;
    Ok(Some(Value::Bool(test(a.cmp(&b)))))
}

fn eq(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$eq", |o| o == Ordering::Equal)
}

fn ne(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$ne", |o| o != Ordering::Equal)
}

fn gt(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$gt", |o| o == Ordering::Greater)
}

fn gte(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$gte", |o| o != Ordering::Less)
}

fn lt(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$lt", |o| o == Ordering::Less)
}

fn lte(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    compare(args, "$lte", |o| o != Ordering::Greater)
}

fn cmp(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (a, b) = pair("$cmp", args)?;
    let result = match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    };
    Ok(Some(Value::Int(result)))
}

fn and(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    Ok(Some(Value::Bool(args.iter().all(Value::is_truthy))))
}

fn or(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    Ok(Some(Value::Bool(args.iter().any(Value::is_truthy))))
}

fn not(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let value = single("$not", args)?;
    Ok(Some(Value::Bool(!value.map(|v| v.is_truthy()).unwrap_or(false))))
}

fn add(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    if numbers("$add", &args)?.is_none() {
        return Ok(Some(Value::Null));
    }
    Ok(Some(args.iter().fold(Value::Int(0), |sum, v| add_numbers(&sum, v))))
}

fn subtract(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (a, b) = pair("$subtract", args)?;
    if numbers("$subtract", &[a.clone(), b.clone()])?.is_none() {
        return Ok(Some(Value::Null));
    }
    let result = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_sub(*y) {
            Some(diff) => Value::Int(diff),
            None => Value::Float(*x as f64 - *y as f64),
        },
        _ => Value::Float(a.as_f64().unwrap_or(0.0) - b.as_f64().unwrap_or(0.0)),
    };
    Ok(Some(result))
}

fn multiply(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    if numbers("$multiply", &args)?.is_none() {
        return Ok(Some(Value::Null));
    }
    Ok(Some(args.iter().fold(Value::Int(1), |product, v| multiply_numbers(&product, v))))
}

fn divide(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (a, b) = pair("$divide", args)?;
    if numbers("$divide", &[a.clone(), b.clone()])?.is_none() {
        return Ok(Some(Value::Null));
    }
    let divisor = b.as_f64().unwrap_or(0.0);
    if divisor == 0.0 {
        return Err(invalid("can't $divide by zero".to_string()));
    }
    Ok(Some(Value::Float(a.as_f64().unwrap_or(0.0) / divisor)))
}

fn modulo(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (a, b) = pair("$mod", args)?;
    if numbers("$mod", &[a.clone(), b.clone()])?.is_none() {
        return Ok(Some(Value::Null));
    }
    if b.as_f64() == Some(0.0) {
        return Err(invalid("can't $mod by zero".to_string()));
    }
    let result = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_rem(*y)),
        _ => Value::Float(a.as_f64().unwrap_or(0.0) % b.as_f64().unwrap_or(1.0)),
    };
    Ok(Some(result))
}

fn concat(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let mut result = String::new();
    for arg in args {
        match arg {
            Value::Null => return Ok(Some(Value::Null)),
            Value::String(s) => result.push_str(&s),
            other => {
                return Err(invalid(format!(
                    "$concat only supports strings, not {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Some(Value::String(result)))
}

fn to_lower(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    change_case(args, "$toLower", false)
}

fn to_upper(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    change_case(args, "$toUpper", true)
}

fn change_case(args: Vec<Value>, name: &str, upper: bool) -> QuarryResult<Option<Value>> {
    let text = match single(name, args)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::Array(_)) | Some(Value::Document(_)) => {
            return Err(invalid(format!("{} requires a string argument", name)))
        }
        Some(other) => other.to_plain_string(),
    };
    let text = if upper {
        text.to_uppercase()
    } else {
        text.to_lowercase()
    };
    Ok(Some(Value::String(text)))
}

fn to_string(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    match single("$toString", args)? {
        None | Some(Value::Null) => Ok(Some(Value::Null)),
        Some(value) => Ok(Some(Value::String(value.to_plain_string()))),
    }
}

fn split(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (input, delimiter) = pair("$split", args)?;
    match (input, delimiter) {
        (Value::Null, _) => Ok(Some(Value::Null)),
        (Value::String(input), Value::String(delimiter)) if !delimiter.is_empty() => {
            let parts = input.split(delimiter.as_str()).map(Value::from).collect();
            Ok(Some(Value::Array(parts)))
        }
        _ => Err(invalid(
            "$split requires a string and a non-empty string delimiter".to_string(),
        )),
    }
}

fn trim(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let options = operand_document("$trim", args)?;
    let input = match options.get("input") {
        None | Some(Value::Null) => return Ok(Some(Value::Null)),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(invalid(format!(
                "$trim requires its input to be a string, not {}",
                other.type_name()
            )))
        }
    };
    let trimmed = match options.get("chars") {
        Some(Value::String(chars)) => {
            let chars: Vec<char> = chars.chars().collect();
            input.trim_matches(|c| chars.contains(&c)).to_string()
        }
        _ => input.trim().to_string(),
    };
    Ok(Some(Value::String(trimmed)))
}

fn str_len(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    match single("$strLenCP", args)? {
        Some(Value::String(s)) => Ok(Some(Value::Int(s.chars().count() as i64))),
        _ => Err(invalid("$strLenCP requires a string argument".to_string())),
    }
}

fn cond(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    if let [Value::Document(options)] = args.as_slice() {
        if !options.contains_key("if") {
            return Err(invalid("Missing 'if' parameter to $cond".to_string()));
        }
        let branch = if options.get("if").map(Value::is_truthy).unwrap_or(false) {
            "then"
        } else {
            "else"
        };
        return Ok(options.get(branch).cloned());
    }

    expect_args("$cond", &args, 3)?;
    let mut args = args.into_iter();
    let condition = args.next().map(|v| v.is_truthy()).unwrap_or(false);
    let then_value = args.next();
    let else_value = args.next();
    Ok(if condition { then_value } else { else_value })
}

fn if_null(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    if args.len() < 2 {
        return Err(invalid("$ifNull needs at least two arguments".to_string()));
    }
    let count = args.len();
    let mut args = args.into_iter();
    let replacement = args.by_ref().take(count - 1).find(|v| !v.is_null());
    Ok(replacement.or_else(|| args.next()))
}

fn size(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    match single("$size", args)? {
        Some(Value::Array(items)) => Ok(Some(Value::Int(items.len() as i64))),
        other => Err(invalid(format!(
            "The argument to $size must be an array. Type of argument: {}",
            other.map(|v| v.type_name()).unwrap_or("missing")
        ))),
    }
}

fn array_elem_at(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (array, index) = pair("$arrayElemAt", args)?;
    let items = match array {
        Value::Null => return Ok(Some(Value::Null)),
        Value::Array(items) => items,
        other => {
            return Err(invalid(format!(
                "$arrayElemAt's first argument must be an array, not {}",
                other.type_name()
            )))
        }
    };
    let index = index
        .as_i64()
        .ok_or_else(|| invalid("$arrayElemAt's second argument must be an integer".to_string()))?;
    let position = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    if position < 0 {
        return Ok(None);
    }
    Ok(items.into_iter().nth(position as usize))
}

fn in_array(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (needle, haystack) = pair("$in", args)?;
    match haystack {
        Value::Array(items) => Ok(Some(Value::Bool(items.contains(&needle)))),
        other => Err(invalid(format!(
            "$in requires an array as a second argument, found: {}",
            other.type_name()
        ))),
    }
}

fn merge_objects(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let sources = match <[Value; 1]>::try_from(args) {
        Ok([Value::Array(items)]) => items,
        Ok([other]) => vec![other],
        Err(args) => args,
    };
    let mut result = Document::new();
    for source in sources {
        match source {
            Value::Null => {}
            Value::Document(doc) => result.merge(&doc),
            other => {
                return Err(invalid(format!(
                    "$mergeObjects requires object inputs, but input is of type {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Some(Value::Document(result)))
}

fn object_to_array(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    match single("$objectToArray", args)? {
        None | Some(Value::Null) => Ok(Some(Value::Null)),
        Some(Value::Document(doc)) => {
            let entries = doc
                .into_iter()
                .map(|(k, v)| {
                    let mut entry = Document::new();
                    entry.insert("k", k);
                    entry.insert("v", v);
                    Value::Document(entry)
                })
                .collect();
            Ok(Some(Value::Array(entries)))
        }
        Some(other) => Err(invalid(format!(
            "$objectToArray requires a document input, found: {}",
            other.type_name()
        ))),
    }
}

fn array_to_object(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let entries = match single("$arrayToObject", args)? {
        None | Some(Value::Null) => return Ok(Some(Value::Null)),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(invalid(format!(
                "$arrayToObject requires an array input, found: {}",
                other.type_name()
            )))
        }
    };

    let mut result = Document::new();
    for entry in entries {
        let (key, value) = match entry {
            Value::Array(pair) if pair.len() == 2 => {
                let mut pair = pair.into_iter();
                (pair.next(), pair.next())
            }
            Value::Document(mut doc) if doc.len() == 2 => (doc.remove("k"), doc.remove("v")),
            _ => (None, None),
        };
        match (key, value) {
            (Some(Value::String(key)), Some(value)) => {
                result.insert(key, value);
            }
            _ => {
                return Err(invalid(
                    "$arrayToObject requires [k, v] pairs or {k, v} documents with string keys"
                        .to_string(),
                ))
            }
        }
    }
    Ok(Some(Value::Document(result)))
}

fn path_argument(name: &str, value: Option<Value>) -> QuarryResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(path)) => Ok(Some(path)),
        Some(other) => Err(invalid(format!(
            "{} requires a string path, found: {}",
            name,
            other.type_name()
        ))),
    }
}

fn basename(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    if args.is_empty() || args.len() > 2 {
        return Err(invalid("$basename takes a path and an optional extension".to_string()));
    }
    let mut args = args.into_iter();
    let path = match path_argument("$basename", args.next())? {
        Some(path) => path,
        None => return Ok(Some(Value::Null)),
    };
    let extension = path_argument("$basename", args.next())?;

    let name = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match extension {
        Some(ext) if !ext.is_empty() && name.len() > ext.len() && name.ends_with(&ext) => {
            name[..name.len() - ext.len()].to_string()
        }
        _ => name,
    };
    Ok(Some(Value::String(name)))
}

fn dirname(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let path = match path_argument("$dirname", single("$dirname", args)?)? {
        Some(path) => path,
        None => return Ok(Some(Value::Null)),
    };
    let parent = Path::new(&path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Some(Value::String(parent)))
}

#[cfg(test)]
mod tests {
    use crate::aggregation::test_aggregator;
    use crate::collection::Document;
    use crate::common::Value;
    use crate::errors::QuarryResult;
    use crate::{doc, val};

    fn eval(expression: Document, doc: Document) -> QuarryResult<Option<Value>> {
        test_aggregator()
            .compile_expression(&Value::Document(expression))?
            .evaluate(&doc)
    }

    fn value(expression: Document) -> Value {
        eval(expression, doc! {}).unwrap().unwrap()
    }

    #[test]
    fn comparison() {
        assert_eq!(value(doc! { "$gt": [2, 1] }), val!(true));
        assert_eq!(value(doc! { "$eq": [1, 1.0] }), val!(true));
        assert_eq!(value(doc! { "$lte": ["a", 1] }), val!(false));
        assert_eq!(value(doc! { "$cmp": ["a", "b"] }), val!(-1));
        assert!(eval(doc! { "$eq": [1] }, doc! {}).is_err());
    }

    #[test]
    fn boolean() {
        assert_eq!(value(doc! { "$and": [1, true, "x"] }), val!(true));
        assert_eq!(value(doc! { "$or": [0, null] }), val!(false));
        assert_eq!(value(doc! { "$not": [0] }), val!(true));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(value(doc! { "$add": [1, 2, 3] }), val!(6));
        assert_eq!(value(doc! { "$add": [1, null] }), Value::Null);
        assert_eq!(value(doc! { "$subtract": [5, 7] }), val!(-2));
        assert_eq!(value(doc! { "$multiply": [2, 2.5] }), val!(5.0));
        assert_eq!(value(doc! { "$divide": [9, 2] }), val!(4.5));
        assert_eq!(value(doc! { "$mod": [9, 4] }), val!(1));
        assert!(eval(doc! { "$divide": [1, 0] }, doc! {}).is_err());
        assert!(eval(doc! { "$add": [1, "x"] }, doc! {}).is_err());
    }

    #[test]
    fn arithmetic_with_missing_field_is_null() {
        let result = eval(doc! { "$add": ["$missing", 1] }, doc! {}).unwrap();
        assert_eq!(result, Some(Value::Null));
    }

    #[test]
    fn strings() {
        let person = doc! { first: "Ada", last: "Lovelace" };
        assert_eq!(
            eval(doc! { "$concat": ["$first", " ", "$last"] }, person.clone()).unwrap(),
            Some(val!("Ada Lovelace"))
        );
        assert_eq!(
            eval(doc! { "$concat": ["$first", "$nickname"] }, person).unwrap(),
            Some(Value::Null)
        );
        assert_eq!(value(doc! { "$toUpper": "abc" }), val!("ABC"));
        assert_eq!(value(doc! { "$toLower": null }), val!(""));
        assert_eq!(value(doc! { "$toString": 42 }), val!("42"));
        assert_eq!(value(doc! { "$split": ["a,b", ","] }), val!(vec!["a", "b"]));
        assert_eq!(value(doc! { "$trim": { input: "  x " } }), val!("x"));
        assert_eq!(value(doc! { "$trim": { input: "--x-", chars: "-" } }), val!("x"));
        assert_eq!(value(doc! { "$strLenCP": "héllo" }), val!(5));
    }

    #[test]
    fn conditional() {
        assert_eq!(value(doc! { "$cond": [true, "yes", "no"] }), val!("yes"));
        assert_eq!(
            value(doc! { "$cond": { "if": false, "then": "yes", "else": "no" } }),
            val!("no")
        );
        assert_eq!(
            eval(doc! { "$ifNull": ["$missing", "fallback"] }, doc! {}).unwrap(),
            Some(val!("fallback"))
        );
        assert_eq!(value(doc! { "$ifNull": ["set", "fallback"] }), val!("set"));
    }

    #[test]
    fn arrays_and_objects() {
        let doc = doc! { tags: ["a", "b", "c"], meta: { x: 1 } };
        assert_eq!(eval(doc! { "$size": "$tags" }, doc.clone()).unwrap(), Some(val!(3)));
        assert_eq!(
            eval(doc! { "$arrayElemAt": ["$tags", (-1)] }, doc.clone()).unwrap(),
            Some(val!("c"))
        );
        assert_eq!(
            eval(doc! { "$arrayElemAt": ["$tags", 10] }, doc.clone()).unwrap(),
            None
        );
        assert_eq!(
            eval(doc! { "$in": ["b", "$tags"] }, doc.clone()).unwrap(),
            Some(val!(true))
        );
        assert_eq!(
            eval(doc! { "$mergeObjects": ["$meta", { y: 2 }, null] }, doc.clone()).unwrap(),
            Some(Value::Document(doc! { x: 1, y: 2 }))
        );
        assert_eq!(
            eval(doc! { "$objectToArray": "$meta" }, doc).unwrap(),
            Some(Value::Array(vec![Value::Document(doc! { k: "x", v: 1 })]))
        );
        assert_eq!(
            value(doc! { "$arrayToObject": [[["a", 1], { k: "b", v: 2 }]] }),
            Value::Document(doc! { a: 1, b: 2 })
        );
    }

    #[test]
    fn paths() {
        assert_eq!(value(doc! { "$basename": "db/coll/p1.json" }), val!("p1.json"));
        assert_eq!(value(doc! { "$basename": ["db/coll/p1.json", ".json"] }), val!("p1"));
        assert_eq!(value(doc! { "$dirname": "db/coll/p1.json" }), val!("db/coll"));
        assert_eq!(value(doc! { "$basename": [null] }), Value::Null);
    }
}
