use crate::aggregation::{operand_document, OperatorImpl, OperatorRegistry};
use crate::codec::{join_front_matter, split_front_matter};
use crate::collection::Document;
use crate::common::{Value, CONTENT_KEY};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};

pub(crate) fn register_codec_operators(registry: &OperatorRegistry) -> QuarryResult<()> {
    registry.register("$jsonToObject", OperatorImpl::expression(json_to_object))?;
    registry.register("$objectToJson", OperatorImpl::expression(object_to_json))?;
    registry.register("$yamlToObject", OperatorImpl::expression(yaml_to_object))?;
    registry.register("$objectToYaml", OperatorImpl::expression(object_to_yaml))?;
    Ok(())
}

fn text_argument(name: &str, value: Value) -> QuarryResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Bytes(bytes) => Ok(Some(String::from_utf8(bytes)?)),
        other => {
            log::error!("{} requires string input, found {}", name, other.type_name());
            Err(QuarryError::new(
                &format!("{} requires string input, found {}", name, other.type_name()),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

fn single_argument(name: &str, args: Vec<Value>) -> QuarryResult<Option<Value>> {
    if args.len() > 1 {
        log::error!("{} takes one argument, got {}", name, args.len());
        return Err(QuarryError::new(
            &format!("{} takes exactly one argument", name),
            ErrorKind::InvalidArgument,
        ));
    }
    Ok(args.into_iter().next())
}

fn flag(options: &Document, key: &str) -> bool {
    options.get(key).map(Value::is_truthy).unwrap_or(false)
}

fn content_key(options: &Document) -> String {
    options
        .get("contentKey")
        .and_then(|k| k.as_str())
        .unwrap_or(CONTENT_KEY)
        .to_string()
}

/// `{$jsonToObject: text}` parses JSON text into a value.
fn json_to_object(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let text = match single_argument("$jsonToObject", args)? {
        None => return Ok(None),
        Some(value) => text_argument("$jsonToObject", value)?,
    };
    match text {
        None => Ok(Some(Value::Null)),
        Some(text) => Ok(Some(serde_json::from_str::<Value>(&text)?)),
    }
}

/// `{$objectToJson: {input, pretty}}` renders a value as JSON text.
fn object_to_json(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let options = operand_document("$objectToJson", args)?;
    let input = match options.get("input") {
        Some(input) => input,
        None => return Ok(None),
    };
    let text = if flag(&options, "pretty") {
        serde_json::to_string_pretty(input)?
    } else {
        serde_json::to_string(input)?
    };
    Ok(Some(Value::String(text)))
}

/// `{$yamlToObject: text}` or
/// `{$yamlToObject: {input, frontMatter, contentKey}}`.
///
/// In front-matter mode the leading metadata block becomes the document and
/// the remaining text is stored under `contentKey`.
fn yaml_to_object(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let (input, options) = match single_argument("$yamlToObject", args)? {
        None => return Ok(None),
        Some(Value::Document(options)) => match options.get("input").cloned() {
            Some(input) => (input, options),
            None => return Ok(None),
        },
        Some(input) => (input, Document::new()),
    };

    let text = match text_argument("$yamlToObject", input)? {
        Some(text) => text,
        None => return Ok(Some(Value::Null)),
    };

    if flag(&options, "frontMatter") {
        let (mut metadata, body) = split_front_matter(&text)?;
        metadata.insert(content_key(&options), body);
        return Ok(Some(Value::Document(metadata)));
    }

    if text.trim().is_empty() {
        return Ok(Some(Value::Null));
    }
    Ok(Some(serde_yaml::from_str::<Value>(&text)?))
}

/// `{$objectToYaml: {input, frontMatter, contentKey}}`.
fn object_to_yaml(args: Vec<Value>, _: &Document) -> QuarryResult<Option<Value>> {
    let options = operand_document("$objectToYaml", args)?;
    let input = match options.get("input") {
        Some(input) => input,
        None => return Ok(None),
    };

    if !flag(&options, "frontMatter") {
        return Ok(Some(Value::String(serde_yaml::to_string(input)?)));
    }

    let mut metadata = match input {
        Value::Document(doc) => doc.clone(),
        other => {
            log::error!("Front matter input must be an object, found {}", other.type_name());
            return Err(QuarryError::new(
                &format!("Front matter input must be an object, found {}", other.type_name()),
                ErrorKind::InvalidArgument,
            ));
        }
    };
    let body = metadata
        .remove(&content_key(&options))
        .map(|b| b.to_plain_string())
        .unwrap_or_default();
    Ok(Some(Value::String(join_front_matter(&metadata, &body)?)))
}
