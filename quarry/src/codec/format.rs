use crate::aggregation::{Aggregator, Pipeline};
use crate::collection::Document;
use crate::common::{Value, CONTENT_KEY};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::doc;

/// A serialization format: how the `content` of a raw file document turns
/// into a value and back.
///
/// The reader replaces the raw `content` text with the parsed value and the
/// writer does the reverse. Both are ordinary pipelines, so a format is only
/// a choice of expression operators.
#[derive(Clone)]
pub struct Format {
    name: String,
    extension: String,
    reader: Pipeline,
    writer: Pipeline,
}

impl Format {
    pub fn new(name: &str, extension: &str, reader: Pipeline, writer: Pipeline) -> Self {
        Format {
            name: name.to_string(),
            extension: extension.to_string(),
            reader,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file extension including the leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn reader(&self) -> &Pipeline {
        &self.reader
    }

    pub fn writer(&self) -> &Pipeline {
        &self.writer
    }
}

/// Splits a format or layout descriptor into its name and options.
///
/// A descriptor is either a bare name (`"json"`) or a single-key document
/// mapping the name to its options (`{yaml: {frontMatter: true}}`).
pub fn parse_descriptor(kind: &str, descriptor: &Value) -> QuarryResult<(String, Document)> {
    match descriptor {
        Value::String(name) => Ok((name.clone(), Document::new())),
        Value::Document(doc) => match doc.single_entry() {
            Some((name, Value::Document(options))) => Ok((name.clone(), options.clone())),
            Some((name, Value::Null)) | Some((name, Value::Bool(true))) => {
                Ok((name.clone(), Document::new()))
            }
            _ => {
                log::error!("Invalid {} descriptor {}", kind, doc);
                Err(QuarryError::new(
                    &format!("A {} descriptor must map one name to an options object", kind),
                    ErrorKind::InvalidArgument,
                ))
            }
        },
        other => {
            log::error!("Invalid {} descriptor of type {}", kind, other.type_name());
            Err(QuarryError::new(
                &format!("A {} descriptor must be a string or an object", kind),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

pub(crate) fn string_option(options: &Document, key: &str, default: &str) -> QuarryResult<String> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => {
            log::error!("Option {} must be a string, found {}", key, other.type_name());
            Err(QuarryError::new(
                &format!("Option '{}' must be a string", key),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

fn extension_option(options: &Document, default: &str) -> QuarryResult<String> {
    let extension = string_option(options, "extension", default)?;
    if extension.is_empty() || extension.starts_with('.') {
        Ok(extension)
    } else {
        Ok(format!(".{}", extension))
    }
}

fn set_content(expression: Value) -> Document {
    let mut set = Document::new();
    set.insert(CONTENT_KEY, expression);
    doc! { "$set": set }
}

/// `json`: `{pretty, extension}`.
pub(crate) fn json_format(options: &Document, aggregator: &Aggregator) -> QuarryResult<Format> {
    let pretty = options.get("pretty").map(Value::is_truthy).unwrap_or(false);
    let reader = aggregator.compile(&[set_content(Value::Document(doc! {
        "$jsonToObject": "$content"
    }))])?;
    let writer = aggregator.compile(&[set_content(Value::Document(doc! {
        "$objectToJson": { input: "$content", pretty: pretty }
    }))])?;
    Ok(Format::new("json", &extension_option(options, ".json")?, reader, writer))
}

/// `yaml`: `{frontMatter, contentKey, extension}`.
///
/// Front-matter files default to the `.md` extension.
pub(crate) fn yaml_format(
    options: &Document,
    aggregator: &Aggregator,
    default_content_key: &str,
) -> QuarryResult<Format> {
    let front_matter = options.get("frontMatter").map(Value::is_truthy).unwrap_or(false);
    let content_key = string_option(options, "contentKey", default_content_key)?;
    let default_extension = if front_matter { ".md" } else { ".yaml" };

    let codec_options = doc! {
        input: "$content",
        frontMatter: front_matter,
        contentKey: { "$literal": (content_key.as_str()) }
    };
    let reader = aggregator.compile(&[set_content(Value::Document(doc! {
        "$yamlToObject": (codec_options.clone())
    }))])?;
    let writer = aggregator.compile(&[set_content(Value::Document(doc! {
        "$objectToYaml": codec_options
    }))])?;
    Ok(Format::new("yaml", &extension_option(options, default_extension)?, reader, writer))
}

/// `text`: the raw content is kept as-is under `contentKey`.
pub(crate) fn text_format(
    options: &Document,
    aggregator: &Aggregator,
    default_content_key: &str,
) -> QuarryResult<Format> {
    let content_key = string_option(options, "contentKey", default_content_key)?;

    let mut wrapped = Document::new();
    wrapped.insert(content_key.as_str(), "$content");
    let reader = aggregator.compile(&[set_content(Value::Document(wrapped))])?;

    let field = format!("$content.{}", content_key);
    let writer = aggregator.compile(&[set_content(Value::Document(doc! {
        "$ifNull": [(field.as_str()), ""]
    }))])?;
    Ok(Format::new("text", &extension_option(options, ".txt")?, reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::common::{collect_documents, stream_of};
    use crate::val;

    fn round_trip(format: &Format, raw: Document) -> (Document, Document) {
        let parsed = collect_documents(format.reader().apply(stream_of(vec![raw]))).unwrap();
        let written = collect_documents(format.writer().apply(stream_of(parsed.clone()))).unwrap();
        (parsed[0].clone(), written[0].clone())
    }

    #[test]
    fn test_descriptor_forms() {
        assert_eq!(
            parse_descriptor("format", &val!("json")).unwrap(),
            ("json".to_string(), Document::new())
        );
        assert_eq!(
            parse_descriptor("format", &Value::Document(doc! { yaml: { frontMatter: true } })).unwrap(),
            ("yaml".to_string(), doc! { frontMatter: true })
        );
        assert!(parse_descriptor("format", &val!(1)).is_err());
        assert!(parse_descriptor("format", &Value::Document(doc! { a: {}, b: {} })).is_err());
    }

    #[test]
    fn test_json_format() {
        let format = json_format(&Document::new(), &test_aggregator()).unwrap();
        assert_eq!(format.extension(), ".json");
        let raw = doc! { path: "db/c/a.json", content: "{\"title\":\"t\"}" };
        let (parsed, written) = round_trip(&format, raw.clone());
        assert_eq!(parsed, doc! { path: "db/c/a.json", content: { title: "t" } });
        assert_eq!(written, raw);
    }

    #[test]
    fn test_front_matter_format() {
        let format = yaml_format(&doc! { frontMatter: true }, &test_aggregator(), "content").unwrap();
        assert_eq!(format.extension(), ".md");
        let raw = doc! { path: "p.md", content: "---\ntitle: t\n---\nbody\n" };
        let (parsed, written) = round_trip(&format, raw.clone());
        assert_eq!(parsed, doc! { path: "p.md", content: { title: "t", content: "body\n" } });
        assert_eq!(written, raw);
    }

    #[test]
    fn test_text_format_with_content_key() {
        let format = text_format(&doc! { contentKey: "body", extension: "md" }, &test_aggregator(), "content")
            .unwrap();
        assert_eq!(format.extension(), ".md");
        let raw = doc! { path: "x.md", content: "hello" };
        let (parsed, written) = round_trip(&format, raw.clone());
        assert_eq!(parsed, doc! { path: "x.md", content: { body: "hello" } });
        assert_eq!(written, raw);
    }
}
