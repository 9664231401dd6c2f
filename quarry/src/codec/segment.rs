use crate::aggregation::{Aggregator, Pipeline};
use crate::codec::{
    json_format, parse_descriptor, text_format, yaml_format, DirectoryLayout, Format, GlobLayout, Layout,
    LayoutContext, SingleFileLayout,
};
use crate::collection::{Document, Namespace};
use crate::common::{Value, STAT_FIELDS};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::ops::Deref;
use std::sync::Arc;

/// Resolves format and layout names into their implementations.
///
/// Resolvers are consulted most recent first; returning `Ok(None)` passes
/// the name on to the next resolver.
pub trait SegmentResolverProvider: Send + Sync {
    fn name(&self) -> &str;

    fn resolve_format(
        &self,
        name: &str,
        options: &Document,
        aggregator: &Aggregator,
    ) -> QuarryResult<Option<Format>>;

    fn resolve_layout(
        &self,
        name: &str,
        context: &LayoutContext,
        aggregator: &Aggregator,
    ) -> QuarryResult<Option<Layout>>;
}

#[derive(Clone)]
pub struct SegmentResolver {
    inner: Arc<dyn SegmentResolverProvider>,
}

impl SegmentResolver {
    pub fn new<T: SegmentResolverProvider + 'static>(inner: T) -> Self {
        SegmentResolver {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for SegmentResolver {
    type Target = Arc<dyn SegmentResolverProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The `json`, `yaml` and `text` formats and the `directory`, `glob`,
/// `array-in-file` and `object-in-file` layouts.
pub(crate) struct BuiltinResolver;

impl SegmentResolverProvider for BuiltinResolver {
    fn name(&self) -> &str {
        "builtin"
    }

    fn resolve_format(
        &self,
        name: &str,
        options: &Document,
        aggregator: &Aggregator,
    ) -> QuarryResult<Option<Format>> {
        let content_key = aggregator.config().content_key();
        match name {
            "json" => json_format(options, aggregator).map(Some),
            "yaml" => yaml_format(options, aggregator, content_key).map(Some),
            "text" => text_format(options, aggregator, content_key).map(Some),
            _ => Ok(None),
        }
    }

    fn resolve_layout(
        &self,
        name: &str,
        context: &LayoutContext,
        aggregator: &Aggregator,
    ) -> QuarryResult<Option<Layout>> {
        match name {
            "directory" => Ok(Some(Layout::new(DirectoryLayout::build(context, aggregator)?))),
            "glob" => Ok(Some(Layout::new(GlobLayout::build(context, aggregator)?))),
            "array-in-file" => Ok(Some(Layout::new(SingleFileLayout::array(context, aggregator)?))),
            "object-in-file" => Ok(Some(Layout::new(SingleFileLayout::object(context, aggregator)?))),
            _ => Ok(None),
        }
    }
}

/// The declarative description of how a collection is stored.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentSpec {
    pub format: Value,
    pub layout: Value,
    pub stats: Vec<String>,
}

impl Default for SegmentSpec {
    fn default() -> Self {
        SegmentSpec {
            format: Value::from("json"),
            layout: Value::from("directory"),
            stats: Vec::new(),
        }
    }
}

impl SegmentSpec {
    /// Overrides the fields present in a `create` command or collection
    /// options document: `format`, `layout` and `stat`.
    pub fn with_options(&self, options: &Document) -> QuarryResult<SegmentSpec> {
        let mut spec = self.clone();
        if let Some(format) = options.get("format") {
            spec.format = format.clone();
        }
        if let Some(layout) = options.get("layout") {
            spec.layout = layout.clone();
        }
        if let Some(stat) = options.get("stat") {
            spec.stats = parse_stats(stat)?;
        }
        Ok(spec)
    }
}

pub(crate) fn parse_stats(value: &Value) -> QuarryResult<Vec<String>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::String(s) => vec![Value::from(s.as_str())],
        Value::Array(items) => items.clone(),
        other => {
            log::error!("Invalid stat option of type {}", other.type_name());
            return Err(QuarryError::new(
                "Option 'stat' must be a list of stat field names",
                ErrorKind::InvalidArgument,
            ));
        }
    };

    items
        .iter()
        .map(|item| match item.as_str() {
            Some(field) if STAT_FIELDS.contains(&field) => Ok(field.to_string()),
            _ => {
                log::error!("Unknown stat field {}", item);
                Err(QuarryError::new(
                    &format!("Unknown stat field {}, expected one of {:?}", item, STAT_FIELDS),
                    ErrorKind::InvalidArgument,
                ))
            }
        })
        .collect()
}

/// The input and output pipelines of one collection.
///
/// `input` turns raw file documents into logical documents and `output`
/// turns logical documents into raw file documents. Both come from the same
/// format and layout, so writing what was read reproduces the files.
#[derive(Clone)]
pub struct IOSegment {
    input: Pipeline,
    output: Pipeline,
    format: Format,
    layout: Layout,
}

impl IOSegment {
    pub fn new(format: Format, layout: Layout) -> Self {
        let input = format.reader().then(layout.merge());
        let output = layout.split().then(format.writer());
        IOSegment {
            input,
            output,
            format,
            layout,
        }
    }

    pub fn input(&self) -> &Pipeline {
        &self.input
    }

    pub fn output(&self) -> &Pipeline {
        &self.output
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

/// Builds [IOSegment]s from [SegmentSpec]s using the registered resolvers.
#[derive(Clone)]
pub struct SegmentFactory {
    resolvers: Vec<SegmentResolver>,
    aggregator: Aggregator,
}

impl SegmentFactory {
    /// `resolvers` are consulted in order.
    pub fn new(resolvers: Vec<SegmentResolver>, aggregator: Aggregator) -> Self {
        SegmentFactory {
            resolvers,
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn build(&self, namespace: &Namespace, spec: &SegmentSpec) -> QuarryResult<IOSegment> {
        let format = self.format(&spec.format)?;
        let layout = self.layout(namespace, &spec.layout, &format, &spec.stats)?;
        log::debug!(
            "Built {}/{} segment for {}",
            format.name(),
            layout.name(),
            namespace
        );
        Ok(IOSegment::new(format, layout))
    }

    fn format(&self, descriptor: &Value) -> QuarryResult<Format> {
        let (name, options) = parse_descriptor("format", descriptor)?;
        for resolver in &self.resolvers {
            if let Some(format) = resolver.resolve_format(&name, &options, &self.aggregator)? {
                return Ok(format);
            }
        }
        log::error!("Unsupported format {}", name);
        Err(QuarryError::new(
            &format!("Unsupported format: {}", name),
            ErrorKind::UnsupportedFormat,
        ))
    }

    fn layout(
        &self,
        namespace: &Namespace,
        descriptor: &Value,
        format: &Format,
        stats: &[String],
    ) -> QuarryResult<Layout> {
        let (name, options) = parse_descriptor("layout", descriptor)?;
        let context = LayoutContext {
            namespace,
            options: &options,
            format,
            stats,
        };
        for resolver in &self.resolvers {
            if let Some(layout) = resolver.resolve_layout(&name, &context, &self.aggregator)? {
                return Ok(layout);
            }
        }
        log::error!("Unsupported layout {}", name);
        Err(QuarryError::new(
            &format!("Unsupported layout: {}", name),
            ErrorKind::UnsupportedFormat,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::common::{collect_documents, stream_of};
    use crate::{doc, val};

    fn factory() -> SegmentFactory {
        SegmentFactory::new(vec![SegmentResolver::new(BuiltinResolver)], test_aggregator())
    }

    fn spec(format: Value, layout: Value) -> SegmentSpec {
        SegmentSpec {
            format,
            layout,
            stats: Vec::new(),
        }
    }

    fn round_trip(segment: &IOSegment, raw: Vec<Document>) -> Vec<Document> {
        let docs = collect_documents(segment.input().apply(stream_of(raw))).unwrap();
        collect_documents(segment.output().apply(stream_of(docs))).unwrap()
    }

    #[test]
    fn test_unknown_format_and_layout() {
        let ns = Namespace::new("db", "c");
        let err = factory().build(&ns, &spec(val!("toml"), val!("directory"))).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::UnsupportedFormat);
        let err = factory().build(&ns, &spec(val!("json"), val!("tree"))).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_json_directory_round_trip() {
        let ns = Namespace::new("db", "c");
        let segment = factory().build(&ns, &SegmentSpec::default()).unwrap();
        let raw = vec![
            doc! { path: "db/c/a.json", content: "{\"title\":\"t\"}" },
            doc! { path: "db/c/b.json", content: "{\"n\":[1,2]}" },
        ];
        let docs = collect_documents(segment.input().apply(stream_of(raw.clone()))).unwrap();
        assert_eq!(docs, vec![doc! { _id: "a", title: "t" }, doc! { _id: "b", n: [1, 2] }]);
        assert_eq!(round_trip(&segment, raw.clone()), raw);
    }

    #[test]
    fn test_front_matter_directory_round_trip() {
        let ns = Namespace::new("db", "posts");
        let format = Value::Document(doc! { yaml: { frontMatter: true, contentKey: "body" } });
        let segment = factory().build(&ns, &spec(format, val!("directory"))).unwrap();
        let raw = vec![doc! { path: "db/posts/hello.md", content: "---\ntitle: Hello\n---\nHi there\n" }];
        let docs = collect_documents(segment.input().apply(stream_of(raw.clone()))).unwrap();
        assert_eq!(docs, vec![doc! { _id: "hello", title: "Hello", body: "Hi there\n" }]);
        assert_eq!(round_trip(&segment, raw.clone()), raw);
    }

    #[test]
    fn test_yaml_object_in_file_round_trip() {
        let ns = Namespace::new("db", "people");
        let segment = factory().build(&ns, &spec(val!("yaml"), val!("object-in-file"))).unwrap();
        let raw = vec![doc! { path: "db/people.yaml", content: "ada:\n  born: 1815\nalan:\n  born: 1912\n" }];
        let docs = collect_documents(segment.input().apply(stream_of(raw.clone()))).unwrap();
        assert_eq!(
            docs,
            vec![doc! { _id: "ada", born: 1815 }, doc! { _id: "alan", born: 1912 }]
        );
        assert_eq!(round_trip(&segment, raw.clone()), raw);
    }

    #[test]
    fn test_stats_are_merged_then_stripped() {
        let ns = Namespace::new("db", "c");
        let spec = SegmentSpec::default()
            .with_options(&doc! { stat: ["size"] })
            .unwrap();
        let segment = factory().build(&ns, &spec).unwrap();
        let raw = doc! { path: "db/c/a.json", content: "{\"t\":1}", size: 7 };
        let docs = collect_documents(segment.input().apply(stream_of(vec![raw]))).unwrap();
        assert_eq!(docs, vec![doc! { _id: "a", t: 1, size: 7 }]);
        let written = collect_documents(segment.output().apply(stream_of(docs))).unwrap();
        assert_eq!(written, vec![doc! { path: "db/c/a.json", content: "{\"t\":1}" }]);
    }

    #[test]
    fn test_unknown_stat_field() {
        assert!(SegmentSpec::default().with_options(&doc! { stat: ["atime"] }).is_err());
    }
}
