use crate::aggregation::{Aggregator, Pipeline};
use crate::codec::{string_option, Format};
use crate::collection::{Document, Namespace};
use crate::common::{Value, CONTENT_KEY, DOC_ID, PATH_KEY};
use crate::doc;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Everything a layout resolver needs to build a layout for one collection.
pub struct LayoutContext<'a> {
    pub namespace: &'a Namespace,
    pub options: &'a Document,
    pub format: &'a Format,
    pub stats: &'a [String],
}

/// Maps a collection onto files below a store root.
///
/// Paths handed in and out of a layout are relative to the store root and
/// use `/` as separator, whatever the platform. The merge pipeline turns a
/// parsed raw document `{path, content, <stats>}` into a logical document
/// and the split pipeline turns logical documents back into raw documents.
pub trait LayoutProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the whole collection lives in one file.
    fn is_single_file(&self) -> bool;

    /// Lists the files currently backing the collection.
    fn enumerate(&self, root: &Path) -> QuarryResult<Vec<String>>;

    /// The file holding the document with `id`, when the layout keeps one
    /// file per document and the id can be addressed directly.
    fn path_for_id(&self, id: &Value) -> QuarryResult<Option<String>>;

    /// The directory or file that represents the collection itself.
    fn collection_path(&self) -> Option<String>;

    fn merge(&self) -> &Pipeline;

    fn split(&self) -> &Pipeline;
}

#[derive(Clone)]
pub struct Layout {
    inner: Arc<dyn LayoutProvider>,
}

impl Layout {
    pub fn new<T: LayoutProvider + 'static>(inner: T) -> Self {
        Layout {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for Layout {
    type Target = Arc<dyn LayoutProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Renders an id as a file name component.
pub(crate) fn id_file_name(id: &Value) -> QuarryResult<String> {
    let name = match id {
        Value::String(s) => s.clone(),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => id.to_plain_string(),
        other => {
            log::error!("Cannot use {} id as a file name", other.type_name());
            return Err(QuarryError::new(
                &format!("An id of type {} cannot be used as a file name", other.type_name()),
                ErrorKind::InvalidArgument,
            ));
        }
    };
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        log::error!("Invalid file name id {}", name);
        return Err(QuarryError::new(
            &format!("Id '{}' is not a valid file name", name),
            ErrorKind::InvalidArgument,
        ));
    }
    Ok(name)
}

/// Lists files matching `pattern` below `root`, relative to `root`.
/// `*` and `?` never cross a `/`, as in directory enumeration.
const GLOB_MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub(crate) fn glob_relative(root: &Path, pattern: &str) -> QuarryResult<Vec<String>> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern);
    log::debug!("Enumerating {}", full);

    let mut paths = Vec::new();
    for entry in glob::glob(&full)? {
        let entry = entry?;
        if !entry.is_file() {
            continue;
        }
        if let Ok(relative) = entry.strip_prefix(root) {
            paths.push(relative_string(relative));
        }
    }
    paths.sort();
    Ok(paths)
}

fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `{size: "$size", ...}` for the requested stat fields.
fn stat_fields(stats: &[String]) -> Value {
    let mut fields = Document::new();
    for stat in stats {
        fields.insert(stat.as_str(), format!("${}", stat));
    }
    Value::Document(fields)
}

/// Removes stat fields before writing, if any were merged on read.
fn strip_stats(stats: &[String]) -> Option<Document> {
    if stats.is_empty() {
        return None;
    }
    let fields: Vec<Value> = stats.iter().map(|s| Value::from(s.as_str())).collect();
    Some(doc! { "$unset": (fields) })
}

fn literal(value: &str) -> Value {
    Value::Document(doc! { "$literal": value })
}

fn id_document(id: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(DOC_ID, id);
    Value::Document(doc)
}

/// `{$replaceWith: {$mergeObjects: [{_id}, body, {_id}, stats]}}`.
///
/// The id leads the merged document and the file-derived id wins over any
/// id stored in the content.
fn merge_with_id(id: Value, body: &str, stats: &[String]) -> Document {
    let sources = vec![
        id_document(id.clone()),
        Value::from(body),
        id_document(id),
        stat_fields(stats),
    ];
    doc! { "$replaceWith": { "$mergeObjects": (sources) } }
}

/// `{$replaceWith: {path, content: "$$ROOT"}}` followed by dropping the
/// stored id, which the file name already carries.
fn wrap_as_file(path: Value, stages: &mut Vec<Document>) {
    let mut file = Document::new();
    file.insert(PATH_KEY, path);
    file.insert(CONTENT_KEY, "$$ROOT");
    stages.push(doc! { "$replaceWith": file });
    stages.push(doc! { "$unset": "content._id" });
}

/// One file per document: `<dir>/<id><extension>`.
pub struct DirectoryLayout {
    directory: String,
    extension: String,
    merge: Pipeline,
    split: Pipeline,
}

impl DirectoryLayout {
    pub fn build(context: &LayoutContext, aggregator: &Aggregator) -> QuarryResult<Self> {
        let default_dir = format!(
            "{}/{}",
            context.namespace.database(),
            context.namespace.collection()
        );
        let directory = string_option(context.options, "path", &default_dir)?
            .trim_end_matches('/')
            .to_string();
        let extension = string_option(context.options, "extension", context.format.extension())?;

        let file_id = Value::Document(doc! {
            "$basename": ["$path", { "$literal": (extension.as_str()) }]
        });
        let merge = aggregator.compile(&[merge_with_id(file_id, "$content", context.stats)])?;

        let mut split_stages = Vec::new();
        split_stages.extend(strip_stats(context.stats));
        let path = Value::Document(doc! {
            "$concat": [
                { "$literal": (format!("{}/", directory)) },
                { "$toString": "$_id" },
                { "$literal": (extension.as_str()) }
            ]
        });
        wrap_as_file(path, &mut split_stages);
        let split = aggregator.compile(&split_stages)?;

        Ok(DirectoryLayout {
            directory,
            extension,
            merge,
            split,
        })
    }
}

impl LayoutProvider for DirectoryLayout {
    fn name(&self) -> &str {
        "directory"
    }

    fn is_single_file(&self) -> bool {
        false
    }

    fn enumerate(&self, root: &Path) -> QuarryResult<Vec<String>> {
        let pattern = format!(
            "{}/*{}",
            glob::Pattern::escape(&self.directory),
            glob::Pattern::escape(&self.extension)
        );
        glob_relative(root, &pattern)
    }

    fn path_for_id(&self, id: &Value) -> QuarryResult<Option<String>> {
        let name = id_file_name(id)?;
        Ok(Some(format!("{}/{}{}", self.directory, name, self.extension)))
    }

    fn collection_path(&self) -> Option<String> {
        Some(self.directory.clone())
    }

    fn merge(&self) -> &Pipeline {
        &self.merge
    }

    fn split(&self) -> &Pipeline {
        &self.split
    }
}

/// Any files matching a pattern; the id is the matched path.
pub struct GlobLayout {
    pattern: String,
    matcher: glob::Pattern,
    merge: Pipeline,
    split: Pipeline,
}

impl GlobLayout {
    pub fn build(context: &LayoutContext, aggregator: &Aggregator) -> QuarryResult<Self> {
        let pattern = string_option(context.options, "pattern", "")?;
        if pattern.is_empty() {
            log::error!("Glob layout for {} has no pattern", context.namespace);
            return Err(QuarryError::new(
                "The glob layout requires a 'pattern' option",
                ErrorKind::InvalidArgument,
            ));
        }
        let matcher = glob::Pattern::new(&pattern)?;

        let merge = aggregator.compile(&[merge_with_id(Value::from("$path"), "$content", context.stats)])?;

        let mut split_stages = Vec::new();
        split_stages.extend(strip_stats(context.stats));
        wrap_as_file(Value::Document(doc! { "$toString": "$_id" }), &mut split_stages);
        let split = aggregator.compile(&split_stages)?;

        Ok(GlobLayout {
            pattern,
            matcher,
            merge,
            split,
        })
    }
}

impl LayoutProvider for GlobLayout {
    fn name(&self) -> &str {
        "glob"
    }

    fn is_single_file(&self) -> bool {
        false
    }

    fn enumerate(&self, root: &Path) -> QuarryResult<Vec<String>> {
        glob_relative(root, &self.pattern)
    }

    fn path_for_id(&self, id: &Value) -> QuarryResult<Option<String>> {
        match id {
            Value::String(path) if !path.is_empty() && !path.starts_with('/') && !path.contains("..") => {
                // ids outside the pattern belong to no collection
                if self.matcher.matches_with(path, GLOB_MATCH_OPTIONS) {
                    Ok(Some(path.clone()))
                } else {
                    log::error!("Id {} does not match glob layout pattern {}", path, self.pattern);
                    Err(QuarryError::new(
                        &format!("Id {} does not match the collection pattern {}", path, self.pattern),
                        ErrorKind::InvalidArgument,
                    ))
                }
            }
            _ => {
                log::error!("Invalid glob layout id {}", id);
                Err(QuarryError::new(
                    &format!("Id {} is not a relative path", id),
                    ErrorKind::InvalidArgument,
                ))
            }
        }
    }

    fn collection_path(&self) -> Option<String> {
        None
    }

    fn merge(&self) -> &Pipeline {
        &self.merge
    }

    fn split(&self) -> &Pipeline {
        &self.split
    }
}

/// The whole collection in one file, as an array or as an object keyed by id.
pub struct SingleFileLayout {
    name: &'static str,
    path: String,
    merge: Pipeline,
    split: Pipeline,
}

impl SingleFileLayout {
    fn file_path(context: &LayoutContext) -> QuarryResult<String> {
        let default_path = format!(
            "{}/{}{}",
            context.namespace.database(),
            context.namespace.collection(),
            context.format.extension()
        );
        string_option(context.options, "path", &default_path)
    }

    /// Elements without an `_id` take their array index as id.
    pub fn array(context: &LayoutContext, aggregator: &Aggregator) -> QuarryResult<Self> {
        let path = Self::file_path(context)?;

        let merge = aggregator.compile(&[
            doc! { "$unwind": { path: "$content", includeArrayIndex: "index" } },
            doc! { "$replaceWith": { "$mergeObjects": [
                { _id: { "$toString": "$index" } },
                "$content",
                (stat_fields(context.stats))
            ] } },
        ])?;

        let mut split_stages = Vec::new();
        split_stages.extend(strip_stats(context.stats));
        split_stages.push(doc! { "$collect": "content" });
        split_stages.push(doc! { "$set": { path: (literal(&path)) } });
        let split = aggregator.compile(&split_stages)?;

        Ok(SingleFileLayout {
            name: "array-in-file",
            path,
            merge,
            split,
        })
    }

    /// Keys of the top-level object are the document ids.
    pub fn object(context: &LayoutContext, aggregator: &Aggregator) -> QuarryResult<Self> {
        let path = Self::file_path(context)?;

        let merge = aggregator.compile(&[
            doc! { "$set": { content: { "$objectToArray": "$content" } } },
            doc! { "$unwind": "$content" },
            merge_with_id(Value::from("$content.k"), "$content.v", context.stats),
        ])?;

        let mut split_stages = Vec::new();
        split_stages.extend(strip_stats(context.stats));
        split_stages.push(doc! { "$replaceWith": { k: { "$toString": "$_id" }, v: "$$ROOT" } });
        split_stages.push(doc! { "$unset": "v._id" });
        split_stages.push(doc! { "$collect": "content" });
        split_stages.push(doc! { "$replaceWith": {
            path: (literal(&path)),
            content: { "$arrayToObject": "$content" }
        } });
        let split = aggregator.compile(&split_stages)?;

        Ok(SingleFileLayout {
            name: "object-in-file",
            path,
            merge,
            split,
        })
    }
}

impl LayoutProvider for SingleFileLayout {
    fn name(&self) -> &str {
        self.name
    }

    fn is_single_file(&self) -> bool {
        true
    }

    fn enumerate(&self, root: &Path) -> QuarryResult<Vec<String>> {
        if root.join(&self.path).is_file() {
            Ok(vec![self.path.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn path_for_id(&self, _: &Value) -> QuarryResult<Option<String>> {
        Ok(None)
    }

    fn collection_path(&self) -> Option<String> {
        Some(self.path.clone())
    }

    fn merge(&self) -> &Pipeline {
        &self.merge
    }

    fn split(&self) -> &Pipeline {
        &self.split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_aggregator;
    use crate::codec::json_format;
    use crate::common::{collect_documents, stream_of};
    use crate::val;

    fn context_parts() -> (Namespace, Format) {
        let aggregator = test_aggregator();
        (
            Namespace::new("db", "posts"),
            json_format(&Document::new(), &aggregator).unwrap(),
        )
    }

    fn run(pipeline: &Pipeline, docs: Vec<Document>) -> Vec<Document> {
        collect_documents(pipeline.apply(stream_of(docs))).unwrap()
    }

    #[test]
    fn test_directory_merge_and_split() {
        let (ns, format) = context_parts();
        let options = Document::new();
        let stats = vec!["size".to_string()];
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &stats };
        let layout = DirectoryLayout::build(&context, &test_aggregator()).unwrap();

        let merged = run(
            layout.merge(),
            vec![doc! { path: "db/posts/p1.json", content: { title: "t" }, size: 13 }],
        );
        assert_eq!(merged, vec![doc! { _id: "p1", title: "t", size: 13 }]);
        assert_eq!(merged[0].keys().next().map(String::as_str), Some("_id"));

        let split = run(layout.split(), merged);
        assert_eq!(split, vec![doc! { path: "db/posts/p1.json", content: { title: "t" } }]);

        assert_eq!(
            layout.path_for_id(&val!("p2")).unwrap(),
            Some("db/posts/p2.json".to_string())
        );
        assert!(layout.path_for_id(&val!("a/b")).is_err());
        assert_eq!(layout.collection_path(), Some("db/posts".to_string()));
    }

    #[test]
    fn test_glob_uses_path_as_id() {
        let (ns, format) = context_parts();
        let options = doc! { pattern: "notes/*.json" };
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &[] };
        let layout = GlobLayout::build(&context, &test_aggregator()).unwrap();

        let merged = run(layout.merge(), vec![doc! { path: "notes/a.json", content: { n: 1 } }]);
        assert_eq!(merged, vec![doc! { _id: "notes/a.json", n: 1 }]);
        let split = run(layout.split(), merged);
        assert_eq!(split, vec![doc! { path: "notes/a.json", content: { n: 1 } }]);

        assert_eq!(
            layout.path_for_id(&val!("notes/b.json")).unwrap(),
            Some("notes/b.json".to_string())
        );
        for outside in ["secret/x.json", "notes/deep/c.json", "notes/a.yaml", "../notes/a.json"] {
            let err = layout.path_for_id(&val!(outside)).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_glob_requires_pattern() {
        let (ns, format) = context_parts();
        let options = Document::new();
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &[] };
        assert!(GlobLayout::build(&context, &test_aggregator()).is_err());
    }

    #[test]
    fn test_array_in_file() {
        let (ns, format) = context_parts();
        let options = Document::new();
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &[] };
        let layout = SingleFileLayout::array(&context, &test_aggregator()).unwrap();
        assert!(layout.is_single_file());

        let merged = run(
            layout.merge(),
            vec![doc! { path: "db/posts.json", content: [{ _id: "a", n: 1 }, { n: 2 }] }],
        );
        assert_eq!(merged, vec![doc! { _id: "a", n: 1 }, doc! { _id: "1", n: 2 }]);

        let split = run(layout.split(), merged);
        assert_eq!(
            split,
            vec![doc! { content: [{ _id: "a", n: 1 }, { _id: "1", n: 2 }], path: "db/posts.json" }]
        );
    }

    #[test]
    fn test_object_in_file() {
        let (ns, format) = context_parts();
        let options = doc! { path: "data/posts.json" };
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &[] };
        let layout = SingleFileLayout::object(&context, &test_aggregator()).unwrap();

        let merged = run(
            layout.merge(),
            vec![doc! { path: "data/posts.json", content: { a: { n: 1 }, b: { n: 2 } } }],
        );
        assert_eq!(merged, vec![doc! { _id: "a", n: 1 }, doc! { _id: "b", n: 2 }]);

        let split = run(layout.split(), merged);
        assert_eq!(
            split,
            vec![doc! { path: "data/posts.json", content: { a: { n: 1 }, b: { n: 2 } } }]
        );
    }

    #[test]
    fn test_empty_single_file_writes_empty_container() {
        let (ns, format) = context_parts();
        let options = Document::new();
        let context = LayoutContext { namespace: &ns, options: &options, format: &format, stats: &[] };
        let layout = SingleFileLayout::object(&context, &test_aggregator()).unwrap();
        let split = run(layout.split(), vec![]);
        assert_eq!(split, vec![doc! { path: "db/posts.json", content: {} }]);
    }
}
