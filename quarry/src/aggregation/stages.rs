use crate::aggregation::{Accumulator, AccumulatorFactory, Aggregator, Expression, OperatorImpl, OperatorRegistry, StageTransform};
use crate::collection::Document;
use crate::common::{
    deferred_stream, DocumentStream, FilteredStream, SortSpec, SortedStream, Value, DOC_ID,
    OPERATOR_SIGIL,
};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registers the built-in pipeline stages.
pub(crate) fn register_stages(registry: &OperatorRegistry) -> QuarryResult<()> {
    registry.register("$match", OperatorImpl::pipeline(match_stage))?;
    registry.register("$project", OperatorImpl::pipeline(project_stage))?;
    registry.register("$addFields", OperatorImpl::pipeline(add_fields_stage))?;
    registry.register("$set", OperatorImpl::pipeline(add_fields_stage))?;
    registry.register("$unset", OperatorImpl::pipeline(unset_stage))?;
    registry.register("$limit", OperatorImpl::pipeline(limit_stage))?;
    registry.register("$skip", OperatorImpl::pipeline(skip_stage))?;
    registry.register("$sort", OperatorImpl::pipeline(sort_stage))?;
    registry.register("$group", OperatorImpl::pipeline(group_stage))?;
    registry.register("$count", OperatorImpl::pipeline(count_stage))?;
    registry.register("$unwind", OperatorImpl::pipeline(unwind_stage))?;
    registry.register("$replaceRoot", OperatorImpl::pipeline(replace_root_stage))?;
    registry.register("$replaceWith", OperatorImpl::pipeline(replace_with_stage))?;
    registry.register("$sortByCount", OperatorImpl::pipeline(sort_by_count_stage))?;
    registry.register("$collect", OperatorImpl::pipeline(collect_stage))?;
    Ok(())
}

fn invalid_stage(message: String) -> QuarryError {
    log::error!("{}", message);
    QuarryError::new(&message, ErrorKind::InvalidArgument)
}

fn spec_document<'a>(stage: &str, spec: &'a Value) -> QuarryResult<&'a Document> {
    spec.as_document().ok_or_else(|| {
        invalid_stage(format!(
            "the {} specification must be an object, found {}",
            stage,
            spec.type_name()
        ))
    })
}

fn spec_count(stage: &str, spec: &Value, allow_zero: bool) -> QuarryResult<usize> {
    match spec.as_i64() {
        Some(n) if n > 0 || (allow_zero && n == 0) => Ok(n as usize),
        _ => Err(invalid_stage(format!(
            "invalid argument to {} stage: {} is not a valid count",
            stage, spec
        ))),
    }
}

/// Maps every document through `map`, failing the stream on the first error.
fn map_documents<F>(map: F) -> StageTransform
where
    F: Fn(Document) -> QuarryResult<Document> + Send + Sync + 'static,
{
    let map = Arc::new(map);
    Arc::new(move |input: DocumentStream| {
        let map = map.clone();
        Box::new(input.map(move |doc| doc.and_then(|doc| map(doc)))) as DocumentStream
    })
}

fn match_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let filter = aggregator.compile_filter(spec_document("$match", spec)?)?;
    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        Box::new(FilteredStream::new(input, filter.clone())) as DocumentStream
    });
    Ok(transform)
}

enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

fn flatten_projection(
    prefix: &str,
    spec: &Document,
    aggregator: &Aggregator,
    flags: &mut Vec<(String, bool)>,
    computed: &mut Vec<(String, Expression)>,
) -> QuarryResult<()> {
    for (key, value) in spec.iter() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                flags.push((path, value.is_truthy()));
            }
            Value::Document(nested)
                if !nested.is_empty() && !nested.keys().any(|k| k.starts_with(OPERATOR_SIGIL)) =>
            {
                flatten_projection(&path, nested, aggregator, flags, computed)?;
            }
            other => computed.push((path, aggregator.compile_expression(other)?)),
        }
    }
    Ok(())
}

fn project_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let spec = spec_document("$project", spec)?;
    if spec.is_empty() {
        return Err(invalid_stage("$project requires at least one output field".to_string()));
    }

    let mut flags = Vec::new();
    let mut computed = Vec::new();
    flatten_projection("", spec, aggregator, &mut flags, &mut computed)?;

    let mut id_flag = None;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (path, keep) in flags {
        if path == DOC_ID {
            id_flag = Some(keep);
        } else if keep {
            included.push(path);
        } else {
            excluded.push(path);
        }
    }
    let include_id = id_flag.unwrap_or(true);

    let inclusion = !included.is_empty()
        || !computed.is_empty()
        || (id_flag == Some(true) && excluded.is_empty());
    let projection = match (inclusion, excluded.is_empty()) {
        (true, true) => Projection::Include(included),
        (false, _) => Projection::Exclude(excluded),
        (true, false) => {
            return Err(invalid_stage(
                "Cannot do exclusion and inclusion in the same $project".to_string(),
            ))
        }
    };

    Ok(map_documents(move |doc| match &projection {
        Projection::Exclude(paths) => {
            let mut doc = doc;
            for path in paths {
                doc.remove_path(path);
            }
            if !include_id {
                doc.remove(DOC_ID);
            }
            Ok(doc)
        }
        Projection::Include(paths) => {
            let mut result = Document::new();
            if include_id {
                if let Some(id) = doc.id() {
                    result.insert(DOC_ID, id.clone());
                }
            }
            for path in paths {
                if let Some(value) = doc.get_path(path) {
                    result.put_path(path, value.clone())?;
                }
            }
            for (path, expression) in &computed {
                if let Some(value) = expression.evaluate(&doc)? {
                    result.put_path(path, value)?;
                }
            }
            Ok(result)
        }
    }))
}

fn add_fields_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let fields = spec_document("$addFields", spec)?
        .iter()
        .map(|(path, value)| Ok((path.clone(), aggregator.compile_expression(value)?)))
        .collect::<QuarryResult<Vec<_>>>()?;

    Ok(map_documents(move |doc| {
        let mut result = doc.clone();
        for (path, expression) in &fields {
            match expression.evaluate(&doc)? {
                Some(value) => result.put_path(path, value)?,
                None => {
                    result.remove_path(path);
                }
            }
        }
        Ok(result)
    }))
}

fn unset_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let paths: Vec<String> = match spec {
        Value::String(path) => vec![path.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    invalid_stage("$unset specification must be a string or array of strings".to_string())
                })
            })
            .collect::<QuarryResult<_>>()?,
        _ => {
            return Err(invalid_stage(
                "$unset specification must be a string or array of strings".to_string(),
            ))
        }
    };

    Ok(map_documents(move |mut doc| {
        for path in &paths {
            doc.remove_path(path);
        }
        Ok(doc)
    }))
}

fn limit_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let limit = spec_count("$limit", spec, false)?;
    let transform: StageTransform =
        Arc::new(move |input: DocumentStream| Box::new(input.take(limit)) as DocumentStream);
    Ok(transform)
}

fn skip_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let skip = spec_count("$skip", spec, true)?;
    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        // errors are never skipped
        let mut remaining = skip;
        Box::new(input.filter(move |doc| {
            if doc.is_ok() && remaining > 0 {
                remaining -= 1;
                false
            } else {
                true
            }
        })) as DocumentStream
    });
    Ok(transform)
}

fn sort_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let sort_spec = SortSpec::parse(spec_document("$sort", spec)?)?;
    let max_documents = aggregator.config().max_sort_documents();
    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        Box::new(SortedStream::new(input, sort_spec.clone(), max_documents)) as DocumentStream
    });
    Ok(transform)
}

struct GroupField {
    name: String,
    factory: AccumulatorFactory,
    operand: Expression,
}

fn group_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let spec = spec_document("$group", spec)?;
    let key = match spec.get(DOC_ID) {
        Some(key) => aggregator.compile_expression(key)?,
        None => {
            return Err(invalid_stage(
                "a group specification must include an _id".to_string(),
            ))
        }
    };

    let mut fields = Vec::new();
    for (name, accumulator) in spec.iter().filter(|(name, _)| *name != DOC_ID) {
        let (op, operand) = match accumulator.as_document().and_then(|d| d.single_entry()) {
            Some(entry) => entry,
            None => {
                return Err(invalid_stage(format!(
                    "The field '{}' must be an accumulator object",
                    name
                )))
            }
        };
        fields.push(GroupField {
            name: name.clone(),
            factory: aggregator.registry().resolve_accumulator(op)?,
            operand: aggregator.compile_expression(operand)?,
        });
    }
    let fields = Arc::new(fields);

    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        let key = key.clone();
        let fields = fields.clone();
        deferred_stream(move || group_documents(input, &key, &fields))
    });
    Ok(transform)
}

fn group_documents(input: DocumentStream, key: &Expression, fields: &[GroupField]) -> QuarryResult<Vec<Document>> {
    // groups keep first-seen order
    let mut positions: BTreeMap<Value, usize> = BTreeMap::new();
    let mut groups: Vec<(Value, Vec<Box<dyn Accumulator>>)> = Vec::new();

    for doc in input {
        let doc = doc?;
        let group_key = key.evaluate_or_null(&doc)?;
        let position = match positions.get(&group_key) {
            Some(position) => *position,
            None => {
                let accumulators = fields.iter().map(|f| (f.factory)()).collect();
                groups.push((group_key.clone(), accumulators));
                positions.insert(group_key, groups.len() - 1);
                groups.len() - 1
            }
        };

        let accumulators = &mut groups[position].1;
        for (field, accumulator) in fields.iter().zip(accumulators.iter_mut()) {
            accumulator.accumulate(field.operand.evaluate(&doc)?)?;
        }
    }

    Ok(groups
        .into_iter()
        .map(|(group_key, accumulators)| {
            let mut result = Document::new();
            result.insert(DOC_ID, group_key);
            for (field, accumulator) in fields.iter().zip(accumulators.iter()) {
                result.insert(field.name.clone(), accumulator.result());
            }
            result
        })
        .collect())
}

fn output_field(stage: &str, spec: &Value) -> QuarryResult<String> {
    match spec.as_str() {
        Some(name) if !name.is_empty() && !name.starts_with(OPERATOR_SIGIL) && !name.contains('.') => {
            Ok(name.to_string())
        }
        _ => Err(invalid_stage(format!(
            "the {} field must be a non-empty string without '$' or '.'",
            stage
        ))),
    }
}

fn count_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let field = output_field("$count", spec)?;
    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        let field = field.clone();
        deferred_stream(move || {
            let mut count = 0i64;
            for doc in input {
                doc?;
                count += 1;
            }
            if count == 0 {
                return Ok(vec![]);
            }
            let mut result = Document::new();
            result.insert(field, count);
            Ok(vec![result])
        })
    });
    Ok(transform)
}

fn unwind_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let (path, index_field, preserve) = match spec {
        Value::String(path) => (path.clone(), None, false),
        Value::Document(options) => {
            let path = options
                .get("path")
                .and_then(|p| p.as_str())
                .map(String::from)
                .unwrap_or_default();
            let index_field = options
                .get("includeArrayIndex")
                .and_then(|f| f.as_str())
                .map(String::from);
            let preserve = options
                .get("preserveNullAndEmptyArrays")
                .map(Value::is_truthy)
                .unwrap_or(false);
            (path, index_field, preserve)
        }
        _ => {
            return Err(invalid_stage(
                "expected either a string or an object as specification for $unwind".to_string(),
            ))
        }
    };

    let path = match path.strip_prefix(OPERATOR_SIGIL) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => {
            return Err(invalid_stage(
                "path option to $unwind stage should be prefixed with a '$'".to_string(),
            ))
        }
    };

    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        let path = path.clone();
        let index_field = index_field.clone();
        Box::new(input.flat_map(move |doc| match doc {
            Ok(doc) => unwind_document(doc, &path, index_field.as_deref(), preserve),
            Err(e) => vec![Err(e)],
        })) as DocumentStream
    });
    Ok(transform)
}

fn unwind_document(
    doc: Document,
    path: &str,
    index_field: Option<&str>,
    preserve: bool,
) -> Vec<QuarryResult<Document>> {
    let with_index = |mut doc: Document, index: Value| -> QuarryResult<Document> {
        if let Some(field) = index_field {
            doc.put_path(field, index)?;
        }
        Ok(doc)
    };

    match doc.get_path(path).cloned() {
        Some(Value::Array(items)) if !items.is_empty() => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut unwound = doc.clone();
                unwound.put_path(path, item)?;
                with_index(unwound, Value::Int(i as i64))
            })
            .collect(),
        Some(Value::Array(_)) | Some(Value::Null) | None => {
            if preserve {
                vec![with_index(doc, Value::Null)]
            } else {
                vec![]
            }
        }
        Some(_) => vec![with_index(doc, Value::Null)],
    }
}

fn replace_root(expression: Expression) -> StageTransform {
    map_documents(move |doc| match expression.evaluate(&doc)? {
        Some(Value::Document(root)) => Ok(root),
        other => Err(invalid_stage(format!(
            "'newRoot' expression must evaluate to an object, but resulting value was: {}",
            other.map(|v| v.to_json()).unwrap_or_else(|| "MISSING".to_string())
        ))),
    })
}

fn replace_root_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let new_root = spec_document("$replaceRoot", spec)?
        .get("newRoot")
        .ok_or_else(|| invalid_stage("no newRoot specified for the $replaceRoot stage".to_string()))?;
    Ok(replace_root(aggregator.compile_expression(new_root)?))
}

fn replace_with_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    Ok(replace_root(aggregator.compile_expression(spec)?))
}

fn sort_by_count_stage(spec: &Value, aggregator: &Aggregator) -> QuarryResult<StageTransform> {
    let mut group = Document::new();
    group.insert(DOC_ID, spec.clone());
    let mut count = Document::new();
    count.insert("$sum", 1);
    group.insert("count", count);

    let mut sort = Document::new();
    sort.insert("count", -1);

    let mut group_spec = Document::new();
    group_spec.insert("$group", group);
    let mut sort_spec = Document::new();
    sort_spec.insert("$sort", sort);

    let pipeline = aggregator.compile(&[group_spec, sort_spec])?;
    let transform: StageTransform = Arc::new(move |input: DocumentStream| pipeline.apply(input));
    Ok(transform)
}

/// `{$collect: "field"}` gathers the whole stream into a single document
/// holding every upstream document under `field`. It always emits exactly
/// one document, even for an empty upstream.
fn collect_stage(spec: &Value, _: &Aggregator) -> QuarryResult<StageTransform> {
    let field = output_field("$collect", spec)?;
    let transform: StageTransform = Arc::new(move |input: DocumentStream| {
        let field = field.clone();
        deferred_stream(move || {
            let documents = input
                .map(|doc| doc.map(Value::Document))
                .collect::<QuarryResult<Vec<_>>>()?;
            let mut result = Document::new();
            result.insert(field, Value::Array(documents));
            Ok(vec![result])
        })
    });
    Ok(transform)
}
