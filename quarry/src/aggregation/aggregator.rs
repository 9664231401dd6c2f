use crate::aggregation::{Expression, OperatorRegistry, StageTransform};
use crate::collection::Document;
use crate::common::{DocumentStream, Value};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::filter::Filter;
use crate::quarry_config::QuarryConfig;
use std::sync::Arc;

/// Compiles pipelines, expressions and queries against one registry.
///
/// The aggregator is the only place where operator names are resolved.
/// Everything it returns is fully compiled, so running a [Pipeline] never
/// looks anything up again.
#[derive(Clone)]
pub struct Aggregator {
    registry: OperatorRegistry,
    config: QuarryConfig,
}

impl Aggregator {
    pub fn new(registry: OperatorRegistry, config: QuarryConfig) -> Self {
        Aggregator { registry, config }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    /// Compiles an ordered list of stage documents.
    ///
    /// Each stage must hold exactly one key naming a registered pipeline
    /// operator. Compilation stops at the first bad stage.
    pub fn compile(&self, stages: &[Document]) -> QuarryResult<Pipeline> {
        let mut pipeline = Pipeline::default();
        for stage in stages {
            let (name, spec) = match stage.single_entry() {
                Some(entry) => entry,
                None => {
                    log::error!("Pipeline stage {} must have exactly one field", stage);
                    return Err(QuarryError::new(
                        &format!(
                            "A pipeline stage specification object must contain exactly one field: {}",
                            stage
                        ),
                        ErrorKind::InvalidArgument,
                    ));
                }
            };
            let operator = self.registry.resolve_pipeline(name)?;
            let transform = operator(spec, self)?;
            pipeline.push(name, transform);
        }

        log::debug!("Compiled pipeline [{}]", pipeline.stage_names().join(", "));
        Ok(pipeline)
    }

    /// Compiles a pipeline given as an array value.
    pub fn compile_value(&self, pipeline: &Value) -> QuarryResult<Pipeline> {
        let stages = pipeline_stages(pipeline)?;
        self.compile(&stages)
    }

    pub fn compile_expression(&self, expression: &Value) -> QuarryResult<Expression> {
        Expression::compile(expression, &self.registry)
    }

    pub fn compile_filter(&self, query: &Document) -> QuarryResult<Filter> {
        Filter::parse(query, self)
    }

    /// Compiles `stages` and applies them to `input`.
    pub fn aggregate(&self, stages: &[Document], input: DocumentStream) -> QuarryResult<DocumentStream> {
        let pipeline = self.compile(stages)?;
        Ok(pipeline.apply(input))
    }
}

/// Reads the stage documents out of a pipeline value.
pub fn pipeline_stages(pipeline: &Value) -> QuarryResult<Vec<Document>> {
    let items = match pipeline {
        Value::Array(items) => items,
        other => {
            log::error!("Pipeline must be an array, found {}", other.type_name());
            return Err(QuarryError::new(
                &format!("A pipeline must be an array, found {}", other.type_name()),
                ErrorKind::InvalidArgument,
            ));
        }
    };

    items
        .iter()
        .map(|item| match item {
            Value::Document(stage) => Ok(stage.clone()),
            other => {
                log::error!("Pipeline stage must be an object, found {}", other.type_name());
                Err(QuarryError::new(
                    &format!("Each pipeline stage must be an object, found {}", other.type_name()),
                    ErrorKind::InvalidArgument,
                ))
            }
        })
        .collect()
}

#[derive(Clone)]
struct CompiledStage {
    name: String,
    transform: StageTransform,
}

/// A compiled, reusable chain of stage transforms.
///
/// Applying a pipeline does no work by itself: it wires the transforms
/// around the input and returns the resulting lazy stream. Documents are
/// read from upstream only as the caller pulls them.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<CompiledStage>,
}

impl Pipeline {
    /// Appends a transform under a stage name.
    pub fn push(&mut self, name: &str, transform: StageTransform) {
        self.stages.push(CompiledStage {
            name: name.to_string(),
            transform,
        });
    }

    /// Appends a transform given as a closure.
    pub fn push_fn<F>(&mut self, name: &str, transform: F)
    where
        F: Fn(DocumentStream) -> DocumentStream + Send + Sync + 'static,
    {
        self.push(name, Arc::new(transform));
    }

    pub fn apply(&self, input: DocumentStream) -> DocumentStream {
        self.stages
            .iter()
            .fold(input, |stream, stage| (stage.transform)(stream))
    }

    /// Returns a pipeline running `self` and then `next`.
    pub fn then(&self, next: &Pipeline) -> Pipeline {
        let mut stages = self.stages.clone();
        stages.extend(next.stages.iter().cloned());
        Pipeline { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_aggregator() -> Aggregator {
    use crate::aggregation::CoreOperators;
    use crate::codec::CodecOperators;
    use crate::common::PluginManager;

    let manager = PluginManager::new();
    manager
        .load_module(Box::new(CoreOperators))
        .expect("core operators");
    manager
        .load_module(Box::new(CodecOperators))
        .expect("codec operators");
    Aggregator::new(manager.registry(), QuarryConfig::default())
}
