use crate::aggregation::{Accumulator, Aggregator};
use crate::collection::Document;
use crate::common::{DocumentStream, Value, OPERATOR_SIGIL};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A compiled stage: consumes the upstream sequence and returns a new one.
pub type StageTransform = Arc<dyn Fn(DocumentStream) -> DocumentStream + Send + Sync>;

/// Compiles a stage's configuration value into a [StageTransform].
pub type PipelineOperator =
    Arc<dyn Fn(&Value, &Aggregator) -> QuarryResult<StageTransform> + Send + Sync>;

/// Evaluates an operator given its evaluated arguments and the current document.
///
/// An array operand is the argument list, any other operand is the single
/// argument and an absent operand gives no arguments. A `None` result stands
/// for an absent value.
pub type ExpressionOperator =
    Arc<dyn Fn(Vec<Value>, &Document) -> QuarryResult<Option<Value>> + Send + Sync>;

/// Creates a fresh accumulator for each group.
pub type AccumulatorFactory = Arc<dyn Fn() -> Box<dyn Accumulator> + Send + Sync>;

/// The three operator kinds a registry entry may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Pipeline,
    Expression,
    Accumulator,
}

impl Display for OperatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorKind::Pipeline => write!(f, "pipeline"),
            OperatorKind::Expression => write!(f, "expression"),
            OperatorKind::Accumulator => write!(f, "accumulator"),
        }
    }
}

/// An operator implementation tagged with its kind.
#[derive(Clone)]
pub enum OperatorImpl {
    Pipeline(PipelineOperator),
    Expression(ExpressionOperator),
    Accumulator(AccumulatorFactory),
}

impl OperatorImpl {
    pub fn pipeline<F>(operator: F) -> Self
    where
        F: Fn(&Value, &Aggregator) -> QuarryResult<StageTransform> + Send + Sync + 'static,
    {
        OperatorImpl::Pipeline(Arc::new(operator))
    }

    pub fn expression<F>(operator: F) -> Self
    where
        F: Fn(Vec<Value>, &Document) -> QuarryResult<Option<Value>> + Send + Sync + 'static,
    {
        OperatorImpl::Expression(Arc::new(operator))
    }

    pub fn accumulator<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Accumulator> + Send + Sync + 'static,
    {
        OperatorImpl::Accumulator(Arc::new(factory))
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            OperatorImpl::Pipeline(_) => OperatorKind::Pipeline,
            OperatorImpl::Expression(_) => OperatorKind::Expression,
            OperatorImpl::Accumulator(_) => OperatorKind::Accumulator,
        }
    }
}

/// Name-keyed table of pipeline, expression and accumulator operators.
///
/// The registry is additive: operators are registered by modules while the
/// engine is being built and never removed. The first resolve seals it, and
/// any registration after that fails with [ErrorKind::RegistrySealed]. The
/// same name may exist once per kind, so `$count` can be both a stage and
/// an accumulator.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    inner: Arc<OperatorRegistryInner>,
}

#[derive(Default)]
struct OperatorRegistryInner {
    pipeline: DashMap<String, PipelineOperator>,
    expression: DashMap<String, ExpressionOperator>,
    accumulator: DashMap<String, AccumulatorFactory>,
    sealed: AtomicBool,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry {
            inner: Arc::new(OperatorRegistryInner::default()),
        }
    }

    /// Registers an operator under `name` for the implementation's kind.
    pub fn register(&self, name: &str, operator: OperatorImpl) -> QuarryResult<()> {
        if self.is_sealed() {
            log::error!("Cannot register {} operator {} in a sealed registry", operator.kind(), name);
            return Err(QuarryError::new(
                &format!("Operator registry is sealed, cannot register {}", name),
                ErrorKind::RegistrySealed,
            ));
        }

        if !name.starts_with(OPERATOR_SIGIL) || name.len() < 2 {
            log::error!("Invalid operator name {}", name);
            return Err(QuarryError::new(
                &format!("Operator name '{}' must start with '$'", name),
                ErrorKind::InvalidArgument,
            ));
        }

        let kind = operator.kind();
        let inserted = match operator {
            OperatorImpl::Pipeline(op) => insert_new(&self.inner.pipeline, name, op),
            OperatorImpl::Expression(op) => insert_new(&self.inner.expression, name, op),
            OperatorImpl::Accumulator(op) => insert_new(&self.inner.accumulator, name, op),
        };

        if inserted {
            log::debug!("Registered {} operator {}", kind, name);
            Ok(())
        } else {
            log::error!("Duplicate {} operator {}", kind, name);
            Err(QuarryError::new(
                &format!("Duplicate {} operator: {}", kind, name),
                ErrorKind::DuplicateOperator,
            ))
        }
    }

    /// Resolves a stage operator.
    pub fn resolve_pipeline(&self, name: &str) -> QuarryResult<PipelineOperator> {
        self.seal();
        lookup(&self.inner.pipeline, name, OperatorKind::Pipeline)
    }

    /// Resolves an expression operator.
    pub fn resolve_expression(&self, name: &str) -> QuarryResult<ExpressionOperator> {
        self.seal();
        lookup(&self.inner.expression, name, OperatorKind::Expression)
    }

    /// Resolves an accumulator factory.
    pub fn resolve_accumulator(&self, name: &str) -> QuarryResult<AccumulatorFactory> {
        self.seal();
        lookup(&self.inner.accumulator, name, OperatorKind::Accumulator)
    }

    /// Resolves an operator of any kind.
    pub fn resolve(&self, name: &str, kind: OperatorKind) -> QuarryResult<OperatorImpl> {
        match kind {
            OperatorKind::Pipeline => self.resolve_pipeline(name).map(OperatorImpl::Pipeline),
            OperatorKind::Expression => self.resolve_expression(name).map(OperatorImpl::Expression),
            OperatorKind::Accumulator => {
                self.resolve_accumulator(name).map(OperatorImpl::Accumulator)
            }
        }
    }

    pub fn contains(&self, name: &str, kind: OperatorKind) -> bool {
        match kind {
            OperatorKind::Pipeline => self.inner.pipeline.contains_key(name),
            OperatorKind::Expression => self.inner.expression.contains_key(name),
            OperatorKind::Accumulator => self.inner.accumulator.contains_key(name),
        }
    }

    /// Returns the registered names of one kind, sorted.
    pub fn names(&self, kind: OperatorKind) -> Vec<String> {
        let mut names: Vec<String> = match kind {
            OperatorKind::Pipeline => self.inner.pipeline.iter().map(|e| e.key().clone()).collect(),
            OperatorKind::Expression => {
                self.inner.expression.iter().map(|e| e.key().clone()).collect()
            }
            OperatorKind::Accumulator => {
                self.inner.accumulator.iter().map(|e| e.key().clone()).collect()
            }
        };
        names.sort();
        names
    }

    /// Stops accepting registrations.
    pub fn seal(&self) {
        if !self.inner.sealed.swap(true, Ordering::AcqRel) {
            log::debug!(
                "Sealed operator registry with {} stages, {} expressions, {} accumulators",
                self.inner.pipeline.len(),
                self.inner.expression.len(),
                self.inner.accumulator.len()
            );
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }
}

fn insert_new<T>(table: &DashMap<String, T>, name: &str, operator: T) -> bool {
    match table.entry(name.to_string()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(entry) => {
            entry.insert(operator);
            true
        }
    }
}

fn lookup<T: Clone>(table: &DashMap<String, T>, name: &str, kind: OperatorKind) -> QuarryResult<T> {
    match table.get(name) {
        Some(entry) => Ok(entry.value().clone()),
        None => {
            log::error!("Unknown {} operator {}", kind, name);
            Err(QuarryError::new(
                &format!("Unrecognized {} operator: {}", kind, name),
                ErrorKind::UnknownOperator,
            ))
        }
    }
}
