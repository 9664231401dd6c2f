use crate::aggregation::accumulators::register_accumulators;
use crate::aggregation::operators::register_expression_operators;
use crate::aggregation::stages::register_stages;
use crate::common::{PluginRegistrar, QuarryModule};
use crate::errors::QuarryResult;

/// Built-in stages, expression operators and accumulators.
///
/// Always loaded by [crate::QuarryBuilder] before any user module.
pub struct CoreOperators;

impl QuarryModule for CoreOperators {
    fn name(&self) -> &str {
        "core"
    }

    fn load(&self, registrar: &PluginRegistrar) -> QuarryResult<()> {
        let registry = registrar.registry();
        register_stages(&registry)?;
        register_expression_operators(&registry)?;
        register_accumulators(&registry)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::OperatorKind;
    use crate::common::PluginManager;
    use crate::errors::ErrorKind;

    #[test]
    fn test_registers_every_kind() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(CoreOperators)).unwrap();
        let registry = manager.registry();
        assert!(registry.contains("$match", OperatorKind::Pipeline));
        assert!(registry.contains("$concat", OperatorKind::Expression));
        assert!(registry.contains("$sum", OperatorKind::Accumulator));
        assert!(registry.contains("$count", OperatorKind::Pipeline));
        assert!(registry.contains("$count", OperatorKind::Accumulator));
    }

    #[test]
    fn test_loading_twice_fails_with_duplicate() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(CoreOperators)).unwrap();
        let err = manager.load_module(Box::new(CoreOperators)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateOperator);
    }
}
