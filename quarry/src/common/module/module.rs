use super::plugin_manager::PluginRegistrar;
use crate::errors::QuarryResult;

/// Contract for modules that extend the engine.
///
/// # Purpose
/// A module bundles related operators and segment resolvers. It is loaded
/// once by [crate::QuarryBuilder] before the operator registry is sealed,
/// and contributes everything through the [PluginRegistrar] it is handed.
///
/// # Responsibilities
/// * **Operator Registration**: Register pipeline, expression and accumulator
///   operators under unique names
/// * **Codec Registration**: Register [crate::codec::SegmentResolver]s for
///   additional file formats or layouts
/// * **Configuration Lookup**: Read the module's own configuration document
///   through [PluginRegistrar::plugin_config]
///
/// A module never touches engine internals directly.
pub trait QuarryModule: Send + Sync {
    /// Name under which the module's configuration is registered.
    fn name(&self) -> &str;

    /// Registers the module's contributions.
    ///
    /// # Errors
    ///
    /// Any registration error, such as a duplicate operator, aborts loading
    /// and is surfaced by the builder.
    fn load(&self, registrar: &PluginRegistrar) -> QuarryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{OperatorImpl, OperatorKind};
    use crate::common::{PluginManager, Value};
    use crate::doc;
    use crate::errors::{ErrorKind, QuarryError};

    struct GreetingModule;

    impl QuarryModule for GreetingModule {
        fn name(&self) -> &str {
            "greeting"
        }

        fn load(&self, registrar: &PluginRegistrar) -> QuarryResult<()> {
            let greeting = registrar
                .plugin_config(self.name())
                .and_then(|config| config.get("word").cloned())
                .unwrap_or_else(|| Value::from("hello"));
            registrar.register_operator(
                "$greet",
                OperatorImpl::expression(move |_, _| Ok(Some(greeting.clone()))),
            )
        }
    }

    struct FailingModule;

    impl QuarryModule for FailingModule {
        fn name(&self) -> &str {
            "failing"
        }

        fn load(&self, _registrar: &PluginRegistrar) -> QuarryResult<()> {
            Err(QuarryError::new("Failed to load module", ErrorKind::InternalError))
        }
    }

    #[test]
    fn test_module_registers_operator() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(GreetingModule)).unwrap();
        assert!(manager.registry().contains("$greet", OperatorKind::Expression));
    }

    #[test]
    fn test_module_reads_its_config() {
        let manager = PluginManager::new();
        manager.set_plugin_config("greeting", doc! { word: "hej" });
        manager.load_module(Box::new(GreetingModule)).unwrap();
        let op = manager.registry().resolve_expression("$greet").unwrap();
        assert_eq!(op(vec![], &doc! {}).unwrap(), Some(Value::from("hej")));
    }

    #[test]
    fn test_module_error_is_propagated() {
        let manager = PluginManager::new();
        assert!(manager.load_module(Box::new(FailingModule)).is_err());
    }
}
