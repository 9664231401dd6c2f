use crate::codec::operators::register_codec_operators;
use crate::codec::{BuiltinResolver, SegmentResolver};
use crate::common::{PluginRegistrar, QuarryModule};
use crate::errors::QuarryResult;

/// The codec expressions and the built-in formats and layouts.
///
/// Always loaded by [crate::QuarryBuilder] right after the core operators.
pub struct CodecOperators;

impl QuarryModule for CodecOperators {
    fn name(&self) -> &str {
        "codec"
    }

    fn load(&self, registrar: &PluginRegistrar) -> QuarryResult<()> {
        register_codec_operators(&registrar.registry())?;
        registrar.register_segment_resolver(SegmentResolver::new(BuiltinResolver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::OperatorKind;
    use crate::common::PluginManager;

    #[test]
    fn test_registers_codec_expressions() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(CodecOperators)).unwrap();
        let registry = manager.registry();
        for name in ["$jsonToObject", "$objectToJson", "$yamlToObject", "$objectToYaml"] {
            assert!(registry.contains(name, OperatorKind::Expression), "{}", name);
        }
    }
}
