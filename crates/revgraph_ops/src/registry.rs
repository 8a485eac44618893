use crate::{
    binary::{Add, Matmul, Mul},
    list::{Select, Stack},
    unary::{Identity, Scale, Tanh},
};
use paste::paste;
use revgraph_graph::{Operation, OperationRegistry};

macro_rules! register_builtin {
    ($registry:expr, [$($name:ident),* $(,)?]) => {
        $(
            paste! {
                $registry.register(stringify!($name), |entry| {
                    Ok(Box::new([<$name:camel>]::from_entry(entry)?) as Box<dyn Operation>)
                });
            }
        )*
    };
}

/// A registry holding every reference operation under its type name.
pub fn builtin_registry() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    register_builtin!(registry, [identity, scale, add, mul, matmul, tanh, stack, select]);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use revgraph_core::error::{Error, Result};
    use revgraph_graph::OperationEntry;

    #[test]
    fn registers_every_builtin() -> Result<()> {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec!["add", "identity", "matmul", "mul", "scale", "select", "stack", "tanh"]
        );

        let op = registry.create(&OperationEntry::new("scale").attr("factor", 2.0))?;
        assert_eq!(op.op_type(), "scale");
        assert!(matches!(
            registry.create(&OperationEntry::new("softmax")),
            Err(Error::UnknownOperation(_))
        ));
        Ok(())
    }
}
