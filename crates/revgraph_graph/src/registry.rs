use crate::{description::OperationEntry, operation::Operation};
use revgraph_core::error::{Error, Result};
use std::{collections::HashMap, sync::Arc};

pub type OperationFactory = Arc<dyn Fn(&OperationEntry) -> Result<Box<dyn Operation>> + Send + Sync>;

/// Maps operation type names to constructors.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&OperationEntry) -> Result<Box<dyn Operation>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, entry: &OperationEntry) -> Result<Box<dyn Operation>> {
        let factory = self
            .factories
            .get(&entry.op_type)
            .ok_or_else(|| Error::UnknownOperation(entry.op_type.clone()))?;
        factory(entry)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry").field("names", &self.names()).finish()
    }
}
