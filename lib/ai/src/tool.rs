//! Tool registry for the completion loop.
//!
//! Tools are external capabilities the model may call mid-generation
//! (place lookup, weather, flight status). The registry is built once at
//! startup and is read-only afterwards, so it can be shared across
//! concurrent requests behind an `Arc` without locking.

use crate::backend::ToolSpec;
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Arguments passed to a tool invocation.
pub type ToolArgs = Map<String, JsonValue>;

/// Trait for tool execution.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Executes the tool with the given arguments, returning its string result.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid or the upstream call fails.
    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError>;
}

/// A callable tool: name, parameter schema and invoker.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameter_schema: JsonValue,
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolDescriptor {
    /// Creates a new tool descriptor with an empty-object schema.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: serde_json::json!({ "type": "object", "properties": {} }),
            invoker,
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_parameter_schema(mut self, schema: JsonValue) -> Self {
        self.parameter_schema = schema;
        self
    }

    /// Invokes the tool.
    ///
    /// # Errors
    ///
    /// Propagates the invoker's error.
    pub async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        self.invoker.invoke(args).await
    }

    /// Returns the spec advertised to the backend.
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameter_schema", &self.parameter_schema)
            .finish_non_exhaustive()
    }
}

/// Builder collecting descriptors before the registry is frozen.
#[derive(Debug, Default)]
pub struct ToolRegistryBuilder {
    descriptors: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::DuplicateName` if the name is taken.
    pub fn register(mut self, descriptor: ToolDescriptor) -> Result<Self, ToolError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateName {
                name: descriptor.name,
            });
        }
        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            descriptors: self.descriptors,
            index: self.index,
        }
    }
}

/// Immutable registry of available tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Creates a registry with no tools.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Gets a tool by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Returns all registered tools in registration order.
    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.iter()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Converts descriptors to the specs sent to the backend.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.descriptors.iter().map(ToolDescriptor::spec).collect()
    }
}
