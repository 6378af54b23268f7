//! Stack - Declaring resources and exported outputs
//!
//! A stack is built in one synchronous pass. Every reference must point at a
//! resource declared earlier, so the declaration order alone forms a valid
//! dependency order; the engine still derives the real order from the graph.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::graph::{DependencyGraph, GraphError};
use crate::output::{Output, OutputError, Resolution};
use crate::resource::{Resource, ResourceId, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("Resource '{0}' is declared more than once")]
    Duplicate(String),

    #[error("'{from}' references '{reference}', which has not been declared")]
    UnknownReference { from: String, reference: String },

    #[error("Output '{0}' is exported more than once")]
    DuplicateOutput(String),
}

/// Handle to a declared resource, used to wire its attributes into others
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    id: ResourceId,
}

impl ResourceHandle {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn binding(&self) -> String {
        self.id.to_string()
    }

    /// Direct reference to one of this resource's attributes
    pub fn reference(&self, attribute: &str) -> Value {
        Value::ResourceRef(self.binding(), attribute.to_string())
    }

    /// Deferred value of one of this resource's attributes
    pub fn output(&self, attribute: &str) -> Output<Value> {
        Output::reference(self.binding(), attribute)
    }
}

/// Declared resources and exported outputs of one stack
#[derive(Debug, Clone)]
pub struct Stack {
    project: String,
    name: String,
    resources: Vec<Resource>,
    bindings: HashSet<String>,
    outputs: BTreeMap<String, Value>,
}

impl Stack {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            resources: Vec::new(),
            bindings: HashSet::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a resource. All of its references must target declared resources.
    pub fn declare(&mut self, resource: Resource) -> Result<ResourceHandle, DeclarationError> {
        let binding = resource.binding();
        if self.bindings.contains(&binding) {
            return Err(DeclarationError::Duplicate(binding));
        }

        self.check_references(&binding, resource.attributes.values())?;

        log::debug!("declared {}", binding);
        self.bindings.insert(binding);
        let handle = ResourceHandle {
            id: resource.id.clone(),
        };
        self.resources.push(resource);
        Ok(handle)
    }

    /// Export a value as a stack output
    pub fn export(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), DeclarationError> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(DeclarationError::DuplicateOutput(name));
        }
        let value = value.into();
        self.check_references(&format!("output {}", name), std::iter::once(&value))?;
        self.outputs.insert(name, value);
        Ok(())
    }

    fn check_references<'a>(
        &self,
        from: &str,
        values: impl Iterator<Item = &'a Value>,
    ) -> Result<(), DeclarationError> {
        let mut refs = BTreeSet::new();
        for value in values {
            value.collect_references(&mut refs);
        }
        match refs.iter().find(|r| !self.bindings.contains(&r.binding)) {
            Some(missing) => Err(DeclarationError::UnknownReference {
                from: from.to_string(),
                reference: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::from_resources(&self.resources)
    }

    /// Resources ordered so that dependencies come first
    pub fn sorted_resources(&self) -> Result<Vec<Resource>, GraphError> {
        let order = self.graph().topological_order()?;
        Ok(order
            .iter()
            .filter_map(|binding| self.resources.iter().find(|r| &r.binding() == binding))
            .cloned()
            .collect())
    }

    /// Resolve every exported output
    pub fn resolve_outputs(
        &self,
        resolution: &Resolution,
    ) -> Result<BTreeMap<String, Value>, OutputError> {
        self.outputs
            .iter()
            .map(|(name, value)| value.resolve(resolution).map(|v| (name.clone(), v)))
            .collect()
    }
}
