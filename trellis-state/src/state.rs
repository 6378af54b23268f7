//! State file structures for persisting infrastructure state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use trellis_core::graph::{Dependency, DependencyGraph};
use trellis_core::resource::{JsonValueError, ResourceId, State, Value};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Trellis that last modified this state
    pub trellis_version: String,
    /// All managed resources and their current state
    pub resources: Vec<ResourceState>,
    /// Stack outputs from the last successful apply
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage (for initialization)
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            trellis_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Increment serial and update trellis version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.trellis_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add or update a resource in the state
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    /// Remove a resource from the state
    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// Graph over recorded resources, built from their recorded dependencies
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for resource in &self.resources {
            graph.add_node(resource.binding());
        }
        for resource in &self.resources {
            for target in &resource.dependencies {
                // Dependencies on resources that are gone no longer constrain order
                if self.resources.iter().any(|r| &r.binding() == target) {
                    graph.add_edge(
                        resource.binding(),
                        Dependency {
                            target: target.clone(),
                            attribute: "id".to_string(),
                            used_in: String::new(),
                        },
                    );
                }
            }
        }
        graph
    }

    /// Recorded resources ordered so that dependents come before what they depend on
    pub fn destroy_order(&self) -> Vec<&ResourceState> {
        let order = match self.dependency_graph().topological_order() {
            Ok(order) => order,
            Err(e) => {
                log::warn!("{}; falling back to reverse record order", e);
                self.resources.iter().map(ResourceState::binding).collect()
            }
        };
        order
            .iter()
            .rev()
            .filter_map(|binding| self.resources.iter().find(|r| &r.binding() == binding))
            .collect()
    }

    /// Recorded resources that are not declared anymore, in destroy order
    pub fn orphans(&self, declared: &[ResourceId]) -> Result<Vec<State>, JsonValueError> {
        self.destroy_order()
            .into_iter()
            .filter(|r| !declared.contains(&r.id()))
            .map(ResourceState::to_state)
            .collect()
    }

    /// Replace the recorded outputs
    pub fn set_outputs(&mut self, outputs: &BTreeMap<String, Value>) {
        self.outputs = outputs
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
    }

    pub fn output(&self, name: &str) -> Result<Option<Value>, JsonValueError> {
        self.outputs.get(name).map(Value::from_json).transpose()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "s3.bucket", "ec2.vpc")
    pub resource_type: String,
    /// Logical resource name
    pub name: String,
    /// Provider name (e.g., "local")
    pub provider: String,
    /// Provider-assigned identifier
    #[serde(default)]
    pub identifier: Option<String>,
    /// All attributes of the resource as JSON values
    pub attributes: HashMap<String, serde_json::Value>,
    /// Bindings of the resources this one depended on when it was applied
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            identifier: None,
            attributes: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Record an engine state
    pub fn from_state(
        state: &State,
        provider: impl Into<String>,
        dependencies: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            provider: provider.into(),
            identifier: state.identifier.clone(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            dependencies: dependencies.into_iter().collect(),
        }
    }

    pub fn to_state(&self) -> Result<State, JsonValueError> {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
            .collect::<Result<_, JsonValueError>>()?;
        let state = State::existing(self.id(), attributes);
        Ok(match &self.identifier {
            Some(identifier) => state.with_identifier(identifier.clone()),
            None => state,
        })
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.resource_type.clone(), self.name.clone())
    }

    pub fn binding(&self) -> String {
        self.id().to_string()
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, binding: impl Into<String>) -> Self {
        self.dependencies.push(binding.into());
        self
    }
}
