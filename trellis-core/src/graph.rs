//! Graph - Dependency analysis between declared resources
//!
//! Nodes are resource bindings; an edge `a -> b` means `a` references an
//! attribute of `b` and must not be provisioned before `b`.

use std::collections::{HashMap, HashSet};

use crate::resource::Resource;

/// Dependency between resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Target resource binding
    pub target: String,
    /// Referenced attribute (e.g., "id")
    pub attribute: String,
    /// Where this reference is used (e.g., "vpc_id")
    pub used_in: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Dependency cycle between: {}", involved.join(", "))]
    Cycle { involved: Vec<String> },

    #[error("'{from}' depends on unknown resource '{target}'")]
    MissingNode { from: String, target: String },
}

/// Dependency graph over resource bindings
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Bindings in declaration order
    nodes: Vec<String>,
    /// Resource binding -> list of dependencies
    pub edges: HashMap<String, Vec<Dependency>>,
    /// Reverse edges: target -> list of resources that depend on it
    pub reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from declared resources
    pub fn from_resources(resources: &[Resource]) -> Self {
        let mut graph = Self::new();
        for resource in resources {
            graph.add_node(resource.binding());
        }
        for resource in resources {
            let from = resource.binding();
            for (reference, used_in) in resource.references() {
                graph.add_edge(
                    from.clone(),
                    Dependency {
                        target: reference.binding,
                        attribute: reference.attribute,
                        used_in,
                    },
                );
            }
        }
        graph
    }

    pub fn add_node(&mut self, binding: impl Into<String>) {
        let binding = binding.into();
        if !self.nodes.contains(&binding) {
            self.nodes.push(binding);
        }
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, from: String, dependency: Dependency) {
        let target = dependency.target.clone();
        self.edges.entry(from.clone()).or_default().push(dependency);
        let dependents = self.reverse_edges.entry(target).or_default();
        if !dependents.contains(&from) {
            dependents.push(from);
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, resource: &str) -> &[Dependency] {
        self.edges.get(resource).map_or(&[], |v| v.as_slice())
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, resource: &str) -> &[String] {
        self.reverse_edges
            .get(resource)
            .map_or(&[], |v| v.as_slice())
    }

    /// Distinct bindings a resource depends on
    fn targets_of(&self, resource: &str) -> HashSet<&str> {
        self.dependencies_of(resource)
            .iter()
            .map(|d| d.target.as_str())
            .collect()
    }

    fn check_targets(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dep in self.dependencies_of(node) {
                if !self.nodes.contains(&dep.target) {
                    return Err(GraphError::MissingNode {
                        from: node.clone(),
                        target: dep.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Group nodes into layers; every node depends only on nodes in earlier layers.
    /// Nodes within a layer may be provisioned concurrently.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        self.check_targets()?;

        let mut remaining: Vec<&String> = self.nodes.iter().collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&String>, Vec<&String>) = remaining
                .into_iter()
                .partition(|n| self.targets_of(n).iter().all(|t| placed.contains(t)));

            if ready.is_empty() {
                return Err(GraphError::Cycle {
                    involved: blocked.into_iter().cloned().collect(),
                });
            }

            placed.extend(ready.iter().map(|n| n.as_str()));
            layers.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }

        Ok(layers)
    }

    /// Order nodes so that every node comes after its dependencies.
    /// Ties keep declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;

    fn dep(target: &str) -> Dependency {
        Dependency {
            target: target.to_string(),
            attribute: "id".to_string(),
            used_in: "x".to_string(),
        }
    }

    #[test]
    fn from_resources_records_edges() {
        let resources = vec![
            Resource::new("ec2.vpc", "main"),
            Resource::new("ec2.security_group", "sg")
                .with_attribute("vpc_id", Value::ResourceRef("ec2.vpc.main".into(), "id".into())),
        ];
        let graph = DependencyGraph::from_resources(&resources);

        let deps = graph.dependencies_of("ec2.security_group.sg");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].target, "ec2.vpc.main");
        assert_eq!(deps[0].used_in, "vpc_id");
        assert_eq!(
            graph.dependents_of("ec2.vpc.main"),
            &["ec2.security_group.sg".to_string()]
        );
    }

    #[test]
    fn layers_group_independent_nodes() {
        let mut graph = DependencyGraph::new();
        for n in ["vpc", "bucket", "sg", "db"] {
            graph.add_node(n);
        }
        graph.add_edge("sg".into(), dep("vpc"));
        graph.add_edge("db".into(), dep("sg"));
        graph.add_edge("db".into(), dep("vpc"));

        let layers = graph.layers().unwrap();
        assert_eq!(layers[0], vec!["vpc".to_string(), "bucket".to_string()]);
        assert_eq!(layers[1], vec!["sg".to_string()]);
        assert_eq!(layers[2], vec!["db".to_string()]);
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut graph = DependencyGraph::new();
        // Declared out of order on purpose
        graph.add_node("env");
        graph.add_node("app");
        graph.add_edge("env".into(), dep("app"));

        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["app".to_string(), "env".to_string()]
        );
    }

    #[test]
    fn cycle_is_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("b");
        graph.add_edge("a".into(), dep("b"));
        graph.add_edge("b".into(), dep("a"));

        assert!(matches!(graph.layers(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn missing_target_is_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_edge("a".into(), dep("ghost"));

        assert_eq!(
            graph.layers(),
            Err(GraphError::MissingNode {
                from: "a".to_string(),
                target: "ghost".to_string()
            })
        );
    }
}
