//! Effect - A single side effect against a provider, as a value
//!
//! Effects describe what should happen; nothing happens until an
//! [`Interpreter`](crate::interpreter::Interpreter) runs them.

use std::collections::BTreeSet;
use std::fmt;

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource that does not exist yet
    Create(Resource),
    /// Update an existing resource to match its declaration
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
    },
    /// Delete a resource that is no longer declared
    Delete { id: ResourceId, identifier: String },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } => id,
            Effect::Delete { id, .. } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Effect::Delete { .. })
    }

    /// Bindings that must be published before this effect can run
    pub fn dependencies(&self) -> BTreeSet<String> {
        match self {
            Effect::Create(r) => r.dependencies(),
            Effect::Update { to, .. } => to.dependencies(),
            Effect::Delete { .. } => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Create(r) => write!(f, "+ {}", r.id),
            Effect::Update { id, .. } => write!(f, "~ {}", id),
            Effect::Delete { id, .. } => write!(f, "- {}", id),
        }
    }
}
