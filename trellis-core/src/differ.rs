//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the resources declared by a stack with the states reported by the
//! provider, and generates the Effects required to converge them. References
//! are resolved against the current states where possible; anything still
//! unknown at plan time counts as a change.

use std::collections::HashMap;

use crate::effect::Effect;
use crate::output::Resolution;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes);

    if changed.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        if !desired_value.is_resolved() {
            changed.push(key.clone());
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

/// Compute Diff for resources in dependency order and generate a Plan.
///
/// The effects carry the declared resources, not the partially resolved
/// copies used for comparison; they are resolved again when applied.
///
/// `desired` must be in dependency order. Once a resource is planned for
/// update, only its declared attributes and identifier stay known, so
/// anything reading a computed attribute of it is planned for update too.
pub fn create_plan(desired: &[Resource], current_states: &HashMap<ResourceId, State>) -> Plan {
    let mut snapshot = Resolution::snapshot(current_states.values());
    let mut plan = Plan::new();

    for resource in desired {
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        match diff(&resource.resolve_partial(&snapshot), &current) {
            Diff::Create(_) => plan.add(Effect::Create(resource.clone())),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => {
                log::debug!("{} changed: {}", id, changed_attributes.join(", "));
                snapshot.replace(id.to_string(), pending_attributes(&to, &from));
                plan.add(Effect::Update {
                    id,
                    from,
                    to: resource.clone(),
                });
            }
            Diff::NoChange(id) => log::debug!("{} unchanged", id),
        }
    }

    plan
}

/// Attributes of a resource that stay known while its update is pending
fn pending_attributes(resolved: &Resource, current: &State) -> HashMap<String, Value> {
    let mut attributes: HashMap<String, Value> = resolved
        .attributes
        .iter()
        .filter(|(_, value)| value.is_resolved())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(identifier) = &current.identifier {
        attributes.insert("id".to_string(), Value::String(identifier.clone()));
    }
    attributes
}

/// Delete effects for recorded resources that are no longer declared.
/// `orphans` must already be ordered dependents first.
pub fn plan_deletions(orphans: &[State]) -> Plan {
    let mut plan = Plan::new();
    for state in orphans {
        match &state.identifier {
            Some(identifier) => plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
            }),
            None => log::warn!("{} has no identifier, nothing to delete", state.id),
        }
    }
    plan
}

/// Attributes of resources the plan leaves alone, published up front so that
/// effects depending on them can be resolved during apply
pub fn baseline(plan: &Plan, current_states: &HashMap<ResourceId, State>) -> Resolution {
    Resolution::snapshot(
        current_states
            .values()
            .filter(|state| !plan.touches(&state.id)),
    )
}
