//! Resource - Representing resources and their state

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::output::{AttrRef, Output, OutputError, Resolution};

/// Key used to mark secret values when converting to JSON
const SECRET_MARKER: &str = "@secret";

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "s3.bucket", "rds.instance")
    pub resource_type: String,
    /// Logical resource name
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// JSON that has no attribute value counterpart
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JsonValueError {
    #[error("null is not an attribute value")]
    Null,

    #[error("{0} is not a 64-bit integer")]
    Number(serde_json::Number),
}

/// Attribute value of a resource
#[derive(Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's attribute (binding, attribute_name)
    ResourceRef(String, String),
    /// Value derived from other resources' attributes, known only after they are provisioned
    Deferred(Output<Value>),
    /// Sensitive value; never printed in plans or logs
    Secret(Box<Value>),
}

impl Value {
    /// Borrow the string content, looking through secrets
    pub fn as_str(&self) -> Option<&str> {
        match self.expose() {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Strip any secret wrappers
    pub fn expose(&self) -> &Value {
        match self {
            Value::Secret(inner) => inner.expose(),
            other => other,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Value::Secret(_))
    }

    /// Returns true if this value contains no references or deferred values
    pub fn is_resolved(&self) -> bool {
        match self {
            Value::ResourceRef(..) | Value::Deferred(_) => false,
            Value::List(items) => items.iter().all(Value::is_resolved),
            Value::Map(map) => map.values().all(Value::is_resolved),
            Value::Secret(inner) => inner.is_resolved(),
            _ => true,
        }
    }

    /// Collect every attribute reference this value depends on
    pub fn collect_references(&self, refs: &mut BTreeSet<AttrRef>) {
        match self {
            Value::ResourceRef(binding, attribute) => {
                refs.insert(AttrRef::new(binding.clone(), attribute.clone()));
            }
            Value::Deferred(output) => refs.extend(output.dependencies().iter().cloned()),
            Value::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_references(refs);
                }
            }
            Value::Secret(inner) => inner.collect_references(refs),
            _ => {}
        }
    }

    /// Resolve all references and deferred values against published attributes
    pub fn resolve(&self, resolution: &Resolution) -> Result<Value, OutputError> {
        match self {
            Value::ResourceRef(binding, attribute) => {
                let r = AttrRef::new(binding.clone(), attribute.clone());
                resolution
                    .get(&r)
                    .cloned()
                    .ok_or(OutputError::Unresolved(r))
            }
            Value::Deferred(output) => {
                let value = output.resolve(resolution)?;
                if output.is_secret() && !value.is_secret() {
                    Ok(Value::Secret(Box::new(value)))
                } else {
                    Ok(value)
                }
            }
            Value::List(items) => items
                .iter()
                .map(|v| v.resolve(resolution))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(resolution).map(|v| (k.clone(), v)))
                .collect::<Result<HashMap<_, _>, _>>()
                .map(Value::Map),
            Value::Secret(inner) => Ok(Value::Secret(Box::new(inner.resolve(resolution)?))),
            _ => Ok(self.clone()),
        }
    }

    /// Resolve what can be resolved, leaving the rest untouched
    pub fn resolve_partial(&self, resolution: &Resolution) -> Value {
        match self {
            Value::ResourceRef(..) | Value::Deferred(_) => {
                self.resolve(resolution).unwrap_or_else(|_| self.clone())
            }
            Value::List(items) => {
                Value::List(items.iter().map(|v| v.resolve_partial(resolution)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve_partial(resolution)))
                    .collect(),
            ),
            Value::Secret(inner) => Value::Secret(Box::new(inner.resolve_partial(resolution))),
            _ => self.clone(),
        }
    }

    /// Convert to JSON for persistence. Secrets are wrapped in a marker object.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                let obj: serde_json::Map<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                serde_json::Value::Object(obj)
            }
            Value::Secret(inner) => {
                let mut obj = serde_json::Map::new();
                obj.insert(SECRET_MARKER.to_string(), inner.to_json());
                serde_json::Value::Object(obj)
            }
            // References should be resolved before reaching here
            Value::ResourceRef(binding, attr) => {
                serde_json::Value::String(format!("${{{}.{}}}", binding, attr))
            }
            Value::Deferred(_) => serde_json::Value::Null,
        }
    }

    /// Read back a value written by [`Value::to_json`]
    pub fn from_json(json: &serde_json::Value) -> Result<Value, JsonValueError> {
        let value = match json {
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                Value::Int(n.as_i64().ok_or_else(|| JsonValueError::Number(n.clone()))?)
            }
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                if map.len() == 1
                    && let Some(inner) = map.get(SECRET_MARKER)
                {
                    return Ok(Value::Secret(Box::new(Value::from_json(inner)?)));
                }
                Value::Map(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                        .collect::<Result<_, JsonValueError>>()?,
                )
            }
            serde_json::Value::Null => return Err(JsonValueError::Null),
        };
        Ok(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::ResourceRef(binding, attribute) => f
                .debug_tuple("ResourceRef")
                .field(binding)
                .field(attribute)
                .finish(),
            Value::Deferred(output) => f.debug_tuple("Deferred").field(output).finish(),
            Value::Secret(_) => f.write_str("Secret([secret])"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Output<Value>> for Value {
    fn from(output: Output<Value>) -> Self {
        Value::Deferred(output)
    }
}

impl From<Output<String>> for Value {
    fn from(output: Output<String>) -> Self {
        Value::Deferred(output.map(Value::String))
    }
}

/// Desired state declared by a stack
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Name other resources use to reference this one
    pub fn binding(&self) -> String {
        self.id.to_string()
    }

    /// Attribute references used by this resource, paired with the attribute they feed
    pub fn references(&self) -> Vec<(AttrRef, String)> {
        let mut keys: Vec<_> = self.attributes.keys().collect();
        keys.sort();

        let mut refs = Vec::new();
        for key in keys {
            let mut found = BTreeSet::new();
            self.attributes[key].collect_references(&mut found);
            refs.extend(found.into_iter().map(|r| (r, key.clone())));
        }
        refs
    }

    /// Bindings of the resources this one depends on
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references()
            .into_iter()
            .map(|(r, _)| r.binding)
            .collect()
    }

    /// Resolve every attribute, failing if a dependency is not yet published
    pub fn resolve(&self, resolution: &Resolution) -> Result<Resource, OutputError> {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| v.resolve(resolution).map(|v| (k.clone(), v)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Resource {
            id: self.id.clone(),
            attributes,
        })
    }

    pub fn resolve_partial(&self, resolution: &Resolution) -> Resource {
        Resource {
            id: self.id.clone(),
            attributes: self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.resolve_partial(resolution)))
                .collect(),
        }
    }
}

/// Current state reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Provider-assigned identifier (e.g., vpc-xxx, sg-xxx)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Attributes visible to dependents: reported attributes plus `id`
    pub fn published_attributes(&self) -> HashMap<String, Value> {
        let mut attrs = self.attributes.clone();
        if let Some(identifier) = &self.identifier {
            attrs
                .entry("id".to_string())
                .or_insert_with(|| Value::String(identifier.clone()));
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_include_refs_and_deferred() {
        let derived = Output::reference("rds.instance.db", "endpoint").map(|v| v);
        let resource = Resource::new("eb.environment", "env")
            .with_attribute("vpc", Value::ResourceRef("ec2.vpc.main".into(), "id".into()))
            .with_attribute(
                "settings",
                Value::List(vec![Value::Map(HashMap::from([(
                    "value".to_string(),
                    Value::Deferred(derived),
                )]))]),
            );

        let deps = resource.dependencies();
        assert!(deps.contains("ec2.vpc.main"));
        assert!(deps.contains("rds.instance.db"));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn resolve_fails_until_published() {
        let resource = Resource::new("ec2.security_group", "sg")
            .with_attribute("vpc_id", Value::ResourceRef("ec2.vpc.main".into(), "id".into()));

        let mut resolution = Resolution::new();
        assert!(matches!(
            resource.resolve(&resolution),
            Err(OutputError::Unresolved(_))
        ));

        resolution
            .publish(
                "ec2.vpc.main",
                HashMap::from([("id".to_string(), Value::from("vpc-123"))]),
            )
            .unwrap();
        let resolved = resource.resolve(&resolution).unwrap();
        assert_eq!(resolved.attributes["vpc_id"], Value::from("vpc-123"));
    }

    #[test]
    fn partial_resolution_keeps_unknowns() {
        let value = Value::List(vec![
            Value::ResourceRef("a.b".into(), "id".into()),
            Value::ResourceRef("c.d".into(), "id".into()),
        ]);
        let mut resolution = Resolution::new();
        resolution
            .publish("a.b", HashMap::from([("id".to_string(), Value::from("x"))]))
            .unwrap();

        let partial = value.resolve_partial(&resolution);
        assert!(!partial.is_resolved());
        match partial {
            Value::List(items) => assert_eq!(items[0], Value::from("x")),
            _ => panic!("Expected List"),
        }
    }

    #[test]
    fn secret_json_marker_survives_round_trip() {
        let value = Value::Secret(Box::new(Value::from("hunter2")));
        let json = value.to_json();
        assert_eq!(json, serde_json::json!({ "@secret": "hunter2" }));
        assert_eq!(Value::from_json(&json), Ok(value));
    }

    #[test]
    fn json_without_attribute_counterpart_is_rejected() {
        assert_eq!(
            Value::from_json(&serde_json::json!({ "size": null })),
            Err(JsonValueError::Null)
        );
        assert!(matches!(
            Value::from_json(&serde_json::json!([1, 2.5])),
            Err(JsonValueError::Number(_))
        ));
        assert!(matches!(
            Value::from_json(&serde_json::json!(u64::MAX)),
            Err(JsonValueError::Number(_))
        ));
        assert_eq!(
            Value::from_json(&serde_json::json!(-7)),
            Ok(Value::Int(-7))
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let resource = Resource::new("rds.instance", "database")
            .with_attribute("username", "admin")
            .with_attribute("password", Value::Secret(Box::new(Value::from("hunter2"))));
        let state = State::existing(resource.id.clone(), resource.attributes.clone());

        for printed in [format!("{:?}", resource), format!("{:?}", state)] {
            assert!(!printed.contains("hunter2"), "{}", printed);
            assert!(printed.contains("Secret([secret])"));
            assert!(printed.contains("admin"));
        }
        assert_eq!(
            format!("{:?}", Value::Secret(Box::new(Value::from("hunter2")))),
            "Secret([secret])"
        );
    }

    #[test]
    fn published_attributes_include_identifier() {
        let state = State::existing(ResourceId::new("s3.bucket", "b"), HashMap::new())
            .with_identifier("b-123");
        assert_eq!(state.published_attributes()["id"], Value::from("b-123"));
    }
}
