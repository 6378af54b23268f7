//! Output - Deferred values
//!
//! An `Output<T>` is a value that does not exist while a stack is being
//! declared. It records which resource attributes it is derived from and how
//! to compute itself once those attributes have been published into a
//! [`Resolution`]. Evaluating it earlier yields [`OutputError::Unresolved`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::resource::Value;

/// Reference to a single attribute of a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrRef {
    /// Binding of the referenced resource (e.g., "rds.instance.database")
    pub binding: String,
    /// Attribute name (e.g., "endpoint")
    pub attribute: String,
}

impl AttrRef {
    pub fn new(binding: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.binding, self.attribute)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    #[error("'{0}' is not known yet")]
    Unresolved(AttrRef),

    #[error("Attributes of '{0}' were already published")]
    AlreadyPublished(String),

    #[error("Invalid value for '{reference}': {message}")]
    Invalid { reference: String, message: String },
}

/// Single-assignment store of attributes published by provisioned resources
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    published: HashMap<String, HashMap<String, Value>>,
}

impl Resolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from already-known states, e.g. for planning
    pub fn snapshot<'a>(states: impl IntoIterator<Item = &'a crate::resource::State>) -> Self {
        let published = states
            .into_iter()
            .filter(|s| s.exists)
            .map(|s| (s.id.to_string(), s.published_attributes()))
            .collect();
        Self { published }
    }

    /// Publish the attributes of a binding. Each binding is published at most once.
    pub fn publish(
        &mut self,
        binding: impl Into<String>,
        attributes: HashMap<String, Value>,
    ) -> Result<(), OutputError> {
        let binding = binding.into();
        if self.published.contains_key(&binding) {
            return Err(OutputError::AlreadyPublished(binding));
        }
        self.published.insert(binding, attributes);
        Ok(())
    }

    pub fn is_published(&self, binding: &str) -> bool {
        self.published.contains_key(binding)
    }

    pub fn get(&self, reference: &AttrRef) -> Option<&Value> {
        self.published
            .get(&reference.binding)
            .and_then(|attrs| attrs.get(&reference.attribute))
    }

    /// Overwrite what is known about a binding. Only planning does this, to
    /// forget attributes a pending update will recompute.
    pub(crate) fn replace(&mut self, binding: impl Into<String>, attributes: HashMap<String, Value>) {
        self.published.insert(binding.into(), attributes);
    }
}

type Eval<T> = Arc<dyn Fn(&Resolution) -> Result<T, OutputError> + Send + Sync>;

/// A value computed from resource attributes once they are published
pub struct Output<T> {
    dependencies: BTreeSet<AttrRef>,
    secret: bool,
    eval: Eval<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            secret: self.secret,
            eval: Arc::clone(&self.eval),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("dependencies", &self.dependencies)
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

/// Two outputs are equal when they are the same derivation
impl<T> PartialEq for Output<T> {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
            && self.dependencies == other.dependencies
            && Arc::ptr_eq(&self.eval, &other.eval)
    }
}

impl<T: Clone + Send + Sync + 'static> Output<T> {
    /// An output whose value is already known
    pub fn known(value: T) -> Self {
        Self {
            dependencies: BTreeSet::new(),
            secret: false,
            eval: Arc::new(move |_| Ok(value.clone())),
        }
    }
}

impl<T: Send + Sync + 'static> Output<T> {
    pub fn dependencies(&self) -> &BTreeSet<AttrRef> {
        &self.dependencies
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// Mark the derived value as sensitive
    pub fn into_secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// True once every dependency has been published
    pub fn is_ready(&self, resolution: &Resolution) -> bool {
        self.dependencies.iter().all(|d| resolution.get(d).is_some())
    }

    pub fn resolve(&self, resolution: &Resolution) -> Result<T, OutputError> {
        if let Some(missing) = self
            .dependencies
            .iter()
            .find(|d| resolution.get(d).is_none())
        {
            return Err(OutputError::Unresolved(missing.clone()));
        }
        (self.eval)(resolution)
    }

    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let eval = Arc::clone(&self.eval);
        Output {
            dependencies: self.dependencies.clone(),
            secret: self.secret,
            eval: Arc::new(move |r| eval(r).map(&f)),
        }
    }

    pub fn try_map<U, F>(&self, f: F) -> Output<U>
    where
        F: Fn(T) -> Result<U, OutputError> + Send + Sync + 'static,
    {
        let eval = Arc::clone(&self.eval);
        Output {
            dependencies: self.dependencies.clone(),
            secret: self.secret,
            eval: Arc::new(move |r| eval(r).and_then(&f)),
        }
    }

    /// Combine two outputs; the result depends on both
    pub fn zip<U: Send + Sync + 'static>(&self, other: &Output<U>) -> Output<(T, U)> {
        let left = Arc::clone(&self.eval);
        let right = Arc::clone(&other.eval);
        Output {
            dependencies: self
                .dependencies
                .union(&other.dependencies)
                .cloned()
                .collect(),
            secret: self.secret || other.secret,
            eval: Arc::new(move |r| Ok((left(r)?, right(r)?))),
        }
    }

    /// Combine many outputs into one list
    pub fn all(outputs: &[Output<T>]) -> Output<Vec<T>> {
        let evals: Vec<_> = outputs.iter().map(|o| Arc::clone(&o.eval)).collect();
        Output {
            dependencies: outputs
                .iter()
                .flat_map(|o| o.dependencies.iter().cloned())
                .collect(),
            secret: outputs.iter().any(|o| o.secret),
            eval: Arc::new(move |r| evals.iter().map(|eval| eval(r)).collect()),
        }
    }
}

impl Output<Value> {
    /// Output tracking a single attribute of a declared resource
    pub fn reference(binding: impl Into<String>, attribute: impl Into<String>) -> Self {
        let reference = AttrRef::new(binding, attribute);
        let target = reference.clone();
        Self {
            dependencies: BTreeSet::from([reference]),
            secret: false,
            eval: Arc::new(move |r| {
                r.get(&target)
                    .cloned()
                    .ok_or_else(|| OutputError::Unresolved(target.clone()))
            }),
        }
    }

    /// Narrow to a string, failing on any other kind of value
    pub fn string(&self) -> Output<String> {
        let label = self
            .dependencies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.try_map(move |v| match v.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(OutputError::Invalid {
                reference: label.clone(),
                message: "expected a string".to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_endpoint(resolution: &mut Resolution, endpoint: &str) {
        resolution
            .publish(
                "rds.instance.database",
                HashMap::from([("endpoint".to_string(), Value::from(endpoint))]),
            )
            .unwrap();
    }

    #[test]
    fn known_output_has_no_dependencies() {
        let out = Output::known(42);
        assert!(out.dependencies().is_empty());
        assert_eq!(out.resolve(&Resolution::new()).unwrap(), 42);
    }

    #[test]
    fn reference_is_unresolved_before_publish() {
        let out = Output::reference("rds.instance.database", "endpoint").string();
        let resolution = Resolution::new();

        assert!(!out.is_ready(&resolution));
        assert_eq!(
            out.resolve(&resolution),
            Err(OutputError::Unresolved(AttrRef::new(
                "rds.instance.database",
                "endpoint"
            )))
        );
    }

    #[test]
    fn map_runs_after_publish() {
        let out = Output::reference("rds.instance.database", "endpoint")
            .string()
            .map(|host| format!("tcp://{}", host));

        let mut resolution = Resolution::new();
        publish_endpoint(&mut resolution, "db.local:5432");

        assert_eq!(out.resolve(&resolution).unwrap(), "tcp://db.local:5432");
        // Deriving again yields the same value
        assert_eq!(out.resolve(&resolution).unwrap(), "tcp://db.local:5432");
    }

    #[test]
    fn zip_unions_dependencies_and_secrecy() {
        let a = Output::reference("ec2.vpc.main", "id");
        let b = Output::known(Value::from("pw")).into_secret();
        let zipped = a.zip(&b);

        assert_eq!(zipped.dependencies().len(), 1);
        assert!(zipped.is_secret());
    }

    #[test]
    fn all_waits_for_every_input() {
        let outs = vec![
            Output::reference("a.x", "id"),
            Output::reference("b.y", "id"),
        ];
        let combined = Output::all(&outs);

        let mut resolution = Resolution::new();
        resolution
            .publish("a.x", HashMap::from([("id".to_string(), Value::from("1"))]))
            .unwrap();
        assert!(combined.resolve(&resolution).is_err());

        resolution
            .publish("b.y", HashMap::from([("id".to_string(), Value::from("2"))]))
            .unwrap();
        assert_eq!(
            combined.resolve(&resolution).unwrap(),
            vec![Value::from("1"), Value::from("2")]
        );
    }

    #[test]
    fn bindings_are_published_once() {
        let mut resolution = Resolution::new();
        publish_endpoint(&mut resolution, "a:1");
        let again = resolution.publish("rds.instance.database", HashMap::new());
        assert!(matches!(again, Err(OutputError::AlreadyPublished(_))));
    }

    #[test]
    fn string_rejects_non_string_values() {
        let out = Output::reference("a.x", "count").string();
        let mut resolution = Resolution::new();
        resolution
            .publish("a.x", HashMap::from([("count".to_string(), Value::Int(3))]))
            .unwrap();
        assert!(matches!(
            out.resolve(&resolution),
            Err(OutputError::Invalid { .. })
        ));
    }
}
