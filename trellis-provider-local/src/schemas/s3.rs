//! Bucket and object schema definitions

use trellis_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// Bucket names: 3-63 lowercase letters, digits, dots and hyphens
pub fn bucket_name() -> AttributeType {
    AttributeType::Custom {
        name: "BucketName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value.as_str() {
            Some(s) if !(3..=63).contains(&s.len()) => {
                Err(format!("Bucket name '{}' must be 3-63 characters", s))
            }
            Some(s)
                if !s
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') =>
            {
                Err(format!(
                    "Bucket name '{}' may only contain lowercase letters, digits, '.' and '-'",
                    s
                ))
            }
            Some(_) => Ok(()),
            None => Err("Expected string".to_string()),
        },
    }
}

/// Returns the schema for buckets
pub fn bucket_schema() -> ResourceSchema {
    ResourceSchema::new("s3.bucket")
        .with_description("A bucket for object storage")
        .attribute(
            AttributeSchema::new("bucket", bucket_name())
                .with_description("Bucket name (defaults to resource name)"),
        )
}

/// Returns the schema for bucket objects
pub fn bucket_object_schema() -> ResourceSchema {
    ResourceSchema::new("s3.bucket_object")
        .with_description("An object uploaded from a local file")
        .attribute(AttributeSchema::new("bucket", AttributeType::String).required())
        .attribute(AttributeSchema::new("key", types::name()).required())
        .attribute(
            AttributeSchema::new("source", types::name())
                .required()
                .with_description("Path of the local file to upload"),
        )
        .attribute(
            AttributeSchema::new("source_hash", AttributeType::String)
                .with_description("sha256 of the source; a change triggers a new upload"),
        )
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![bucket_schema(), bucket_object_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::resource::Value;

    #[test]
    fn bucket_names() {
        let schema = bucket_schema();
        let attrs = |name: &str| HashMap::from([("bucket".to_string(), Value::from(name))]);

        assert!(schema.validate(&attrs("web-app-deploy")).is_ok());
        assert!(schema.validate(&attrs("ab")).is_err());
        assert!(schema.validate(&attrs("Web_App")).is_err());
        // Name is optional
        assert!(schema.validate(&HashMap::new()).is_ok());
    }

    #[test]
    fn object_requires_bucket_key_and_source() {
        let schema = bucket_object_schema();
        let errors = schema.validate(&HashMap::new()).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
