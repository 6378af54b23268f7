//! Role and instance profile schema definitions

use trellis_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// Returns the schema for roles
pub fn role_schema() -> ResourceSchema {
    ResourceSchema::new("iam.role")
        .with_description("An identity assumable by a service")
        .attribute(AttributeSchema::new("name", types::name()).required())
        .attribute(
            AttributeSchema::new("assume_role_policy", AttributeType::String)
                .required()
                .with_description("Trust policy document as JSON"),
        )
}

/// Returns the schema for instance profiles
pub fn instance_profile_schema() -> ResourceSchema {
    ResourceSchema::new("iam.instance_profile")
        .with_description("Container passing a role to compute instances")
        .attribute(AttributeSchema::new("name", types::name()).required())
        .attribute(
            AttributeSchema::new("role", AttributeType::String)
                .required()
                .with_description("Name of the wrapped role"),
        )
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![role_schema(), instance_profile_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::resource::Value;

    #[test]
    fn role_needs_policy() {
        let attrs = HashMap::from([("name".to_string(), Value::from("eb-ec2-role"))]);
        assert!(role_schema().validate(&attrs).is_err());
    }

    #[test]
    fn profile_accepts_role_reference() {
        let attrs = HashMap::from([
            ("name".to_string(), Value::from("eb-ec2-instance-profile")),
            (
                "role".to_string(),
                Value::ResourceRef("iam.role.eb-ec2-role".into(), "name".into()),
            ),
        ]);
        assert!(instance_profile_schema().validate(&attrs).is_ok());
    }
}
