//! Database subnet group and instance schema definitions

use trellis_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// Returns the schema for DB subnet groups
pub fn subnet_group_schema() -> ResourceSchema {
    ResourceSchema::new("rds.subnet_group")
        .with_description("Subnets a database instance may be placed in")
        .attribute(
            AttributeSchema::new("name", types::name())
                .with_description("Group name (defaults to resource name)"),
        )
        .attribute(
            AttributeSchema::new("subnet_ids", AttributeType::List(Box::new(AttributeType::String)))
                .required()
                .with_description("Private subnets of a single VPC"),
        )
}

/// Returns the schema for database instances
pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::new("rds.instance")
        .with_description("A managed relational database instance")
        .attribute(
            AttributeSchema::new(
                "engine",
                AttributeType::Enum(vec!["postgres".to_string(), "mysql".to_string()]),
            )
            .required(),
        )
        .attribute(AttributeSchema::new("instance_class", types::name()).required())
        .attribute(
            AttributeSchema::new("allocated_storage", types::positive_int())
                .required()
                .with_description("Storage in GiB"),
        )
        .attribute(AttributeSchema::new("db_subnet_group_name", AttributeType::String).required())
        .attribute(AttributeSchema::new(
            "vpc_security_group_ids",
            AttributeType::List(Box::new(AttributeType::String)),
        ))
        .attribute(AttributeSchema::new("db_name", types::name()).required())
        .attribute(AttributeSchema::new("username", types::name()).required())
        .attribute(AttributeSchema::new("password", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("skip_final_snapshot", AttributeType::Bool)
                .with_default(trellis_core::resource::Value::Bool(false)),
        )
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![subnet_group_schema(), instance_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::resource::Value;

    fn instance_attrs() -> HashMap<String, Value> {
        HashMap::from([
            ("engine".to_string(), Value::from("postgres")),
            ("instance_class".to_string(), Value::from("db.t3.micro")),
            ("allocated_storage".to_string(), Value::Int(5)),
            (
                "db_subnet_group_name".to_string(),
                Value::ResourceRef("rds.subnet_group.dbsubnets".into(), "name".into()),
            ),
            ("db_name".to_string(), Value::from("miniflux")),
            ("username".to_string(), Value::from("admin")),
            (
                "password".to_string(),
                Value::Secret(Box::new(Value::from("secret"))),
            ),
        ])
    }

    #[test]
    fn valid_instance() {
        assert!(instance_schema().validate(&instance_attrs()).is_ok());
    }

    #[test]
    fn unknown_engine() {
        let mut attrs = instance_attrs();
        attrs.insert("engine".to_string(), Value::from("oracle"));
        assert!(instance_schema().validate(&attrs).is_err());
    }

    #[test]
    fn storage_must_be_positive() {
        let mut attrs = instance_attrs();
        attrs.insert("allocated_storage".to_string(), Value::Int(0));
        assert!(instance_schema().validate(&attrs).is_err());
    }

    #[test]
    fn subnet_group_needs_subnets() {
        assert!(subnet_group_schema().validate(&HashMap::new()).is_err());
    }
}
