//! Application, application version and environment schema definitions

use trellis_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// One `(namespace, name, value)` option of an environment
pub fn setting_type() -> AttributeType {
    types::structure(
        "Setting",
        vec![
            AttributeSchema::new("namespace", types::name()).required(),
            AttributeSchema::new("name", types::name()).required(),
            AttributeSchema::new("value", AttributeType::String).required(),
        ],
    )
}

/// Returns the schema for applications
pub fn application_schema() -> ResourceSchema {
    ResourceSchema::new("elasticbeanstalk.application")
        .with_description("A named application owning versions and environments")
        .attribute(AttributeSchema::new("name", types::name()).required())
        .attribute(AttributeSchema::new("description", AttributeType::String))
}

/// Returns the schema for application versions
pub fn application_version_schema() -> ResourceSchema {
    ResourceSchema::new("elasticbeanstalk.application_version")
        .with_description("A deployable artifact stored in a bucket")
        .attribute(
            AttributeSchema::new("name", types::name())
                .with_description("Version label (defaults to resource name)"),
        )
        .attribute(AttributeSchema::new("application", AttributeType::String).required())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(AttributeSchema::new("bucket", AttributeType::String).required())
        .attribute(AttributeSchema::new("key", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("source_version", AttributeType::String)
                .required()
                .with_description("Version id of the uploaded object"),
        )
}

/// Returns the schema for environments
pub fn environment_schema() -> ResourceSchema {
    ResourceSchema::new("elasticbeanstalk.environment")
        .with_description("Running compute for one application version")
        .attribute(AttributeSchema::new("name", types::name()).required())
        .attribute(AttributeSchema::new("application", AttributeType::String).required())
        .attribute(AttributeSchema::new("version_label", AttributeType::String).required())
        .attribute(AttributeSchema::new("solution_stack_name", types::name()).required())
        .attribute(AttributeSchema::new(
            "settings",
            AttributeType::List(Box::new(setting_type())),
        ))
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![
        application_schema(),
        application_version_schema(),
        environment_schema(),
    ]
}
