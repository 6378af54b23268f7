//! VPC and security group schema definitions

use trellis_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

/// Returns the schema for VPCs
pub fn vpc_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.vpc")
        .with_description("A virtual network partitioned into public and private subnets")
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .with_description("The IPv4 block of the VPC"),
        )
        .attribute(
            AttributeSchema::new("number_of_availability_zones", types::positive_int())
                .with_default(trellis_core::resource::Value::Int(2))
                .with_description("One public and one private subnet are carved per zone"),
        )
}

/// A single ingress rule of a security group
pub fn ingress_rule_type() -> AttributeType {
    types::structure(
        "IngressRule",
        vec![
            AttributeSchema::new(
                "protocol",
                AttributeType::Enum(vec![
                    "tcp".to_string(),
                    "udp".to_string(),
                    "icmp".to_string(),
                ]),
            )
            .required(),
            AttributeSchema::new("from_port", types::port()).required(),
            AttributeSchema::new("to_port", types::port()).required(),
            AttributeSchema::new("cidr_blocks", AttributeType::List(Box::new(types::cidr())))
                .required(),
        ],
    )
}

/// Returns the schema for security groups
pub fn security_group_schema() -> ResourceSchema {
    ResourceSchema::new("ec2.security_group")
        .with_description("A set of ingress rules attached to a VPC")
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .with_description("The VPC the group belongs to"),
        )
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(AttributeSchema::new(
            "ingress",
            AttributeType::List(Box::new(ingress_rule_type())),
        ))
}

pub fn schemas() -> Vec<ResourceSchema> {
    vec![vpc_schema(), security_group_schema()]
}
