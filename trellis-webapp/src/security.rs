//! Security group guarding the database

use std::collections::HashMap;

use trellis_core::resource::{Resource, Value};
use trellis_core::stack::{ResourceHandle, Stack};

use crate::error::WebAppError;
use crate::network::Network;

pub const SECURITY_GROUP_NAME: &str = "dbsecgrp";

/// The only port the database security group opens
pub const DATABASE_PORT: i64 = 1433;

const OPEN_CIDR: &str = "0.0.0.0/0";

#[derive(Debug, Clone, PartialEq)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: i64,
    pub to_port: i64,
    pub cidr_blocks: Vec<Value>,
}

impl IngressRule {
    /// TCP on the database port, from inside the VPC only
    pub fn database_from(network: &Network) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: DATABASE_PORT,
            to_port: DATABASE_PORT,
            cidr_blocks: vec![network.cidr_block()],
        }
    }

    pub fn validate(&self, network: &Network) -> Result<(), WebAppError> {
        if self.protocol != "tcp" {
            return Err(WebAppError::InvalidRule(format!(
                "protocol must be tcp, got {}",
                self.protocol
            )));
        }
        if self.from_port != self.to_port {
            return Err(WebAppError::InvalidRule(format!(
                "opens ports {}-{}, only {} is allowed",
                self.from_port, self.to_port, DATABASE_PORT
            )));
        }
        if self.from_port != DATABASE_PORT {
            return Err(WebAppError::InvalidRule(format!(
                "opens port {}, only {} is allowed",
                self.from_port, DATABASE_PORT
            )));
        }
        if self.cidr_blocks.is_empty() {
            return Err(WebAppError::InvalidRule("has no source".to_string()));
        }

        let vpc_block = network.cidr_block();
        for block in &self.cidr_blocks {
            if block.as_str() == Some(OPEN_CIDR) {
                return Err(WebAppError::InvalidRule(format!(
                    "is open to {}",
                    OPEN_CIDR
                )));
            }
            if block != &vpc_block {
                return Err(WebAppError::InvalidRule(
                    "admits a source other than the VPC's own block".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        Value::Map(HashMap::from([
            ("protocol".to_string(), Value::from(self.protocol.as_str())),
            ("from_port".to_string(), Value::Int(self.from_port)),
            ("to_port".to_string(), Value::Int(self.to_port)),
            (
                "cidr_blocks".to_string(),
                Value::List(self.cidr_blocks.clone()),
            ),
        ]))
    }
}

/// Declare the database security group on the VPC
pub fn declare(stack: &mut Stack, network: &Network) -> Result<ResourceHandle, WebAppError> {
    let rule = IngressRule::database_from(network);
    rule.validate(network)?;

    let group = stack.declare(
        Resource::new("ec2.security_group", SECURITY_GROUP_NAME)
            .with_attribute("vpc_id", network.vpc_id())
            .with_attribute("ingress", Value::List(vec![rule.to_value()])),
    )?;
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        let mut stack = Stack::new("webapp", "dev");
        Network::declare(&mut stack).unwrap()
    }

    #[test]
    fn database_rule_is_valid() {
        let network = network();
        let rule = IngressRule::database_from(&network);
        assert!(rule.validate(&network).is_ok());
        assert_eq!(rule.from_port, 1433);
        assert_eq!(
            rule.cidr_blocks,
            vec![Value::ResourceRef("ec2.vpc.custom".into(), "cidr_block".into())]
        );
    }

    #[test]
    fn other_ports_are_rejected() {
        let network = network();

        let mut range = IngressRule::database_from(&network);
        range.to_port = 1434;
        assert!(matches!(
            range.validate(&network),
            Err(WebAppError::InvalidRule(_))
        ));

        let mut other = IngressRule::database_from(&network);
        other.from_port = 22;
        other.to_port = 22;
        assert!(other.validate(&network).is_err());
    }

    #[test]
    fn open_and_foreign_sources_are_rejected() {
        let network = network();

        let mut open = IngressRule::database_from(&network);
        open.cidr_blocks = vec![Value::from("0.0.0.0/0")];
        assert!(open.validate(&network).is_err());

        let mut literal = IngressRule::database_from(&network);
        literal.cidr_blocks = vec![Value::from("10.0.0.0/16")];
        assert!(literal.validate(&network).is_err());

        let mut extra = IngressRule::database_from(&network);
        extra.cidr_blocks.push(Value::from("192.168.0.0/24"));
        assert!(extra.validate(&network).is_err());

        let mut none = IngressRule::database_from(&network);
        none.cidr_blocks.clear();
        assert!(none.validate(&network).is_err());
    }

    #[test]
    fn group_has_exactly_one_rule() {
        let mut stack = Stack::new("webapp", "dev");
        let network = Network::declare(&mut stack).unwrap();
        let group = declare(&mut stack, &network).unwrap();

        let resource = stack.resource(group.id()).unwrap();
        match &resource.attributes["ingress"] {
            Value::List(rules) => assert_eq!(rules.len(), 1),
            other => panic!("Expected a list, got {:?}", other),
        }
        assert_eq!(resource.attributes["vpc_id"], network.vpc_id());
    }
}
