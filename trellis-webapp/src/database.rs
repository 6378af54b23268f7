//! Subnet group and postgres instance

use trellis_core::output::Output;
use trellis_core::resource::{Resource, Value};
use trellis_core::stack::{DeclarationError, ResourceHandle, Stack};

use crate::config::WebAppConfig;
use crate::network::Network;

pub const SUBNET_GROUP_NAME: &str = "dbsubnets";
pub const INSTANCE_NAME: &str = "database";
pub const ENGINE: &str = "postgres";
pub const INSTANCE_CLASS: &str = "db.t3.micro";
/// GiB
pub const ALLOCATED_STORAGE: i64 = 5;

#[derive(Debug, Clone)]
pub struct Database {
    pub subnet_group: ResourceHandle,
    pub instance: ResourceHandle,
}

impl Database {
    /// Declare the subnet group over the private subnets, then the instance in it
    pub fn declare(
        stack: &mut Stack,
        network: &Network,
        security_group: &ResourceHandle,
        config: &WebAppConfig,
    ) -> Result<Self, DeclarationError> {
        let subnet_group = stack.declare(
            Resource::new("rds.subnet_group", SUBNET_GROUP_NAME)
                .with_attribute("subnet_ids", network.private_subnet_ids()),
        )?;

        let instance = stack.declare(
            Resource::new("rds.instance", INSTANCE_NAME)
                .with_attribute("engine", ENGINE)
                .with_attribute("instance_class", INSTANCE_CLASS)
                .with_attribute("allocated_storage", Value::Int(ALLOCATED_STORAGE))
                .with_attribute("db_subnet_group_name", subnet_group.reference("id"))
                .with_attribute(
                    "vpc_security_group_ids",
                    Value::List(vec![security_group.reference("id")]),
                )
                .with_attribute("db_name", config.db_name.as_str())
                .with_attribute("username", config.db_username.as_str())
                .with_attribute("password", config.db_password.clone())
                .with_attribute("skip_final_snapshot", true),
        )?;

        Ok(Self {
            subnet_group,
            instance,
        })
    }

    /// Host and port of the instance, known once it is created
    pub fn endpoint(&self) -> Output<Value> {
        self.instance.output("endpoint")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::config::Secret;

    fn declared() -> (Stack, Database) {
        let config = WebAppConfig {
            db_name: "miniflux".to_string(),
            db_username: "admin".to_string(),
            db_password: Secret::new("secret"),
        };
        let mut stack = Stack::new("webapp", "dev");
        let network = Network::declare(&mut stack).unwrap();
        let group = crate::security::declare(&mut stack, &network).unwrap();
        let database = Database::declare(&mut stack, &network, &group, &config).unwrap();
        (stack, database)
    }

    #[test]
    fn subnet_group_uses_private_subnets_only() {
        let (stack, database) = declared();
        let group = stack.resource(database.subnet_group.id()).unwrap();

        assert_eq!(
            group.attributes["subnet_ids"],
            Value::ResourceRef("ec2.vpc.custom".into(), "private_subnet_ids".into())
        );
        let refs: Vec<_> = group.references().into_iter().map(|(r, _)| r).collect();
        assert!(refs.iter().all(|r| r.attribute != "public_subnet_ids"));
    }

    #[test]
    fn instance_attributes() {
        let (stack, database) = declared();
        let instance = stack.resource(database.instance.id()).unwrap();

        assert_eq!(instance.attributes["engine"], Value::from("postgres"));
        assert_eq!(instance.attributes["instance_class"], Value::from("db.t3.micro"));
        assert_eq!(instance.attributes["allocated_storage"], Value::Int(5));
        assert_eq!(instance.attributes["skip_final_snapshot"], Value::Bool(true));
        assert!(instance.attributes["password"].is_secret());
        assert_eq!(
            instance.dependencies().into_iter().collect::<Vec<_>>(),
            vec![
                "ec2.security_group.dbsecgrp".to_string(),
                "rds.subnet_group.dbsubnets".to_string()
            ]
        );
    }

    #[test]
    fn endpoint_is_deferred() {
        let (_, database) = declared();
        let endpoint = database.endpoint();
        assert_eq!(endpoint.dependencies().len(), 1);
        assert!(
            endpoint
                .resolve(&trellis_core::output::Resolution::new())
                .is_err()
        );
    }
}
