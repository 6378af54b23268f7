//! Role and instance profile for the application's compute instances

use serde::{Deserialize, Serialize};
use trellis_core::resource::Resource;
use trellis_core::stack::{ResourceHandle, Stack};

use crate::error::WebAppError;

pub const ROLE_NAME: &str = "eb-ec2-role";
pub const PROFILE_NAME: &str = "eb-ec2-instance-profile";
pub const COMPUTE_SERVICE: &str = "ec2.amazonaws.com";
const POLICY_VERSION: &str = "2012-10-17";

/// One service, or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Services {
    One(String),
    Many(Vec<String>),
}

impl Services {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let items: Vec<&str> = match self {
            Services::One(s) => vec![s.as_str()],
            Services::Many(list) => list.iter().map(String::as_str).collect(),
        };
        items.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: Services,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub principal: Principal,
    pub effect: String,
    pub sid: String,
}

/// Who may assume a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustPolicy {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl TrustPolicy {
    pub fn for_service(service: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                action: "sts:AssumeRole".to_string(),
                principal: Principal {
                    service: Services::One(service.to_string()),
                },
                effect: "Allow".to_string(),
                sid: String::new(),
            }],
        }
    }

    /// Exactly one principal service, and no wildcards
    pub fn validate(&self) -> Result<(), WebAppError> {
        let services: Vec<&str> = self
            .statement
            .iter()
            .flat_map(|s| s.principal.service.iter())
            .collect();

        if let Some(wildcard) = services.iter().find(|s| s.contains('*')) {
            return Err(WebAppError::InvalidPolicy(format!(
                "wildcard principal '{}'",
                wildcard
            )));
        }
        if services.len() != 1 {
            return Err(WebAppError::InvalidPolicy(format!(
                "expected exactly one principal service, found {}",
                services.len()
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, WebAppError> {
        serde_json::to_string_pretty(self).map_err(|e| WebAppError::InvalidPolicy(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub role: ResourceHandle,
    pub profile: ResourceHandle,
}

impl Identity {
    pub fn declare(stack: &mut Stack) -> Result<Self, WebAppError> {
        let policy = TrustPolicy::for_service(COMPUTE_SERVICE);
        policy.validate()?;

        let role = stack.declare(
            Resource::new("iam.role", ROLE_NAME)
                .with_attribute("name", ROLE_NAME)
                .with_attribute("description", "Role for EC2 managed by EB")
                .with_attribute("assume_role_policy", policy.to_json()?),
        )?;
        let profile = stack.declare(
            Resource::new("iam.instance_profile", PROFILE_NAME)
                .with_attribute("name", PROFILE_NAME)
                .with_attribute("role", role.reference("name")),
        )?;

        Ok(Self { role, profile })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_document_shape() {
        let json = TrustPolicy::for_service("ec2.amazonaws.com").to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed,
            serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                    "Effect": "Allow",
                    "Sid": ""
                }]
            })
        );
    }

    #[test]
    fn wildcard_principal_is_rejected() {
        let policy = TrustPolicy::for_service("*");
        assert!(matches!(
            policy.validate(),
            Err(WebAppError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn more_than_one_service_is_rejected() {
        let mut policy = TrustPolicy::for_service("ec2.amazonaws.com");
        policy.statement[0].principal.service = Services::Many(vec![
            "ec2.amazonaws.com".to_string(),
            "lambda.amazonaws.com".to_string(),
        ]);
        assert!(policy.validate().is_err());

        policy.statement.clear();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn parses_list_form() {
        let policy: TrustPolicy = serde_json::from_str(
            r#"{"Version":"2012-10-17","Statement":[{"Action":"sts:AssumeRole",
               "Principal":{"Service":["ec2.amazonaws.com"]},"Effect":"Allow","Sid":""}]}"#,
        )
        .unwrap();
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn profile_wraps_role_by_name() {
        let mut stack = Stack::new("webapp", "dev");
        let identity = Identity::declare(&mut stack).unwrap();
        let profile = stack.resource(identity.profile.id()).unwrap();
        assert_eq!(profile.attributes["role"], identity.role.reference("name"));
    }
}
