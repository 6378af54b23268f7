//! The running environment and its namespaced settings

use std::collections::HashMap;

use trellis_core::resource::{Resource, Value};
use trellis_core::stack::{ResourceHandle, Stack};

use crate::error::WebAppError;

pub const ENVIRONMENT_NAME: &str = "tfenvtest";
pub const SOLUTION_STACK: &str = "64bit Amazon Linux 2018.03 v2.17.7 running Docker 20.10.7-ce";

pub const VPC_NAMESPACE: &str = "aws:ec2:vpc";
pub const LAUNCH_NAMESPACE: &str = "aws:autoscaling:launchconfiguration";
pub const APP_ENV_NAMESPACE: &str = "aws:elasticbeanstalk:application:environment";

/// Every environment must set these
pub const REQUIRED_SETTINGS: [(&str, &str); 5] = [
    (VPC_NAMESPACE, "VPCId"),
    (VPC_NAMESPACE, "Subnets"),
    (LAUNCH_NAMESPACE, "IamInstanceProfile"),
    (APP_ENV_NAMESPACE, "DATABASE_URL"),
    (LAUNCH_NAMESPACE, "SecurityGroups"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub namespace: String,
    pub name: String,
    pub value: Value,
}

impl Setting {
    fn to_value(&self) -> Value {
        Value::Map(HashMap::from([
            ("namespace".to_string(), Value::from(self.namespace.as_str())),
            ("name".to_string(), Value::from(self.name.as_str())),
            ("value".to_string(), self.value.clone()),
        ]))
    }
}

/// Settings in insertion order, at most one per namespace and name
#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: Vec<Setting>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        namespace: &str,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), WebAppError> {
        if self.get(namespace, name).is_some() {
            return Err(WebAppError::DuplicateSetting {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        self.entries.push(Setting {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value: value.into(),
        });
        Ok(())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&Setting> {
        self.entries
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ensure_complete(&self) -> Result<(), WebAppError> {
        let missing: Vec<String> = REQUIRED_SETTINGS
            .iter()
            .filter(|(namespace, name)| self.get(namespace, name).is_none())
            .map(|(namespace, name)| format!("{}/{}", namespace, name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WebAppError::MissingSettings(missing))
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(self.entries.iter().map(Setting::to_value).collect())
    }
}

pub fn declare(
    stack: &mut Stack,
    application: &ResourceHandle,
    version: &ResourceHandle,
    settings: &Settings,
) -> Result<ResourceHandle, WebAppError> {
    settings.ensure_complete()?;
    let environment = stack.declare(
        Resource::new("elasticbeanstalk.environment", ENVIRONMENT_NAME)
            .with_attribute("name", ENVIRONMENT_NAME)
            .with_attribute("application", application.reference("name"))
            .with_attribute("version_label", version.reference("name"))
            .with_attribute("solution_stack_name", SOLUTION_STACK)
            .with_attribute("settings", settings.to_value()),
    )?;
    Ok(environment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Settings {
        let mut settings = Settings::new();
        for (namespace, name) in REQUIRED_SETTINGS {
            settings.add(namespace, name, "x").unwrap();
        }
        settings
    }

    #[test]
    fn duplicate_setting_is_rejected() {
        let mut settings = complete();
        let result = settings.add(VPC_NAMESPACE, "VPCId", "vpc-2");
        assert!(matches!(
            result,
            Err(WebAppError::DuplicateSetting { .. })
        ));
        assert_eq!(settings.len(), 5);
    }

    #[test]
    fn same_name_in_another_namespace_is_distinct() {
        let mut settings = complete();
        assert!(settings.add(APP_ENV_NAMESPACE, "VPCId", "x").is_ok());
    }

    #[test]
    fn missing_settings_are_listed() {
        let mut settings = Settings::new();
        settings.add(VPC_NAMESPACE, "VPCId", "vpc-1").unwrap();
        match settings.ensure_complete() {
            Err(WebAppError::MissingSettings(missing)) => {
                assert_eq!(missing.len(), 4);
                assert!(missing.contains(&"aws:ec2:vpc/Subnets".to_string()));
            }
            other => panic!("Expected MissingSettings, got {:?}", other),
        }
        assert!(complete().ensure_complete().is_ok());
    }

    #[test]
    fn incomplete_settings_declare_nothing() {
        let mut stack = Stack::new("webapp", "dev");
        let app = stack
            .declare(Resource::new("elasticbeanstalk.application", "webapp"))
            .unwrap();
        let version = stack
            .declare(
                Resource::new("elasticbeanstalk.application_version", "default")
                    .with_attribute("application", app.reference("name")),
            )
            .unwrap();

        assert!(declare(&mut stack, &app, &version, &Settings::new()).is_err());
        assert_eq!(stack.resources().len(), 2);

        let env = declare(&mut stack, &app, &version, &complete()).unwrap();
        assert_eq!(env.binding(), "elasticbeanstalk.environment.tfenvtest");
    }
}
