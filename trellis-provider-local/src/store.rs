//! Records kept by the simulated control plane

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_core::resource::{JsonValueError, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid control plane file {path}: {message}")]
    Parse { path: String, message: String },
}

/// A provisioned resource as the control plane sees it
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub resource_type: String,
    pub name: String,
    pub identifier: String,
    /// Declared attributes plus everything the control plane computed
    pub attributes: HashMap<String, Value>,
}

impl Record {
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// String list attribute; missing or mistyped yields an empty list
    pub fn list_attr(&self, key: &str) -> Vec<&str> {
        match self.attributes.get(key).map(Value::expose) {
            Some(Value::List(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Values other records use to point at this one
    fn handles(&self) -> Vec<&str> {
        let mut handles = vec![self.identifier.as_str()];
        if self.resource_type == "ec2.vpc" {
            handles.extend(self.list_attr("public_subnet_ids"));
            handles.extend(self.list_attr("private_subnet_ids"));
        }
        handles
    }

    /// Handles this record points at, with the type each one names
    fn references(&self) -> Vec<(&'static str, &str)> {
        let mut references = Vec::new();
        for (attribute, target) in reference_attributes(&self.resource_type) {
            let handles = match self.attributes.get(*attribute).map(Value::expose) {
                Some(Value::List(_)) => self.list_attr(attribute),
                Some(value) => value.as_str().map(split_handles).unwrap_or_default(),
                None => Vec::new(),
            };
            references.extend(handles.into_iter().map(|handle| (*target, handle)));
        }

        if let Some(Value::List(settings)) = self.attributes.get("settings").map(Value::expose) {
            for setting in settings {
                let Value::Map(setting) = setting.expose() else {
                    continue;
                };
                let field = |key: &str| setting.get(key).and_then(Value::as_str);
                let (Some(namespace), Some(name), Some(value)) =
                    (field("namespace"), field("name"), field("value"))
                else {
                    continue;
                };
                if let Some((_, _, target)) = SETTING_REFERENCES
                    .iter()
                    .find(|(ns, n, _)| *ns == namespace && *n == name)
                {
                    references.extend(split_handles(value).into_iter().map(|h| (*target, h)));
                }
            }
        }
        references
    }

    fn is(&self, resource_type: &str, identifier: &str) -> bool {
        self.resource_type == resource_type && self.identifier == identifier
    }
}

/// Attributes holding references, with the type each one points at
fn reference_attributes(resource_type: &str) -> &'static [(&'static str, &'static str)] {
    match resource_type {
        "ec2.security_group" => &[("vpc_id", "ec2.vpc")],
        "rds.subnet_group" => &[("subnet_ids", "ec2.vpc")],
        "rds.instance" => &[
            ("db_subnet_group_name", "rds.subnet_group"),
            ("vpc_security_group_ids", "ec2.security_group"),
        ],
        "s3.bucket_object" => &[("bucket", "s3.bucket")],
        "iam.instance_profile" => &[("role", "iam.role")],
        "elasticbeanstalk.application_version" => &[
            ("application", "elasticbeanstalk.application"),
            ("bucket", "s3.bucket"),
            ("key", "s3.bucket_object"),
        ],
        "elasticbeanstalk.environment" => &[
            ("application", "elasticbeanstalk.application"),
            ("version_label", "elasticbeanstalk.application_version"),
        ],
        _ => &[],
    }
}

/// Environment settings whose values name other records
const SETTING_REFERENCES: [(&str, &str, &str); 4] = [
    ("aws:ec2:vpc", "VPCId", "ec2.vpc"),
    ("aws:ec2:vpc", "Subnets", "ec2.vpc"),
    (
        "aws:autoscaling:launchconfiguration",
        "IamInstanceProfile",
        "iam.instance_profile",
    ),
    (
        "aws:autoscaling:launchconfiguration",
        "SecurityGroups",
        "ec2.security_group",
    ),
];

fn split_handles(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|h| !h.is_empty()).collect()
}

/// On-disk form of a record
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    resource_type: String,
    name: String,
    identifier: String,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl From<&Record> for StoredRecord {
    fn from(record: &Record) -> Self {
        Self {
            resource_type: record.resource_type.clone(),
            name: record.name.clone(),
            identifier: record.identifier.clone(),
            attributes: record
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        }
    }
}

impl TryFrom<StoredRecord> for Record {
    type Error = JsonValueError;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let attributes = stored
            .attributes
            .iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
            .collect::<Result<_, JsonValueError>>()?;
        Ok(Self {
            resource_type: stored.resource_type,
            name: stored.name,
            identifier: stored.identifier,
            attributes,
        })
    }
}

#[derive(Debug, Default)]
pub struct Store {
    records: Vec<Record>,
}

impl Store {
    /// Load from a file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let stored: Vec<StoredRecord> =
            serde_json::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let records = stored
            .into_iter()
            .map(Record::try_from)
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { records })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_error = |e: std::io::Error| StoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let stored: Vec<StoredRecord> = self.records.iter().map(StoredRecord::from).collect();
        let content = serde_json::to_string_pretty(&stored).map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(io_error)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn find(&self, resource_type: &str, identifier: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.is(resource_type, identifier))
    }

    pub fn find_by_name(&self, resource_type: &str, name: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Record> {
        self.records
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Insert a record, replacing one with the same type and identifier
    pub fn upsert(&mut self, record: Record) {
        match self
            .records
            .iter_mut()
            .find(|r| r.is(&record.resource_type, &record.identifier))
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn remove(&mut self, resource_type: &str, identifier: &str) -> Option<Record> {
        let pos = self
            .records
            .iter()
            .position(|r| r.is(resource_type, identifier))?;
        Some(self.records.remove(pos))
    }

    /// Other records that still point at `record`
    pub fn dependents(&self, record: &Record) -> Vec<&Record> {
        let handles = record.handles();
        self.records
            .iter()
            .filter(|r| !r.is(&record.resource_type, &record.identifier))
            .filter(|r| {
                r.references().iter().any(|(target, handle)| {
                    *target == record.resource_type && handles.contains(handle)
                })
            })
            .collect()
    }
}
