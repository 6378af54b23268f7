//! Control plane rules: identifier assignment, referential checks and
//! computed attributes for every supported resource type

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use trellis_core::resource::{Resource, Value};

use crate::network::carve_subnets;
use crate::store::Store;

/// Port every database instance listens on
pub const DATABASE_PORT: i64 = 5432;

type Rule = Result<HashMap<String, Value>, String>;

fn str_attr<'a>(resource: &'a Resource, key: &str) -> Result<&'a str, String> {
    resource
        .attributes
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Attribute '{}' must be a string", key))
}

fn list_attr<'a>(resource: &'a Resource, key: &str) -> Result<Vec<&'a str>, String> {
    match resource.attributes.get(key).map(Value::expose) {
        Some(Value::List(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| format!("Attribute '{}' must be a list of strings", key))
            })
            .collect(),
        None => Ok(Vec::new()),
        Some(_) => Err(format!("Attribute '{}' must be a list", key)),
    }
}

fn strings(items: Vec<String>) -> Value {
    Value::List(items.into_iter().map(Value::String).collect())
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Name-like attribute, falling back to the logical resource name
fn name_or_default<'a>(resource: &'a Resource, key: &str) -> &'a str {
    resource
        .attributes
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(&resource.id.name)
}

/// Identifier the control plane gives a new resource
pub fn assign_identifier(resource: &Resource) -> Result<String, String> {
    let identifier = match resource.id.resource_type.as_str() {
        "ec2.vpc" => format!("vpc-{}", short_id()),
        "ec2.security_group" => format!("sg-{}", short_id()),
        "rds.instance" => format!("db-{}", short_id()),
        "elasticbeanstalk.environment" => format!("e-{}", short_id()),
        "s3.bucket" => name_or_default(resource, "bucket").to_string(),
        "s3.bucket_object" => str_attr(resource, "key")?.to_string(),
        _ => name_or_default(resource, "name").to_string(),
    };
    Ok(identifier)
}

/// Check a resource against the records and compute its full attribute set
pub fn provision(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let mut attributes = resource.attributes.clone();
    let computed = match resource.id.resource_type.as_str() {
        "ec2.vpc" => vpc(resource, identifier),
        "ec2.security_group" => security_group(store, resource),
        "rds.subnet_group" => subnet_group(store, resource, identifier),
        "rds.instance" => db_instance(store, resource, identifier),
        "s3.bucket" => bucket(identifier),
        "s3.bucket_object" => bucket_object(store, resource),
        "iam.role" => role(resource, identifier),
        "iam.instance_profile" => instance_profile(store, resource, identifier),
        "elasticbeanstalk.application" => application(identifier),
        "elasticbeanstalk.application_version" => application_version(store, resource, identifier),
        "elasticbeanstalk.environment" => environment(store, resource, identifier),
        other => Err(format!("Unknown resource type: {}", other)),
    }?;
    attributes.extend(computed);
    Ok(attributes)
}

fn vpc(resource: &Resource, identifier: &str) -> Rule {
    let cidr = str_attr(resource, "cidr_block")?;
    let zones = match resource.attributes.get("number_of_availability_zones") {
        Some(Value::Int(n)) if *n > 0 => *n as usize,
        Some(other) => {
            return Err(format!(
                "number_of_availability_zones must be a positive integer, got {:?}",
                other
            ));
        }
        None => 2,
    };

    let blocks = carve_subnets(cidr, zones * 2)?;
    let (public, private) = blocks.split_at(zones);
    let suffix = identifier.trim_start_matches("vpc-");
    let subnet_ids = |kind: &str| -> Vec<String> {
        (0..zones)
            .map(|i| format!("subnet-{}{}{}", suffix, kind, i))
            .collect()
    };

    Ok(HashMap::from([
        ("public_subnet_ids".to_string(), strings(subnet_ids("a"))),
        ("private_subnet_ids".to_string(), strings(subnet_ids("b"))),
        ("public_subnet_cidrs".to_string(), strings(public.to_vec())),
        ("private_subnet_cidrs".to_string(), strings(private.to_vec())),
    ]))
}

fn security_group(store: &Store, resource: &Resource) -> Rule {
    let vpc_id = str_attr(resource, "vpc_id")?;
    if store.find("ec2.vpc", vpc_id).is_none() {
        return Err(format!("VPC '{}' does not exist", vpc_id));
    }

    if let Some(Value::List(rules)) = resource.attributes.get("ingress") {
        for rule in rules {
            if let Value::Map(rule) = rule.expose()
                && let (Some(Value::Int(from)), Some(Value::Int(to))) =
                    (rule.get("from_port"), rule.get("to_port"))
                && from > to
            {
                return Err(format!("Ingress port range {}-{} is empty", from, to));
            }
        }
    }
    Ok(HashMap::new())
}

fn subnet_group(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let subnet_ids = list_attr(resource, "subnet_ids")?;
    if subnet_ids.is_empty() {
        return Err("A subnet group needs at least one subnet".to_string());
    }

    let mut vpc_id: Option<&str> = None;
    for subnet in &subnet_ids {
        let owner = store
            .of_type("ec2.vpc")
            .find(|vpc| vpc.list_attr("private_subnet_ids").contains(subnet));
        let Some(owner) = owner else {
            let public = store
                .of_type("ec2.vpc")
                .any(|vpc| vpc.list_attr("public_subnet_ids").contains(subnet));
            return Err(if public {
                format!("Subnet '{}' is public; only private subnets may hold a database", subnet)
            } else {
                format!("Subnet '{}' does not exist", subnet)
            });
        };
        match vpc_id {
            Some(id) if id != owner.identifier => {
                return Err("All subnets of a group must belong to one VPC".to_string());
            }
            _ => vpc_id = Some(owner.identifier.as_str()),
        }
    }

    Ok(HashMap::from([
        ("name".to_string(), Value::from(identifier)),
        ("vpc_id".to_string(), Value::from(vpc_id.unwrap_or_default())),
    ]))
}

fn db_instance(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let group_name = str_attr(resource, "db_subnet_group_name")?;
    let group = store
        .find("rds.subnet_group", group_name)
        .ok_or_else(|| format!("DB subnet group '{}' does not exist", group_name))?;

    for sg_id in list_attr(resource, "vpc_security_group_ids")? {
        let sg = store
            .find("ec2.security_group", sg_id)
            .ok_or_else(|| format!("Security group '{}' does not exist", sg_id))?;
        if sg.str_attr("vpc_id") != group.str_attr("vpc_id") {
            return Err(format!(
                "Security group '{}' belongs to another VPC than subnet group '{}'",
                sg_id, group_name
            ));
        }
    }

    let address = format!("{}.{}.local", resource.id.name, identifier);
    Ok(HashMap::from([
        (
            "endpoint".to_string(),
            Value::String(format!("{}:{}", address, DATABASE_PORT)),
        ),
        ("address".to_string(), Value::String(address)),
        ("port".to_string(), Value::Int(DATABASE_PORT)),
    ]))
}

fn bucket(identifier: &str) -> Rule {
    Ok(HashMap::from([
        ("bucket".to_string(), Value::from(identifier)),
        (
            "arn".to_string(),
            Value::String(format!("arn:local:s3:::{}", identifier)),
        ),
    ]))
}

fn bucket_object(store: &Store, resource: &Resource) -> Rule {
    let bucket = str_attr(resource, "bucket")?;
    if store.find("s3.bucket", bucket).is_none() {
        return Err(format!("Bucket '{}' does not exist", bucket));
    }

    let source = str_attr(resource, "source")?;
    let content =
        std::fs::read(source).map_err(|e| format!("Cannot read source '{}': {}", source, e))?;
    let etag = format!("{:x}", Sha256::digest(&content));

    if let Some(expected) = resource.attributes.get("source_hash").and_then(Value::as_str)
        && expected != etag
    {
        return Err(format!(
            "Source '{}' changed since it was declared (expected {}, found {})",
            source, expected, etag
        ));
    }

    Ok(HashMap::from([
        ("etag".to_string(), Value::String(etag)),
        ("size".to_string(), Value::Int(content.len() as i64)),
        (
            "version_id".to_string(),
            Value::String(uuid::Uuid::new_v4().simple().to_string()),
        ),
    ]))
}

fn role(resource: &Resource, identifier: &str) -> Rule {
    let policy = str_attr(resource, "assume_role_policy")?;
    let document: serde_json::Value = serde_json::from_str(policy)
        .map_err(|e| format!("assume_role_policy is not valid JSON: {}", e))?;
    if !document.get("Statement").is_some_and(|s| s.is_array()) {
        return Err("assume_role_policy must contain a Statement list".to_string());
    }

    Ok(HashMap::from([
        ("name".to_string(), Value::from(identifier)),
        (
            "arn".to_string(),
            Value::String(format!("arn:local:iam::000000000000:role/{}", identifier)),
        ),
    ]))
}

fn instance_profile(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let role = str_attr(resource, "role")?;
    if store.find("iam.role", role).is_none() {
        return Err(format!("Role '{}' does not exist", role));
    }

    Ok(HashMap::from([
        ("name".to_string(), Value::from(identifier)),
        (
            "arn".to_string(),
            Value::String(format!(
                "arn:local:iam::000000000000:instance-profile/{}",
                identifier
            )),
        ),
    ]))
}

fn application(identifier: &str) -> Rule {
    Ok(HashMap::from([
        ("name".to_string(), Value::from(identifier)),
        (
            "arn".to_string(),
            Value::String(format!("arn:local:elasticbeanstalk:application/{}", identifier)),
        ),
    ]))
}

fn application_version(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let application = str_attr(resource, "application")?;
    if store.find("elasticbeanstalk.application", application).is_none() {
        return Err(format!("Application '{}' does not exist", application));
    }

    let bucket = str_attr(resource, "bucket")?;
    let key = str_attr(resource, "key")?;
    let object = store
        .of_type("s3.bucket_object")
        .find(|object| object.identifier == key && object.str_attr("bucket") == Some(bucket))
        .ok_or_else(|| format!("Object '{}' does not exist in bucket '{}'", key, bucket))?;

    // Pinned to one upload; the key alone may hold newer bytes
    let source_version = str_attr(resource, "source_version")?;
    let stored_version = object.str_attr("version_id").unwrap_or_default();
    if source_version != stored_version {
        return Err(format!(
            "Object '{}' is at version {}, not {}",
            key, stored_version, source_version
        ));
    }

    Ok(HashMap::from([("name".to_string(), Value::from(identifier))]))
}

/// Settings whose values must name existing records
fn check_setting(store: &Store, namespace: &str, name: &str, value: &str) -> Result<(), String> {
    match (namespace, name) {
        ("aws:ec2:vpc", "VPCId") => {
            store
                .find("ec2.vpc", value)
                .ok_or_else(|| format!("VPC '{}' does not exist", value))?;
        }
        ("aws:ec2:vpc", "Subnets") => {
            for subnet in value.split(',').map(str::trim) {
                if !store
                    .of_type("ec2.vpc")
                    .any(|vpc| vpc.list_attr("public_subnet_ids").contains(&subnet))
                {
                    return Err(format!("'{}' is not a public subnet of any VPC", subnet));
                }
            }
        }
        ("aws:autoscaling:launchconfiguration", "IamInstanceProfile") => {
            store
                .find("iam.instance_profile", value)
                .ok_or_else(|| format!("Instance profile '{}' does not exist", value))?;
        }
        ("aws:autoscaling:launchconfiguration", "SecurityGroups") => {
            for sg in value.split(',').map(str::trim) {
                store
                    .find("ec2.security_group", sg)
                    .ok_or_else(|| format!("Security group '{}' does not exist", sg))?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn environment(store: &Store, resource: &Resource, identifier: &str) -> Rule {
    let application = str_attr(resource, "application")?;
    if store.find("elasticbeanstalk.application", application).is_none() {
        return Err(format!("Application '{}' does not exist", application));
    }

    let label = str_attr(resource, "version_label")?;
    let version = store
        .find("elasticbeanstalk.application_version", label)
        .ok_or_else(|| format!("Application version '{}' does not exist", label))?;
    if version.str_attr("application") != Some(application) {
        return Err(format!(
            "Version '{}' belongs to another application than '{}'",
            label, application
        ));
    }

    if let Some(Value::List(settings)) = resource.attributes.get("settings") {
        for setting in settings {
            let Value::Map(setting) = setting.expose() else {
                return Err("Every setting must be a map".to_string());
            };
            let field = |key: &str| {
                setting
                    .get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("Setting is missing '{}'", key))
            };
            check_setting(store, field("namespace")?, field("name")?, field("value")?)?;
        }
    }

    let name = str_attr(resource, "name")?;
    let suffix = identifier.trim_start_matches("e-");
    Ok(HashMap::from([(
        "endpoint_url".to_string(),
        Value::String(format!("{}-{}.env.local", name, suffix)),
    )]))
}
