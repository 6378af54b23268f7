//! Trellis Local Provider
//!
//! A simulated control plane. It assigns identifiers, computes the
//! attributes a real service would report (subnet ids, endpoints, ARNs,
//! etags) and enforces the referential rules a control plane would: a
//! resource can only point at records that exist, and a record that others
//! still point at cannot be deleted.
//!
//! Records live in memory, or in a JSON file when created with
//! [`LocalProvider::persistent`].

pub mod network;
pub mod provision;
pub mod schemas;
pub mod store;

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use trellis_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult};
use trellis_core::resource::{Resource, ResourceId, State};
use trellis_core::schema::ResourceSchema;

use crate::provision::{assign_identifier, provision};
use crate::store::{Record, Store, StoreError};

pub struct LocalProvider {
    store: Mutex<Store>,
    path: Option<PathBuf>,
}

impl LocalProvider {
    /// Control plane that forgets everything when dropped
    pub fn in_memory() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            path: None,
        }
    }

    /// Control plane persisted to a JSON file after every change
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Store::load(&path)?;
        Ok(Self {
            store: Mutex::new(store),
            path: Some(path),
        })
    }

    /// Snapshot of every record
    pub fn records(&self) -> ProviderResult<Vec<Record>> {
        Ok(self.lock()?.records().to_vec())
    }

    fn lock(&self) -> ProviderResult<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| ProviderError::new("Control plane store is poisoned"))
    }

    fn persist(&self, store: &Store) -> ProviderResult<()> {
        match &self.path {
            Some(path) => store
                .save(path)
                .map_err(|e| ProviderError::new("Failed to save control plane").with_cause(e)),
            None => Ok(()),
        }
    }

    fn to_state(id: &ResourceId, record: &Record) -> State {
        State::existing(id.clone(), record.attributes.clone())
            .with_identifier(record.identifier.clone())
    }

    fn read_record(&self, id: &ResourceId, identifier: Option<&str>) -> ProviderResult<State> {
        let store = self.lock()?;
        let record = match identifier {
            Some(identifier) => store.find(&id.resource_type, identifier),
            None => store.find_by_name(&id.resource_type, &id.name),
        };
        Ok(match record {
            Some(record) => Self::to_state(id, record),
            None => State::not_found(id.clone()),
        })
    }

    fn create_record(&self, resource: &Resource) -> ProviderResult<State> {
        let fail = |message: String| ProviderError::new(message).for_resource(resource.id.clone());
        let mut store = self.lock()?;

        let identifier = assign_identifier(resource).map_err(fail)?;
        if store.find(&resource.id.resource_type, &identifier).is_some() {
            return Err(fail(format!("'{}' already exists", identifier)));
        }
        let attributes = provision(&store, resource, &identifier).map_err(fail)?;

        let record = Record {
            resource_type: resource.id.resource_type.clone(),
            name: resource.id.name.clone(),
            identifier,
            attributes,
        };
        let state = Self::to_state(&resource.id, &record);
        store.upsert(record);
        self.persist(&store)?;

        log::info!("created {} ({})", resource.id, state.identifier.as_deref().unwrap_or(""));
        Ok(state)
    }

    fn update_record(&self, id: &ResourceId, identifier: &str, to: &Resource) -> ProviderResult<State> {
        let fail = |message: String| ProviderError::new(message).for_resource(id.clone());
        let mut store = self.lock()?;

        if store.find(&id.resource_type, identifier).is_none() {
            return Err(fail(format!("'{}' does not exist", identifier)));
        }
        let attributes = provision(&store, to, identifier).map_err(fail)?;

        let record = Record {
            resource_type: id.resource_type.clone(),
            name: id.name.clone(),
            identifier: identifier.to_string(),
            attributes,
        };
        let state = Self::to_state(id, &record);
        store.upsert(record);
        self.persist(&store)?;

        log::info!("updated {} ({})", id, identifier);
        Ok(state)
    }

    fn delete_record(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let fail = |message: String| ProviderError::new(message).for_resource(id.clone());
        let mut store = self.lock()?;

        let record = store
            .find(&id.resource_type, identifier)
            .ok_or_else(|| fail(format!("'{}' does not exist", identifier)))?;

        let dependents: Vec<String> = store
            .dependents(record)
            .iter()
            .map(|r| format!("{}.{}", r.resource_type, r.name))
            .collect();
        if !dependents.is_empty() {
            return Err(fail(format!(
                "'{}' is still in use by {}",
                identifier,
                dependents.join(", ")
            )));
        }

        store.remove(&id.resource_type, identifier);
        self.persist(&store)?;

        log::info!("deleted {} ({})", id, identifier);
        Ok(())
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        schemas::all_schemas()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let result = self.read_record(id, identifier);
        Box::pin(async move { result })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_record(&resource) })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let to = to.clone();
        Box::pin(async move { self.update_record(&id, &identifier, &to) })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_record(&id, &identifier) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::resource::Value;

    async fn create(provider: &LocalProvider, resource: Resource) -> ProviderResult<State> {
        provider.create(&resource).await
    }

    fn str_of<'a>(state: &'a State, key: &str) -> &'a str {
        state.attributes[key].as_str().unwrap()
    }

    fn list_of(state: &State, key: &str) -> Vec<String> {
        match &state.attributes[key] {
            Value::List(items) => items
                .iter()
                .map(|v| v.as_str().unwrap().to_string())
                .collect(),
            other => panic!("Expected list, got {:?}", other),
        }
    }

    async fn vpc(provider: &LocalProvider) -> State {
        create(
            provider,
            Resource::new("ec2.vpc", "custom").with_attribute("cidr_block", "10.0.0.0/16"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn vpc_is_partitioned_per_zone() {
        let provider = LocalProvider::in_memory();
        let state = vpc(&provider).await;

        let identifier = state.identifier.clone().unwrap();
        assert!(identifier.starts_with("vpc-"));
        assert_eq!(list_of(&state, "public_subnet_ids").len(), 2);
        assert_eq!(list_of(&state, "private_subnet_ids").len(), 2);
        assert_eq!(
            list_of(&state, "private_subnet_cidrs"),
            vec!["10.0.32.0/20".to_string(), "10.0.48.0/20".to_string()]
        );
        assert_eq!(str_of(&state, "cidr_block"), "10.0.0.0/16");
    }

    #[tokio::test]
    async fn subnet_group_rejects_public_subnets() {
        let provider = LocalProvider::in_memory();
        let vpc = vpc(&provider).await;

        let public = Resource::new("rds.subnet_group", "dbsubnets").with_attribute(
            "subnet_ids",
            vpc.attributes["public_subnet_ids"].clone(),
        );
        let err = create(&provider, public).await.unwrap_err();
        assert!(err.message.contains("is public"));

        let private = Resource::new("rds.subnet_group", "dbsubnets").with_attribute(
            "subnet_ids",
            vpc.attributes["private_subnet_ids"].clone(),
        );
        let group = create(&provider, private).await.unwrap();
        assert_eq!(group.identifier.as_deref(), Some("dbsubnets"));
        assert_eq!(str_of(&group, "vpc_id"), vpc.identifier.as_deref().unwrap());
    }

    #[tokio::test]
    async fn database_needs_known_group_and_security_group() {
        let provider = LocalProvider::in_memory();
        let vpc = vpc(&provider).await;
        let vpc_id = vpc.identifier.clone().unwrap();

        let database = || {
            Resource::new("rds.instance", "database")
                .with_attribute("engine", "postgres")
                .with_attribute("db_subnet_group_name", "dbsubnets")
                .with_attribute(
                    "vpc_security_group_ids",
                    Value::List(vec![Value::from("sg-missing")]),
                )
        };
        assert!(create(&provider, database()).await.is_err());

        create(
            &provider,
            Resource::new("rds.subnet_group", "dbsubnets")
                .with_attribute("subnet_ids", vpc.attributes["private_subnet_ids"].clone()),
        )
        .await
        .unwrap();
        let err = create(&provider, database()).await.unwrap_err();
        assert!(err.message.contains("sg-missing"));

        let sg = create(
            &provider,
            Resource::new("ec2.security_group", "dbsecgrp").with_attribute("vpc_id", vpc_id),
        )
        .await
        .unwrap();
        let db = create(
            &provider,
            database().with_attribute(
                "vpc_security_group_ids",
                Value::List(vec![Value::from(sg.identifier.clone().unwrap())]),
            ),
        )
        .await
        .unwrap();

        let endpoint = str_of(&db, "endpoint");
        assert!(endpoint.starts_with("database.db-"));
        assert!(endpoint.ends_with(".local:5432"));
    }

    #[tokio::test]
    async fn object_and_version_need_their_targets() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("deployment.zip");
        std::fs::write(&artifact, b"zip").unwrap();

        let provider = LocalProvider::in_memory();
        let object = || {
            Resource::new("s3.bucket_object", "default")
                .with_attribute("bucket", "web-app-deploy")
                .with_attribute("key", "deployment.zip")
                .with_attribute("source", artifact.display().to_string())
        };
        let version = |source_version: &str| {
            Resource::new("elasticbeanstalk.application_version", "default")
                .with_attribute("application", "webapp")
                .with_attribute("bucket", "web-app-deploy")
                .with_attribute("key", "deployment.zip")
                .with_attribute("source_version", source_version)
        };

        // No bucket yet
        assert!(create(&provider, object()).await.is_err());

        create(&provider, Resource::new("s3.bucket", "web-app-deploy"))
            .await
            .unwrap();
        create(
            &provider,
            Resource::new("elasticbeanstalk.application", "webapp").with_attribute("name", "webapp"),
        )
        .await
        .unwrap();

        // Object missing
        let err = create(&provider, version("v0")).await.unwrap_err();
        assert!(err.message.contains("does not exist in bucket"));

        let uploaded = create(&provider, object()).await.unwrap();
        assert_eq!(uploaded.identifier.as_deref(), Some("deployment.zip"));
        assert_eq!(str_of(&uploaded, "etag").len(), 64);

        // Same key, but not the upload that exists
        let err = create(&provider, version("v0")).await.unwrap_err();
        assert!(err.message.contains("not v0"));

        let version = create(&provider, version(str_of(&uploaded, "version_id")))
            .await
            .unwrap();
        assert_eq!(str_of(&version, "name"), "default");
    }

    #[tokio::test]
    async fn reupload_leaves_version_behind() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("deployment.zip");
        std::fs::write(&artifact, b"zip").unwrap();

        let provider = LocalProvider::in_memory();
        create(&provider, Resource::new("s3.bucket", "web-app-deploy"))
            .await
            .unwrap();
        create(
            &provider,
            Resource::new("elasticbeanstalk.application", "webapp").with_attribute("name", "webapp"),
        )
        .await
        .unwrap();
        let object = Resource::new("s3.bucket_object", "default")
            .with_attribute("bucket", "web-app-deploy")
            .with_attribute("key", "deployment.zip")
            .with_attribute("source", artifact.display().to_string());
        let first = create(&provider, object.clone()).await.unwrap();
        let second = provider
            .update(&first.id, "deployment.zip", &first, &object)
            .await
            .unwrap();
        assert_ne!(str_of(&first, "version_id"), str_of(&second, "version_id"));

        let stale = Resource::new("elasticbeanstalk.application_version", "default")
            .with_attribute("application", "webapp")
            .with_attribute("bucket", "web-app-deploy")
            .with_attribute("key", "deployment.zip")
            .with_attribute("source_version", str_of(&first, "version_id"));
        assert!(create(&provider, stale).await.is_err());
    }

    #[tokio::test]
    async fn changed_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("deployment.zip");
        std::fs::write(&artifact, b"zip").unwrap();

        let provider = LocalProvider::in_memory();
        create(&provider, Resource::new("s3.bucket", "web-app-deploy"))
            .await
            .unwrap();
        let err = create(
            &provider,
            Resource::new("s3.bucket_object", "default")
                .with_attribute("bucket", "web-app-deploy")
                .with_attribute("key", "deployment.zip")
                .with_attribute("source", artifact.display().to_string())
                .with_attribute("source_hash", "0000"),
        )
        .await
        .unwrap_err();
        assert!(err.message.contains("changed"));
    }

    #[tokio::test]
    async fn role_policy_must_be_json() {
        let provider = LocalProvider::in_memory();
        let role = |policy: &str| {
            Resource::new("iam.role", "eb-ec2-role")
                .with_attribute("name", "eb-ec2-role")
                .with_attribute("assume_role_policy", policy)
        };

        assert!(create(&provider, role("not json")).await.is_err());
        let created = create(&provider, role(r#"{"Statement": []}"#)).await.unwrap();
        assert!(str_of(&created, "arn").ends_with("role/eb-ec2-role"));

        let profile = create(
            &provider,
            Resource::new("iam.instance_profile", "eb-ec2-instance-profile")
                .with_attribute("name", "eb-ec2-instance-profile")
                .with_attribute("role", "eb-ec2-role"),
        )
        .await
        .unwrap();
        assert_eq!(str_of(&profile, "name"), "eb-ec2-instance-profile");
    }

    #[tokio::test]
    async fn referenced_records_cannot_be_deleted() {
        let provider = LocalProvider::in_memory();
        let vpc = vpc(&provider).await;
        let vpc_id = vpc.identifier.clone().unwrap();
        let sg = create(
            &provider,
            Resource::new("ec2.security_group", "dbsecgrp").with_attribute("vpc_id", vpc_id.clone()),
        )
        .await
        .unwrap();

        let err = provider.delete(&vpc.id, &vpc_id).await.unwrap_err();
        assert!(err.message.contains("ec2.security_group.dbsecgrp"));

        provider
            .delete(&sg.id, sg.identifier.as_deref().unwrap())
            .await
            .unwrap();
        provider.delete(&vpc.id, &vpc_id).await.unwrap();
        assert!(provider.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let provider = LocalProvider::in_memory();
        create(&provider, Resource::new("s3.bucket", "web-app-deploy"))
            .await
            .unwrap();
        let err = create(&provider, Resource::new("s3.bucket", "web-app-deploy"))
            .await
            .unwrap_err();
        assert!(err.message.contains("already exists"));
    }

    #[tokio::test]
    async fn update_keeps_identifier() {
        let provider = LocalProvider::in_memory();
        let created = create(
            &provider,
            Resource::new("elasticbeanstalk.application", "webapp").with_attribute("name", "webapp"),
        )
        .await
        .unwrap();

        let updated = provider
            .update(
                &created.id,
                "webapp",
                &created,
                &Resource::new("elasticbeanstalk.application", "webapp")
                    .with_attribute("name", "webapp")
                    .with_attribute("description", "demo"),
            )
            .await
            .unwrap();
        assert_eq!(updated.identifier.as_deref(), Some("webapp"));
        assert_eq!(str_of(&updated, "description"), "demo");
    }

    #[tokio::test]
    async fn read_by_identifier_or_name() {
        let provider = LocalProvider::in_memory();
        let state = vpc(&provider).await;

        let by_identifier = provider
            .read(&state.id, state.identifier.as_deref())
            .await
            .unwrap();
        assert_eq!(by_identifier, state);

        let by_name = provider.read(&state.id, None).await.unwrap();
        assert!(by_name.exists);

        let missing = provider
            .read(&ResourceId::new("ec2.vpc", "other"), None)
            .await
            .unwrap();
        assert!(!missing.exists);
    }

    #[tokio::test]
    async fn persistent_provider_reloads_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".trellis").join("cloud.json");

        let state = {
            let provider = LocalProvider::persistent(&path).unwrap();
            vpc(&provider).await
        };

        let reopened = LocalProvider::persistent(&path).unwrap();
        let read = reopened
            .read(&state.id, state.identifier.as_deref())
            .await
            .unwrap();
        assert!(read.exists);
        assert_eq!(read.attributes, state.attributes);
    }
}
