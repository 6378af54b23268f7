//! Deployment bucket and the uploaded artifact

use std::path::Path;

use sha2::{Digest, Sha256};
use trellis_core::resource::Resource;
use trellis_core::stack::{ResourceHandle, Stack};

use crate::error::WebAppError;

pub const BUCKET_NAME: &str = "web-app-deploy";
pub const OBJECT_NAME: &str = "default";
pub const OBJECT_KEY: &str = "deployment.zip";

/// sha256 of the file, hex encoded
pub fn source_hash(path: &Path) -> Result<String, WebAppError> {
    let content = std::fs::read(path).map_err(|e| WebAppError::ArtifactUnreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub bucket: ResourceHandle,
    pub object: ResourceHandle,
}

impl Artifact {
    pub fn declare(stack: &mut Stack, path: &Path) -> Result<Self, WebAppError> {
        let hash = source_hash(path)?;

        let bucket = stack.declare(Resource::new("s3.bucket", BUCKET_NAME))?;
        let object = stack.declare(
            Resource::new("s3.bucket_object", OBJECT_NAME)
                .with_attribute("bucket", bucket.reference("id"))
                .with_attribute("key", OBJECT_KEY)
                .with_attribute("source", path.display().to_string())
                .with_attribute("source_hash", hash),
        )?;
        log::debug!("artifact {} declared", path.display());

        Ok(Self { bucket, object })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::resource::Value;

    #[test]
    fn object_carries_hash_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment.zip");
        std::fs::write(&path, b"abc").unwrap();

        let mut stack = Stack::new("webapp", "dev");
        let artifact = Artifact::declare(&mut stack, &path).unwrap();
        let object = stack.resource(artifact.object.id()).unwrap();

        assert_eq!(object.attributes["key"], Value::from("deployment.zip"));
        assert_eq!(
            object.attributes["source_hash"],
            Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            object.attributes["bucket"],
            Value::ResourceRef("s3.bucket.web-app-deploy".into(), "id".into())
        );
    }

    #[test]
    fn unreadable_artifact_declares_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut stack = Stack::new("webapp", "dev");

        let result = Artifact::declare(&mut stack, &dir.path().join("missing.zip"));
        assert!(matches!(
            result,
            Err(WebAppError::ArtifactUnreadable { .. })
        ));
        assert!(stack.resources().is_empty());
    }
}
