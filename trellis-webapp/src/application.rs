//! The application and the version built from the uploaded artifact

use trellis_core::resource::Resource;
use trellis_core::stack::{DeclarationError, ResourceHandle, Stack};

use crate::artifact::Artifact;

pub const APPLICATION_NAME: &str = "webapp";
pub const VERSION_NAME: &str = "default";
pub const VERSION_DESCRIPTION: &str = "Version 0.1";

#[derive(Debug, Clone)]
pub struct Application {
    pub app: ResourceHandle,
    pub version: ResourceHandle,
}

impl Application {
    pub fn declare(stack: &mut Stack, artifact: &Artifact) -> Result<Self, DeclarationError> {
        let app = stack.declare(
            Resource::new("elasticbeanstalk.application", APPLICATION_NAME)
                .with_attribute("name", APPLICATION_NAME),
        )?;
        // The object id and its version id, so the version waits for the
        // upload and a new upload yields a new version
        let version = stack.declare(
            Resource::new("elasticbeanstalk.application_version", VERSION_NAME)
                .with_attribute("application", app.reference("name"))
                .with_attribute("bucket", artifact.bucket.reference("id"))
                .with_attribute("key", artifact.object.reference("id"))
                .with_attribute("source_version", artifact.object.reference("version_id"))
                .with_attribute("description", VERSION_DESCRIPTION),
        )?;
        Ok(Self { app, version })
    }
}
