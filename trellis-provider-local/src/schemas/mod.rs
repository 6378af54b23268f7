//! Resource schema definitions of the simulated control plane

pub mod ec2;
pub mod elasticbeanstalk;
pub mod iam;
pub mod rds;
pub mod s3;

use trellis_core::schema::ResourceSchema;

/// Returns all schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(ec2::schemas());
    schemas.extend(rds::schemas());
    schemas.extend(s3::schemas());
    schemas.extend(iam::schemas());
    schemas.extend(elasticbeanstalk::schemas());
    schemas
}
