//! The VPC everything else is placed in

use trellis_core::output::{Output, OutputError};
use trellis_core::resource::{Resource, Value};
use trellis_core::stack::{DeclarationError, ResourceHandle, Stack};

pub const VPC_NAME: &str = "custom";
pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const AVAILABILITY_ZONES: i64 = 2;

/// Handle to the declared VPC and the values derived from it
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: ResourceHandle,
}

impl Network {
    pub fn declare(stack: &mut Stack) -> Result<Self, DeclarationError> {
        let vpc = stack.declare(
            Resource::new("ec2.vpc", VPC_NAME)
                .with_attribute("cidr_block", VPC_CIDR)
                .with_attribute("number_of_availability_zones", Value::Int(AVAILABILITY_ZONES)),
        )?;
        Ok(Self { vpc })
    }

    pub fn vpc_id(&self) -> Value {
        self.vpc.reference("id")
    }

    pub fn cidr_block(&self) -> Value {
        self.vpc.reference("cidr_block")
    }

    pub fn private_subnet_ids(&self) -> Value {
        self.vpc.reference("private_subnet_ids")
    }

    /// Id of the first public subnet, known once the VPC is created
    pub fn first_public_subnet(&self) -> Output<Value> {
        let reference = format!("{}.public_subnet_ids", self.vpc.binding());
        self.vpc
            .output("public_subnet_ids")
            .try_map(move |ids| match ids.expose() {
                Value::List(items) => items.first().cloned().ok_or_else(|| OutputError::Invalid {
                    reference: reference.clone(),
                    message: "VPC has no public subnets".to_string(),
                }),
                _ => Err(OutputError::Invalid {
                    reference: reference.clone(),
                    message: "expected a list of subnet ids".to_string(),
                }),
            })
    }
}
