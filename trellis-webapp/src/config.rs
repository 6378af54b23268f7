//! Database settings read from the stack configuration

use trellis_core::config::{ConfigError, Secret, StackConfig};

/// Values the stack cannot be declared without
#[derive(Debug, Clone)]
pub struct WebAppConfig {
    pub db_name: String,
    pub db_username: String,
    pub db_password: Secret,
}

impl WebAppConfig {
    /// Read `db_name`, `db_username` and `db_password`, in that order.
    /// The first missing key aborts the load.
    pub fn load(config: &StackConfig) -> Result<Self, ConfigError> {
        let db_name = config.require("db_name")?;
        let db_username = config.require("db_username")?;
        let db_password = config.require_secret("db_password")?;
        Ok(Self {
            db_name,
            db_username,
            db_password,
        })
    }
}
