//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
pub fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => Ok(Box::new(LocalBackend::from_config(config))),
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unsupported_backend() {
        let config = BackendConfig {
            backend_type: "s3".to_string(),
            attributes: HashMap::new(),
        };

        match create_backend(&config) {
            Err(BackendError::UnsupportedBackend(name)) => assert_eq!(name, "s3"),
            Err(other) => panic!("Expected UnsupportedBackend error, got {:?}", other),
            Ok(_) => panic!("Expected an error"),
        }
    }

    #[tokio::test]
    async fn local_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.state.json");
        let backend = create_backend(&BackendConfig::local(path.display().to_string())).unwrap();
        assert!(backend.read_state().await.unwrap().is_none());
    }
}
