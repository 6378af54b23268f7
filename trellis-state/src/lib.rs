//! Trellis State Management
//!
//! Persists what the engine has applied: every managed resource with its
//! provider-assigned identifier, reported attributes and the dependencies it
//! had when applied, plus the stack outputs.
//!
//! - **StateFile**: The main state structure containing all managed resources
//! - **StateBackend**: A trait for state storage backends
//! - **LockInfo**: Information about state locks for concurrent access control
//!
//! # Example
//!
//! ```ignore
//! use trellis_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local(".trellis/dev.state.json"))?;
//! let lock = backend.acquire_lock("up").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//!
//! // ... apply a plan, record the results ...
//!
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
