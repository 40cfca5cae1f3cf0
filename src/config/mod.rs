//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI overrides (--listen, --database)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults so an empty file (or no file) is valid
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::{
    CacheConfig, LifecycleConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
};
pub use validation::{validate_config, ValidationError};
