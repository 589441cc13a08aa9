//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model and the validated `ConfigFile`.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path};
pub use model::{
    AdmissionSection, ConfigFile, PathsSection, RawConfigFile, RouteRule, ServerSection,
    StageConfig, StorageSection, WorkerSection, WorkerSettings,
};
