//! Configuration: the optional YAML settings file and its validation.

pub mod loader;
pub mod schema;

pub use loader::{MAX_CONFIG_SIZE, load_settings};
pub use schema::{AttackSettings, EngineSettings, Settings};
