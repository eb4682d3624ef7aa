//! Layered configuration for the pointer server.
//!
//! Settings come from three layers, lowest priority first:
//! 1. Compiled defaults ([`Settings::default()`])
//! 2. `~/.pointer/settings.json`, deep-merged over the defaults
//! 3. `POINTER_*` environment variables plus provider API keys
//!
//! API keys never come from the file and are never serialized.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
