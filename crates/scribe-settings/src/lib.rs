//! # scribe-settings
//!
//! Configuration with layered sources (in priority order, lowest first):
//! 1. **Compiled defaults**: [`ScribeSettings::default()`]
//! 2. **Settings file**: `~/.scribe/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `SCRIBE_*` overrides
//!
//! Command-line flags are applied by the binary on top of the loaded value.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
