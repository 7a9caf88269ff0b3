//! # switchboard-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SwitchboardSettings::default()`]
//! 2. **User file**: `~/.switchboard/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `SWITCHBOARD_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    data_dir, deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
};
pub use types::*;
