//! # vigil-settings
//!
//! Gateway configuration, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **Settings file**: `~/.vigil/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_*`, `SECRET_KEY`, `AGENT_SERVICE_URL`

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
    vigil_home, Loaded, RejectedEnvVar,
};
pub use types::*;
