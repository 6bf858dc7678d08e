//! Process-wide layout engine settings.
//!
//! Hosts initialize the engine exactly once before the first render. Reading the settings
//! before that is an explicit [`RenderError::NotInitialized`] rather than silently using
//! whatever defaults happen to be around.

use crate::error::RenderError;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub theme: String,
    /// Whether the engine scans the page for diagrams on its own. Export hosts drive rendering
    /// explicitly, so this stays off.
    pub start_on_load: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            theme: "neutral".to_string(),
            start_on_load: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("layout engine is already initialized")]
pub struct AlreadyInitialized;

/// A write-once settings slot.
#[derive(Debug, Default)]
pub struct EngineCell {
    settings: OnceLock<EngineSettings>,
}

impl EngineCell {
    pub const fn new() -> Self {
        Self {
            settings: OnceLock::new(),
        }
    }

    pub fn initialize(&self, settings: EngineSettings) -> Result<(), AlreadyInitialized> {
        self.settings.set(settings).map_err(|_| AlreadyInitialized)
    }

    /// Initializes with `settings` unless already initialized; returns the effective settings.
    pub fn get_or_initialize(&self, settings: EngineSettings) -> &EngineSettings {
        self.settings.get_or_init(|| settings)
    }

    pub fn settings(&self) -> Result<&EngineSettings, RenderError> {
        self.settings.get().ok_or(RenderError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.settings.get().is_some()
    }
}

static GLOBAL: EngineCell = EngineCell::new();

/// The process-wide engine cell.
pub fn global() -> &'static EngineCell {
    &GLOBAL
}

pub fn initialize(settings: EngineSettings) -> Result<(), AlreadyInitialized> {
    GLOBAL.initialize(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_before_initialize_is_an_error() {
        let cell = EngineCell::new();
        assert!(matches!(cell.settings(), Err(RenderError::NotInitialized)));
        assert!(!cell.is_initialized());
    }

    #[test]
    fn initialize_happens_once() {
        let cell = EngineCell::new();
        cell.initialize(EngineSettings::default()).unwrap();
        let again = cell.initialize(EngineSettings {
            theme: "dark".to_string(),
            start_on_load: true,
        });
        assert_eq!(again, Err(AlreadyInitialized));
        assert_eq!(cell.settings().unwrap().theme, "neutral");
    }
}
