//! Row scoping for the completion table
//!
//! Several course sites can share one database file; every row carries the
//! app id of the site that wrote it and every query filters on it.

use crate::config::Config;
use crate::error::ProgressError;

/// App id used when none is configured
pub const DEFAULT_APP_ID: &str = "lamad";

/// Validated app id that scopes completion rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreScope {
    app_id: String,
}

impl StoreScope {
    /// App ids are non-empty and contain no whitespace or control characters
    pub fn new(app_id: impl Into<String>) -> Result<Self, ProgressError> {
        let app_id = app_id.into();
        if app_id.is_empty() || app_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ProgressError::Config(format!("Invalid app_id: {:?}", app_id)));
        }
        Ok(Self { app_id })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProgressError> {
        Self::new(config.app_id.as_str())
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl Default for StoreScope {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
        }
    }
}
