//! Form-wide configuration.
//!
//! A [`FormConfig`] is shared by every node of one form through its
//! [`FormRuntime`](crate::FormRuntime). It can be built in code, parsed from
//! TOML or JSON, and adjusted from environment variables.
//!
//! ```
//! use formkit::{FormConfig, UpdateOn};
//!
//! let config = FormConfig::from_toml_str(
//!     r#"
//!     dev_warnings = false
//!     default_update_on = "blur"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.default_update_on, UpdateOn::Blur);
//! ```

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::UpdateOn;

/// Environment variable toggling usage warnings (`1`/`true`/`0`/`false`).
pub const ENV_DEV_WARNINGS: &str = "FORMKIT_DEV_WARNINGS";
/// Environment variable overriding the default update trigger.
pub const ENV_UPDATE_ON: &str = "FORMKIT_UPDATE_ON";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Emit `warn!` events for unresolved paths, rejected member writes and
    /// reserved-name collisions.
    pub dev_warnings: bool,
    /// Update trigger for fields whose schema does not name one.
    pub default_update_on: UpdateOn,
    /// Reject `compute`/`copy_to` rules whose target feeds back into one of
    /// their sources.
    pub reject_cycles: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            dev_warnings: cfg!(debug_assertions),
            default_update_on: UpdateOn::Change,
            reject_cycles: true,
        }
    }
}

impl FormConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply `FORMKIT_DEV_WARNINGS` and `FORMKIT_UPDATE_ON` when set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let warnings = env::var(ENV_DEV_WARNINGS).ok();
        let update_on = env::var(ENV_UPDATE_ON).ok();
        self.with_overrides_from(warnings.as_deref(), update_on.as_deref())
    }

    fn with_overrides_from(mut self, warnings: Option<&str>, update_on: Option<&str>) -> Self {
        if let Some(flag) = warnings.and_then(parse_flag) {
            self.dev_warnings = flag;
        }
        if let Some(trigger) = update_on.and_then(UpdateOn::parse) {
            self.default_update_on = trigger;
        }
        self
    }

    #[must_use]
    pub fn dev_warnings(mut self, enabled: bool) -> Self {
        self.dev_warnings = enabled;
        self
    }

    #[must_use]
    pub fn default_update_on(mut self, trigger: UpdateOn) -> Self {
        self.default_update_on = trigger;
        self
    }

    #[must_use]
    pub fn reject_cycles(mut self, enabled: bool) -> Self {
        self.reject_cycles = enabled;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FormConfig::default();
        assert_eq!(config.default_update_on, UpdateOn::Change);
        assert!(config.reject_cycles);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = FormConfig::from_toml_str("default_update_on = \"submit\"").unwrap();
        assert_eq!(config.default_update_on, UpdateOn::Submit);
        assert!(config.reject_cycles);
    }

    #[test]
    fn json_round_trip() {
        let config = FormConfig::default().dev_warnings(true).reject_cycles(false);
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(FormConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = FormConfig::from_toml_str("default_update_on = 3").unwrap_err();
        assert!(matches!(err, crate::FormError::Config(_)));
    }

    #[test]
    fn overrides_apply_only_when_parseable() {
        let base = FormConfig::default().dev_warnings(false);
        let config = base
            .clone()
            .with_overrides_from(Some("yes"), Some("blur"));
        assert!(config.dev_warnings);
        assert_eq!(config.default_update_on, UpdateOn::Blur);

        let untouched = base.clone().with_overrides_from(Some("maybe"), Some("hover"));
        assert_eq!(untouched, base);
    }
}
