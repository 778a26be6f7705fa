//! # Validator Configuration
//!
//! Loaded from YAML or JSON with the same keys operators already use:
//!
//! ```yaml
//! validateRequests:
//!   coerceTypes: true
//! validateResponses: true
//! unknownFormats: [string-list]
//! serDes: [date, date-time.serializer]
//! coercionTimeoutMs: 250
//! ```
//!
//! `serDes` names built-in formats (`date`, `date-time`), optionally
//! narrowed to one direction with a `.serializer` or `.deserializer`
//! suffix. When the key is absent both built-ins are enabled, matching how
//! temporal values reach the wire without any configuration; an explicit
//! empty list disables them. Custom formats are registered in code through
//! [`ContractValidatorBuilder::serdes`](crate::ContractValidatorBuilder::serdes).

use std::time::Duration;

use oapi_serdes::{builtin, FormatEntry};
use serde::Deserialize;

use crate::error::BuildError;

/// `validateRequests` / `validateResponses`: a flag or an options object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ValidationSwitch {
    /// Plain on/off.
    Flag(bool),
    /// On, with options.
    Options(ValidationOptions),
}

/// Options of an enabled validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidationOptions {
    /// Losslessly convert primitives towards declared types before the
    /// structural check.
    #[serde(default)]
    pub coerce_types: bool,
}

impl ValidationSwitch {
    /// Returns true unless the pass is switched off.
    pub fn enabled(self) -> bool {
        !matches!(self, Self::Flag(false))
    }

    /// Returns true if primitive type coercion is requested.
    pub fn coerce_types(self) -> bool {
        matches!(self, Self::Options(ValidationOptions { coerce_types: true }))
    }
}

impl Default for ValidationSwitch {
    fn default() -> Self {
        Self::Flag(true)
    }
}

/// Configuration of a [`ContractValidator`](crate::ContractValidator).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Structural validation of requests.
    #[serde(default)]
    pub validate_requests: ValidationSwitch,
    /// Structural validation of responses.
    #[serde(default)]
    pub validate_responses: ValidationSwitch,
    /// Format names accepted in the contract without any check.
    #[serde(default)]
    pub unknown_formats: Vec<String>,
    /// Built-in formats to enable, in registration order.
    #[serde(default = "default_ser_des")]
    pub ser_des: Vec<String>,
    /// Upper bound for one coercion phase, in milliseconds.
    #[serde(default)]
    pub coercion_timeout_ms: Option<u64>,
}

fn default_ser_des() -> Vec<String> {
    vec![builtin::DATE.to_string(), builtin::DATE_TIME.to_string()]
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            validate_requests: ValidationSwitch::default(),
            validate_responses: ValidationSwitch::default(),
            unknown_formats: Vec::new(),
            ser_des: default_ser_des(),
            coercion_timeout_ms: None,
        }
    }
}

impl ValidatorConfig {
    /// Parse a YAML (or JSON) configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] if the source does not parse or has
    /// unknown keys.
    pub fn from_yaml_str(source: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(source).map_err(|e| BuildError::Config(e.to_string()))
    }

    /// The coercion time limit, if any.
    pub fn coercion_timeout(&self) -> Option<Duration> {
        self.coercion_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve `serDes` into registry entries.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnknownBuiltin`] for a name that is not a
    /// built-in format or has an unknown direction suffix.
    pub fn builtin_entries(&self) -> Result<Vec<FormatEntry>, BuildError> {
        self.ser_des.iter().map(|name| builtin_entry(name)).collect()
    }
}

fn builtin_entry(name: &str) -> Result<FormatEntry, BuildError> {
    let (format, projection) = match name.rsplit_once('.') {
        Some((format, projection)) => (format, Some(projection)),
        None => (name, None),
    };
    let entry = match format {
        builtin::DATE => builtin::date(),
        builtin::DATE_TIME => builtin::date_time(),
        _ => return Err(BuildError::UnknownBuiltin(name.to_string())),
    };
    match projection {
        None => Ok(entry),
        Some("serializer") => Ok(entry.serializer_only()),
        Some("deserializer") => Ok(entry.deserializer_only()),
        Some(_) => Err(BuildError::UnknownBuiltin(name.to_string())),
    }
}
