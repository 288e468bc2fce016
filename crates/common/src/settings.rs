use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::RtdError;
use crate::payload::PayloadSchema;

/// Prefix for environment overrides, e.g. `SIRDATA_RTD__SIRDATA__PARTNER_ID`.
pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "SIRDATA_RTD";
pub const ENVIRONMENT_VARIABLE_SEPARATOR: &str = "__";

/// Provider parameters, the `params` block a publisher configures.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Sirdata {
    #[serde(default = "default_partner_id")]
    #[validate(range(min = 1))]
    pub partner_id: u64,

    #[serde(default = "default_key")]
    #[validate(range(min = 1))]
    pub key: u64,

    /// Contextual categories scoring below this are dropped (0-100).
    #[serde(default = "default_min_relevancy_score")]
    #[validate(range(max = 100))]
    pub contextual_min_relevancy_score: u8,

    /// Only these bidders are enriched when set.
    #[serde(default)]
    pub bidders: Option<Vec<String>>,

    /// Only these ad unit codes are enriched when set.
    #[serde(default)]
    pub ad_unit_codes: Option<Vec<String>>,

    /// Push the signal list as `sd_rtd` targeting onto every GPT slot.
    #[serde(default)]
    pub set_gpt_key_values: bool,

    #[serde(default)]
    pub payload_schema: PayloadSchema,

    #[serde(default = "default_standard_domain")]
    #[validate(length(min = 1))]
    pub standard_domain: String,

    #[serde(default = "default_restricted_domain")]
    #[validate(length(min = 1))]
    pub restricted_domain: String,
}

impl Default for Sirdata {
    fn default() -> Self {
        Self {
            partner_id: default_partner_id(),
            key: default_key(),
            contextual_min_relevancy_score: default_min_relevancy_score(),
            bidders: None,
            ad_unit_codes: None,
            set_gpt_key_values: false,
            payload_schema: PayloadSchema::default(),
            standard_domain: default_standard_domain(),
            restricted_domain: default_restricted_domain(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Service {
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1))]
    pub log_level: String,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub sirdata: Sirdata,

    #[serde(default)]
    #[validate(nested)]
    pub service: Service,
}

impl Settings {
    /// Load the embedded `sirdata-rtd.toml` with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`RtdError::Configuration`] if the TOML cannot be parsed or the
    /// resulting settings fail validation.
    pub fn new() -> Result<Self, Report<RtdError>> {
        let toml_str = include_str!("../../../sirdata-rtd.toml");
        let settings = Self::from_toml(toml_str)?;
        settings.validate().change_context(RtdError::Configuration {
            message: "Settings validation failed".to_string(),
        })?;
        Ok(settings)
    }

    /// Parse settings from a TOML string, overlaying `SIRDATA_RTD__*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`RtdError::Configuration`] when the TOML is malformed or does not
    /// deserialize into [`Settings`].
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<RtdError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_VARIABLE_PREFIX)
            .separator(ENVIRONMENT_VARIABLE_SEPARATOR)
            .try_parsing(true);

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(RtdError::Configuration {
                message: "Failed to build configuration".to_string(),
            })?;

        config
            .try_deserialize()
            .change_context(RtdError::Configuration {
                message: "Failed to deserialize configuration".to_string(),
            })
    }
}

fn default_partner_id() -> u64 {
    1
}

fn default_key() -> u64 {
    1
}

fn default_min_relevancy_score() -> u8 {
    30
}

fn default_standard_domain() -> String {
    "sddan.com".to_string()
}

fn default_restricted_domain() -> String {
    "cookieless-data.com".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
