//! Parsing of the classification service response.
//!
//! The body is untrusted. It is decoded into a [`serde_json::Value`] first and
//! each section is then read defensively: sections with the wrong shape are
//! skipped rather than failing the whole payload.

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RtdError;

/// Wrapper key used by the older response schema.
pub const NESTED_SCHEMA_KEY: &str = "Sirdata_segments";

/// Which response layout the service is expected to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSchema {
    /// `segments` and `contextual_categories` at the top level.
    #[default]
    Flat,
    /// Both sections wrapped in a `Sirdata_segments` object.
    Nested,
}

/// Segments and categories fetched for the current page and user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchedPayload {
    /// Opaque id to segment code, in response order.
    pub segments: Vec<(String, String)>,
    /// Category code to relevancy score (0-100), in response order.
    pub contextual_categories: Vec<(String, f64)>,
}

impl FetchedPayload {
    /// Parse a raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`RtdError::Payload`] if the body is not JSON, is not an object,
    /// or (for [`PayloadSchema::Nested`]) lacks the wrapper object.
    pub fn parse(body: &[u8], schema: PayloadSchema) -> Result<Self, Report<RtdError>> {
        let value: Value = serde_json::from_slice(body).change_context(RtdError::Payload {
            message: "response body is not valid JSON".to_string(),
        })?;

        let root = value.as_object().ok_or_else(|| {
            Report::new(RtdError::Payload {
                message: "response body is not a JSON object".to_string(),
            })
        })?;

        let data = match schema {
            PayloadSchema::Flat => root,
            PayloadSchema::Nested => root
                .get(NESTED_SCHEMA_KEY)
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    Report::new(RtdError::Payload {
                        message: format!("response has no {NESTED_SCHEMA_KEY} object"),
                    })
                })?,
        };

        Ok(Self::from_object(data))
    }

    /// Build a payload from an already decoded object, skipping bad sections.
    #[must_use]
    pub fn from_object(data: &Map<String, Value>) -> Self {
        let segments = data
            .get("segments")
            .and_then(Value::as_object)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(|(id, code)| segment_code(code).map(|code| (id.clone(), code)))
                    .collect()
            })
            .unwrap_or_default();

        let contextual_categories = data
            .get("contextual_categories")
            .and_then(Value::as_object)
            .map(|categories| {
                categories
                    .iter()
                    .filter_map(|(code, score)| score.as_f64().map(|s| (code.clone(), s)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            segments,
            contextual_categories,
        }
    }
}

fn segment_code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
