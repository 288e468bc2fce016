//! Ad unit and bid target shapes owned by the host.
//!
//! Only the fields the provider reads are typed. Everything else is kept in
//! `extra` so a round trip through these types leaves the host's data intact.
//! An empty `code` or `bids` is not written back.
//!
//! Bid `params` are kept as the raw value the host sent, whatever its shape.
//! A bid whose params are not an object is reported by the adapter that
//! needs them and does not stop the other bids from being read.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

static NO_PARAMS: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AdUnit {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<BidTarget>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// One bidder entry inside an ad unit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BidTarget {
    #[serde(default)]
    pub bidder: String,
    /// Bidder-specific parameter bag. `None` when the host sent no `params`,
    /// `Some(Value::Null)` for an explicit `null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Keep an explicit `null` as `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl BidTarget {
    #[must_use]
    pub fn new(bidder: impl Into<String>) -> Self {
        Self {
            bidder: bidder.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Raw params, `Value::Null` when absent.
    #[must_use]
    pub fn params(&self) -> &Value {
        self.params.as_ref().unwrap_or(&NO_PARAMS)
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params().get(key)
    }

    /// True when params are absent, null or an object.
    #[must_use]
    pub fn params_mergeable(&self) -> bool {
        matches!(self.params(), Value::Null | Value::Object(_))
    }

    /// Params as a mutable object, created when absent or null.
    ///
    /// Returns `None` and leaves the bid untouched when params hold any other
    /// value.
    pub fn params_mut(&mut self) -> Option<&mut Map<String, Value>> {
        if !self.params_mergeable() {
            return None;
        }
        let params = self.params.get_or_insert(Value::Null);
        if params.is_null() {
            *params = Value::Object(Map::new());
        }
        params.as_object_mut()
    }
}

/// Walk `path` from `root`, creating empty objects for missing keys.
///
/// Returns `None` when an existing value on the path is not an object, so the
/// caller never replaces data it does not own.
pub fn object_at_path<'a>(
    root: &'a mut Map<String, Value>,
    path: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for key in path {
        let entry = current
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut()?;
    }
    Some(current)
}

/// Deep-merge `patch` into `target`. Objects merge key by key, anything else
/// in `patch` replaces the value in `target`.
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
