//! Capabilities the host library exposes to the provider.
//!
//! The provider never reaches for globals. The host passes a [`HostConfig`]
//! (its configuration store) and, when a page ad-serving tag library is
//! present, a [`TagLibrary`] into each call. In-memory implementations back
//! the edge service and the tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::merge_json;

/// Configuration store of the host header-bidding library.
pub trait HostConfig {
    /// Version string of the host library, e.g. `v8.12.0`.
    fn library_version(&self) -> Option<&str>;

    /// Read a value by dotted path (`ix.firstPartyData`).
    fn get_config(&self, path: &str) -> Option<Value>;

    /// Merge `config` into the global configuration.
    fn set_config(&mut self, config: Value);

    /// Merge `config` into the override configuration of each bidder.
    fn set_bidder_config(&mut self, bidders: &[String], config: Value);
}

/// Page ad-serving tag library (GPT) slot access.
pub trait TagLibrary {
    /// Ids of every slot defined on the page.
    fn slot_ids(&self) -> Vec<String>;

    /// Set key-value targeting on one slot, replacing previous values for `key`.
    fn set_targeting(&mut self, slot_id: &str, key: &str, values: &[String]);
}

/// [`HostConfig`] kept in memory as JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryHost {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub bidder_config: BTreeMap<String, Value>,
}

impl InMemoryHost {
    #[must_use]
    pub fn new(version: Option<String>) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.set_config(config);
        self
    }

    /// Override configuration recorded for `bidder`.
    #[must_use]
    pub fn bidder_config_for(&self, bidder: &str) -> Option<&Value> {
        self.bidder_config.get(bidder)
    }
}

impl HostConfig for InMemoryHost {
    fn library_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn get_config(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.config.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    fn set_config(&mut self, config: Value) {
        let Value::Object(patch) = config else {
            log::warn!("ignoring non-object host config update");
            return;
        };
        let mut root = Value::Object(std::mem::take(&mut self.config));
        merge_json(&mut root, Value::Object(patch));
        if let Value::Object(map) = root {
            self.config = map;
        }
    }

    fn set_bidder_config(&mut self, bidders: &[String], config: Value) {
        for bidder in bidders {
            let entry = self
                .bidder_config
                .entry(bidder.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            merge_json(entry, config.clone());
        }
    }
}

/// One GPT slot and its targeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TagSlot {
    pub id: String,
    #[serde(default)]
    pub targeting: BTreeMap<String, Vec<String>>,
}

/// [`TagLibrary`] kept in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct InMemoryTagLibrary {
    pub slots: Vec<TagSlot>,
}

impl InMemoryTagLibrary {
    #[must_use]
    pub fn with_slots<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: ids
                .into_iter()
                .map(|id| TagSlot {
                    id: id.into(),
                    targeting: BTreeMap::new(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn targeting(&self, slot_id: &str, key: &str) -> Option<&[String]> {
        self.slots
            .iter()
            .find(|slot| slot.id == slot_id)
            .and_then(|slot| slot.targeting.get(key))
            .map(Vec::as_slice)
    }
}

impl TagLibrary for InMemoryTagLibrary {
    fn slot_ids(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.id.clone()).collect()
    }

    fn set_targeting(&mut self, slot_id: &str, key: &str, values: &[String]) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == slot_id) {
            slot.targeting.insert(key.to_string(), values.to_vec());
        }
    }
}
