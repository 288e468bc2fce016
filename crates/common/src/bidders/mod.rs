//! Built-in bidder adapters.
//!
//! Each adapter knows how one bidder expects to receive the signals. The set
//! is fixed; publishers extend behaviour through custom handlers instead (see
//! [`crate::distribute::CustomHandlers`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use error_stack::Report;

use crate::error::RtdError;
use crate::host::HostConfig;
use crate::models::BidTarget;
use crate::signals::MergedSignals;

pub mod appnexus;
pub mod ix;
pub mod rubicon;
pub mod smartadserver;

/// Applies merged signals to a bid target of one specific bidder.
pub trait BidderAdapter: Send + Sync {
    /// Bidder code this adapter handles (e.g. "appnexus").
    fn bidder_code(&self) -> &'static str;

    /// Inject signals into `bid` or into the host configuration.
    ///
    /// Implementations merge into existing data and must leave fields outside
    /// their namespace untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RtdError::Bidder`] when existing data has a shape the
    /// adapter cannot merge into.
    fn apply(
        &self,
        bid: &mut BidTarget,
        signals: &MergedSignals,
        host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>>;
}

/// Adapter used for bidders without a built-in implementation.
struct NoopAdapter;

impl BidderAdapter for NoopAdapter {
    fn bidder_code(&self) -> &'static str {
        "noop"
    }

    fn apply(
        &self,
        _bid: &mut BidTarget,
        _signals: &MergedSignals,
        _host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>> {
        Ok(())
    }
}

static NOOP_ADAPTER: NoopAdapter = NoopAdapter;

type AdapterBuilder = fn() -> Arc<dyn BidderAdapter>;

fn builders() -> &'static [AdapterBuilder] {
    &[
        appnexus::register,
        smartadserver::register,
        ix::register,
        rubicon::register,
    ]
}

/// Lookup table from bidder code to adapter.
#[derive(Clone)]
pub struct BidderRegistry {
    adapters: HashMap<&'static str, Arc<dyn BidderAdapter>>,
}

impl BidderRegistry {
    /// Registry holding every built-in adapter.
    #[must_use]
    pub fn builtin() -> Self {
        let adapters = builders()
            .iter()
            .map(|build| {
                let adapter = build();
                (adapter.bidder_code(), adapter)
            })
            .collect();
        Self { adapters }
    }

    /// True when `bidder` has a built-in adapter.
    #[must_use]
    pub fn is_known(&self, bidder: &str) -> bool {
        self.adapters.contains_key(bidder)
    }

    /// Adapter for `bidder`, or a no-op adapter for unknown bidders.
    #[must_use]
    pub fn adapter_for(&self, bidder: &str) -> &dyn BidderAdapter {
        match self.adapters.get(bidder) {
            Some(adapter) => adapter.as_ref(),
            None => &NOOP_ADAPTER,
        }
    }

    /// Codes of every registered adapter, sorted.
    #[must_use]
    pub fn bidder_codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<_> = self.adapters.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

impl fmt::Debug for BidderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidderRegistry")
            .field("bidders", &self.bidder_codes())
            .finish()
    }
}

impl Default for BidderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn bidder_error(bidder: &str, message: impl Into<String>) -> RtdError {
    RtdError::Bidder {
        bidder: bidder.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;

    #[test]
    fn builtin_registry_knows_the_fixed_bidder_set() {
        let registry = BidderRegistry::builtin();

        assert_eq!(
            registry.bidder_codes(),
            vec!["appnexus", "ix", "rubicon", "smartadserver"]
        );
        assert!(registry.is_known("ix"));
        assert!(!registry.is_known("criteo"));
    }

    #[test]
    fn unknown_bidder_gets_noop_adapter() {
        let registry = BidderRegistry::builtin();
        let mut bid = BidTarget::new("criteo")
            .with_params(serde_json::json!({ "networkId": 7 }));
        let before = bid.clone();
        let mut host = InMemoryHost::default();
        let signals = MergedSignals {
            list: ["IAB1"].into_iter().collect(),
            categories: vec!["IAB1".to_string()],
            segments: Vec::new(),
        };

        let adapter = registry.adapter_for("criteo");
        assert_eq!(adapter.bidder_code(), "noop");
        adapter
            .apply(&mut bid, &signals, &mut host)
            .expect("noop never fails");

        assert_eq!(bid, before);
        assert_eq!(host, InMemoryHost::default());
    }
}
