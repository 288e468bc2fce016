//! Distribution of merged signals over the host's ad units.
//!
//! For every bid target that passes the configured allow-lists the
//! distributor picks, in order: a custom handler registered for the bidder
//! code, a custom handler registered for the ad unit code, the built-in
//! adapter for the bidder. Bidders with none of these are left untouched.
//!
//! Failures are isolated per bid target and collected in a
//! [`DistributionReport`]; they never stop the remaining targets. A custom
//! handler that panics is recorded as a failure like one returning `Err`.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use error_stack::Report;
use serde::Serialize;

use crate::bidders::BidderRegistry;
use crate::error::RtdError;
use crate::host::{HostConfig, TagLibrary};
use crate::models::AdUnit;
use crate::payload::FetchedPayload;
use crate::settings::Sirdata;
use crate::signals::{MergedSignals, SignalList, SIGNAL_KEY};

/// Caller-supplied handler invoked with the ad unit, the flat list and the payload.
pub type CustomHandler =
    dyn Fn(&mut AdUnit, &SignalList, &FetchedPayload) -> Result<(), Report<RtdError>> + Send + Sync;

/// Custom handlers keyed by bidder code or ad unit code.
#[derive(Clone, Default)]
pub struct CustomHandlers {
    handlers: HashMap<String, Arc<CustomHandler>>,
}

impl CustomHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for a bidder code or an ad unit code.
    pub fn register<F>(&mut self, target: impl Into<String>, handler: F)
    where
        F: Fn(&mut AdUnit, &SignalList, &FetchedPayload) -> Result<(), Report<RtdError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(target.into(), Arc::new(handler));
    }

    #[must_use]
    pub fn with_handler<F>(mut self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut AdUnit, &SignalList, &FetchedPayload) -> Result<(), Report<RtdError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(target, handler);
        self
    }

    fn find(&self, bidder: &str, ad_unit_code: &str) -> Option<(&str, &Arc<CustomHandler>)> {
        self.handlers
            .get_key_value(bidder)
            .or_else(|| self.handlers.get_key_value(ad_unit_code))
            .map(|(target, handler)| (target.as_str(), handler))
    }
}

impl fmt::Debug for CustomHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<_> = self.handlers.keys().collect();
        targets.sort();
        f.debug_struct("CustomHandlers")
            .field("targets", &targets)
            .finish()
    }
}

/// Optional bidder and ad unit allow-lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionFilter {
    pub bidders: Option<Vec<String>>,
    pub ad_unit_codes: Option<Vec<String>>,
}

impl DistributionFilter {
    #[must_use]
    pub fn from_config(config: &Sirdata) -> Self {
        Self {
            bidders: config.bidders.clone(),
            ad_unit_codes: config.ad_unit_codes.clone(),
        }
    }

    #[must_use]
    pub fn allows(&self, bidder: &str, ad_unit_code: &str) -> bool {
        let bidder_ok = self
            .bidders
            .as_ref()
            .is_none_or(|bidders| bidders.iter().any(|b| b == bidder));
        let unit_ok = self
            .ad_unit_codes
            .as_ref()
            .is_none_or(|codes| codes.iter().any(|c| c == ad_unit_code));
        bidder_ok && unit_ok
    }
}

/// Everything the distributor needs besides the data it mutates.
pub struct DistributionContext<'a> {
    pub registry: &'a BidderRegistry,
    pub custom_handlers: &'a CustomHandlers,
    pub filter: &'a DistributionFilter,
    pub set_gpt_key_values: bool,
}

/// How a bid target was enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    CustomHandler,
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedTarget {
    pub ad_unit_code: String,
    pub bidder: String,
    pub dispatch: Dispatch,
}

#[derive(Debug)]
pub struct DistributionFailure {
    pub ad_unit_code: String,
    pub bidder: String,
    pub dispatch: Dispatch,
    pub error: Report<RtdError>,
}

/// What happened to each bid target during one distribution.
#[derive(Debug, Default)]
pub struct DistributionReport {
    pub applied: Vec<AppliedTarget>,
    pub failures: Vec<DistributionFailure>,
    /// Targets excluded by the allow-lists.
    pub filtered: usize,
    /// Unknown bidders with no custom handler.
    pub untouched: usize,
    /// GPT slots that received `sd_rtd` targeting.
    pub gpt_slots_targeted: usize,
}

/// Serializable view of a [`DistributionReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionSummary {
    pub applied: Vec<AppliedTarget>,
    pub failures: Vec<FailureSummary>,
    pub filtered: usize,
    pub untouched: usize,
    pub gpt_slots_targeted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub ad_unit_code: String,
    pub bidder: String,
    pub dispatch: Dispatch,
    pub message: String,
}

impl DistributionReport {
    #[must_use]
    pub fn summary(&self) -> DistributionSummary {
        DistributionSummary {
            applied: self.applied.clone(),
            failures: self
                .failures
                .iter()
                .map(|failure| FailureSummary {
                    ad_unit_code: failure.ad_unit_code.clone(),
                    bidder: failure.bidder.clone(),
                    dispatch: failure.dispatch,
                    message: failure.error.current_context().to_string(),
                })
                .collect(),
            filtered: self.filtered,
            untouched: self.untouched,
            gpt_slots_targeted: self.gpt_slots_targeted,
        }
    }
}

/// Push the flat list onto every slot of the page tag library.
fn target_gpt_slots(list: &SignalList, tags: &mut dyn TagLibrary) -> usize {
    let slots = tags.slot_ids();
    for slot in &slots {
        tags.set_targeting(slot, SIGNAL_KEY, list.as_slice());
    }
    slots.len()
}

/// Apply `signals` to `ad_units` in place.
pub fn distribute(
    signals: &MergedSignals,
    payload: &FetchedPayload,
    ad_units: &mut [AdUnit],
    ctx: &DistributionContext<'_>,
    host: &mut dyn HostConfig,
    tags: Option<&mut dyn TagLibrary>,
) -> DistributionReport {
    let mut report = DistributionReport::default();

    if ctx.set_gpt_key_values {
        match tags {
            Some(tags) => report.gpt_slots_targeted = target_gpt_slots(&signals.list, tags),
            None => log::debug!("GPT key-values requested but no tag library on the page"),
        }
    }

    for ad_unit in ad_units.iter_mut() {
        let mut index = 0;
        // Handlers receive the whole ad unit and may add or remove bids.
        while index < ad_unit.bids.len() {
            let current = index;
            index += 1;
            let bidder = ad_unit.bids[current].bidder.clone();

            if !ctx.filter.allows(&bidder, &ad_unit.code) {
                report.filtered += 1;
                continue;
            }

            if let Some((target, handler)) = ctx.custom_handlers.find(&bidder, &ad_unit.code) {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    handler(ad_unit, &signals.list, payload)
                }))
                .unwrap_or_else(|_| {
                    Err(Report::new(RtdError::CustomHandler {
                        target: target.to_string(),
                        message: "handler panicked".to_string(),
                    }))
                });
                match result {
                    Ok(()) => report.applied.push(AppliedTarget {
                        ad_unit_code: ad_unit.code.clone(),
                        bidder,
                        dispatch: Dispatch::CustomHandler,
                    }),
                    Err(error) => {
                        log::debug!("custom handler {target} failed: {error:?}");
                        report.failures.push(DistributionFailure {
                            ad_unit_code: ad_unit.code.clone(),
                            bidder,
                            dispatch: Dispatch::CustomHandler,
                            error,
                        });
                    }
                }
                continue;
            }

            if !ctx.registry.is_known(&bidder) {
                report.untouched += 1;
                continue;
            }

            let adapter = ctx.registry.adapter_for(&bidder);
            match adapter.apply(&mut ad_unit.bids[current], signals, host) {
                Ok(()) => report.applied.push(AppliedTarget {
                    ad_unit_code: ad_unit.code.clone(),
                    bidder,
                    dispatch: Dispatch::Builtin,
                }),
                Err(error) => {
                    log::warn!(
                        "failed to apply signals to {} in ad unit {}: {:?}",
                        bidder,
                        ad_unit.code,
                        error
                    );
                    report.failures.push(DistributionFailure {
                        ad_unit_code: ad_unit.code.clone(),
                        bidder,
                        dispatch: Dispatch::Builtin,
                        error,
                    });
                }
            }
        }
    }

    log::info!(
        "distributed signals: {} applied, {} failed, {} filtered, {} untouched",
        report.applied.len(),
        report.failures.len(),
        report.filtered,
        report.untouched
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, InMemoryTagLibrary};
    use crate::models::BidTarget;
    use crate::test_support::tests::{sample_ad_units, sample_payload};
    use serde_json::json;

    fn signals() -> MergedSignals {
        crate::signals::merge(&sample_payload(), 30)
    }

    fn run(
        ad_units: &mut [AdUnit],
        handlers: &CustomHandlers,
        filter: &DistributionFilter,
        host: &mut InMemoryHost,
    ) -> DistributionReport {
        let registry = BidderRegistry::builtin();
        let ctx = DistributionContext {
            registry: &registry,
            custom_handlers: handlers,
            filter,
            set_gpt_key_values: false,
        };
        distribute(&signals(), &sample_payload(), ad_units, &ctx, host, None)
    }

    #[test]
    fn enriches_every_known_bidder() {
        let mut ad_units = sample_ad_units();
        let mut host = InMemoryHost::new(Some("v8.0.0".to_string()));

        let report = run(
            &mut ad_units,
            &CustomHandlers::new(),
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.applied.len(), 4);
        assert!(report.failures.is_empty());
        assert_eq!(report.untouched, 1, "criteo has no adapter");
        assert_eq!(
            ad_units[0].bids[0].params()["keywords"]["sd_rtd"],
            json!(["IAB1", "S1", "S2"])
        );
        assert_eq!(
            ad_units[0].bids[1].params()["target"],
            "sd_rtd=IAB1;sd_rtd=S1;sd_rtd=S2"
        );
        assert!(host.get_config("ix.firstPartyData").is_some());
        assert!(host.bidder_config_for("rubicon").is_some());
    }

    #[test]
    fn bidder_allow_list_leaves_other_bidders_untouched() {
        let mut ad_units = sample_ad_units();
        let original = ad_units.clone();
        let mut host = InMemoryHost::new(Some("v8.0.0".to_string()));
        let filter = DistributionFilter {
            bidders: Some(vec!["appnexus".to_string()]),
            ad_unit_codes: None,
        };

        let report = run(&mut ad_units, &CustomHandlers::new(), &filter, &mut host);

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.filtered, 4);
        assert_ne!(ad_units[0].bids[0], original[0].bids[0]);
        for (unit, before) in ad_units.iter().zip(&original) {
            for (bid, bid_before) in unit.bids.iter().zip(&before.bids) {
                if bid.bidder != "appnexus" {
                    assert_eq!(bid, bid_before);
                }
            }
        }
        assert!(host.get_config("ix").is_none());
        assert!(host.bidder_config_for("rubicon").is_none());
    }

    #[test]
    fn ad_unit_allow_list_applies_without_bidder_list() {
        let mut ad_units = sample_ad_units();
        let original = ad_units.clone();
        let mut host = InMemoryHost::new(Some("v8.0.0".to_string()));
        let filter = DistributionFilter {
            bidders: None,
            ad_unit_codes: Some(vec!["div-sidebar".to_string()]),
        };

        let report = run(&mut ad_units, &CustomHandlers::new(), &filter, &mut host);

        assert_eq!(ad_units[0], original[0]);
        assert!(host.get_config("ix").is_none(), "ix only bids on div-top");
        assert!(host.bidder_config_for("rubicon").is_some());
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.filtered, 3);
    }

    #[test]
    fn custom_handler_failure_does_not_stop_later_bids() {
        let mut ad_units = vec![AdUnit {
            code: "div-top".to_string(),
            bids: vec![
                BidTarget::new("criteo"),
                BidTarget::new("appnexus"),
            ],
            ..AdUnit::default()
        }];
        let handlers = CustomHandlers::new().with_handler("criteo", |_, _, _| {
            Err(Report::new(RtdError::CustomHandler {
                target: "criteo".to_string(),
                message: "boom".to_string(),
            }))
        });
        let mut host = InMemoryHost::default();

        let report = run(
            &mut ad_units,
            &handlers,
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].dispatch, Dispatch::CustomHandler);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(
            ad_units[0].bids[1].params()["keywords"]["sd_rtd"],
            json!(["IAB1", "S1", "S2"])
        );
    }

    #[test]
    fn custom_handler_for_bidder_wins_over_builtin_and_ad_unit() {
        let mut ad_units = sample_ad_units();
        let handlers = CustomHandlers::new()
            .with_handler("appnexus", |unit: &mut AdUnit, list: &SignalList, _: &FetchedPayload| {
                unit.extra
                    .insert("handled_by".to_string(), json!("bidder"));
                unit.extra.insert("list".to_string(), json!(list));
                Ok(())
            })
            .with_handler("div-top", |unit: &mut AdUnit, _: &SignalList, _: &FetchedPayload| {
                unit.extra
                    .insert("unit_handler".to_string(), json!(true));
                Ok(())
            });
        let mut host = InMemoryHost::default();

        run(
            &mut ad_units,
            &handlers,
            &DistributionFilter::default(),
            &mut host,
        );

        let top = &ad_units[0];
        assert_eq!(top.extra["handled_by"], "bidder");
        assert_eq!(top.extra["list"], json!(["IAB1", "S1", "S2"]));
        assert!(
            top.bids[0].param("keywords").is_none(),
            "builtin appnexus adapter is bypassed"
        );
        assert_eq!(top.extra["unit_handler"], true, "other bidders use the unit handler");
    }

    #[test]
    fn panicking_custom_handler_is_recorded_and_isolated() {
        let mut ad_units = vec![AdUnit {
            code: "div-top".to_string(),
            bids: vec![BidTarget::new("criteo"), BidTarget::new("appnexus")],
            ..AdUnit::default()
        }];
        let handlers = CustomHandlers::new().with_handler(
            "criteo",
            |_: &mut AdUnit, _: &SignalList, _: &FetchedPayload| {
                std::panic::resume_unwind(Box::new("handler blew up"))
            },
        );
        let mut host = InMemoryHost::default();

        let report = run(
            &mut ad_units,
            &handlers,
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].dispatch, Dispatch::CustomHandler);
        assert!(matches!(
            report.failures[0].error.current_context(),
            RtdError::CustomHandler { .. }
        ));
        assert_eq!(
            ad_units[0].bids[1].params()["keywords"]["sd_rtd"],
            json!(["IAB1", "S1", "S2"])
        );
    }

    #[test]
    fn malformed_params_fail_only_their_own_bid() {
        let mut ad_units: Vec<AdUnit> = serde_json::from_value(json!([{
            "code": "div-top",
            "bids": [
                { "bidder": "criteo", "params": null },
                { "bidder": "appnexus", "params": "placementId=1" },
                { "bidder": "appnexus", "params": null },
                { "bidder": "smartadserver" }
            ]
        }]))
        .expect("bad params do not reject the ad units");
        let mut host = InMemoryHost::default();

        let report = run(
            &mut ad_units,
            &CustomHandlers::new(),
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.untouched, 1);
        let bids = &ad_units[0].bids;
        assert_eq!(bids[0].params, Some(serde_json::Value::Null));
        assert_eq!(bids[1].params(), &json!("placementId=1"));
        assert_eq!(bids[2].params()["keywords"]["sd_rtd"], json!(["IAB1", "S1", "S2"]));
        assert_eq!(bids[3].params()["target"], "sd_rtd=IAB1;sd_rtd=S1;sd_rtd=S2");
    }

    #[test]
    fn builtin_failure_is_recorded_and_isolated() {
        let mut ad_units = vec![AdUnit {
            code: "div-top".to_string(),
            bids: vec![
                BidTarget::new("smartadserver").with_params(json!({ "target": 12 })),
                BidTarget::new("appnexus"),
            ],
            ..AdUnit::default()
        }];
        let mut host = InMemoryHost::default();

        let report = run(
            &mut ad_units,
            &CustomHandlers::new(),
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].bidder, "smartadserver");
        assert_eq!(report.applied.len(), 1);
        let summary = report.summary();
        assert!(summary.failures[0].message.contains("params.target"));
    }

    #[test]
    fn handler_may_remove_bids_without_panicking() {
        let mut ad_units = vec![AdUnit {
            code: "div-top".to_string(),
            bids: vec![BidTarget::new("criteo"), BidTarget::new("appnexus")],
            ..AdUnit::default()
        }];
        let handlers = CustomHandlers::new().with_handler(
            "criteo",
            |unit: &mut AdUnit, _: &SignalList, _: &FetchedPayload| {
                unit.bids.clear();
                Ok(())
            },
        );
        let mut host = InMemoryHost::default();

        let report = run(
            &mut ad_units,
            &handlers,
            &DistributionFilter::default(),
            &mut host,
        );

        assert_eq!(report.applied.len(), 1);
        assert!(ad_units[0].bids.is_empty());
    }

    #[test]
    fn gpt_slots_receive_targeting_when_enabled() {
        let registry = BidderRegistry::builtin();
        let handlers = CustomHandlers::new();
        let filter = DistributionFilter::default();
        let mut tags = InMemoryTagLibrary::with_slots(["slot-a", "slot-b"]);
        let mut host = InMemoryHost::default();
        let mut ad_units = Vec::new();

        let ctx = DistributionContext {
            registry: &registry,
            custom_handlers: &handlers,
            filter: &filter,
            set_gpt_key_values: true,
        };
        let report = distribute(
            &signals(),
            &sample_payload(),
            &mut ad_units,
            &ctx,
            &mut host,
            Some(&mut tags),
        );

        assert_eq!(report.gpt_slots_targeted, 2);
        for slot in ["slot-a", "slot-b"] {
            assert_eq!(
                tags.targeting(slot, "sd_rtd"),
                Some(&["IAB1".to_string(), "S1".to_string(), "S2".to_string()][..])
            );
        }
    }

    #[test]
    fn gpt_slots_untouched_when_disabled() {
        let registry = BidderRegistry::builtin();
        let handlers = CustomHandlers::new();
        let filter = DistributionFilter::default();
        let mut tags = InMemoryTagLibrary::with_slots(["slot-a"]);
        let mut host = InMemoryHost::default();

        let ctx = DistributionContext {
            registry: &registry,
            custom_handlers: &handlers,
            filter: &filter,
            set_gpt_key_values: false,
        };
        let report = distribute(
            &signals(),
            &sample_payload(),
            &mut [],
            &ctx,
            &mut host,
            Some(&mut tags),
        );

        assert_eq!(report.gpt_slots_targeted, 0);
        assert_eq!(tags.targeting("slot-a", "sd_rtd"), None);
    }

    #[test]
    fn filter_allows_everything_by_default() {
        let filter = DistributionFilter::default();
        assert!(filter.allows("anything", "any-unit"));

        let filter = DistributionFilter {
            bidders: Some(vec!["ix".to_string()]),
            ad_unit_codes: Some(vec!["div-top".to_string()]),
        };
        assert!(filter.allows("ix", "div-top"));
        assert!(!filter.allows("ix", "div-side"));
        assert!(!filter.allows("appnexus", "div-top"));
    }
}
