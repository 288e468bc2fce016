//! Smart AdServer adapter: `sd_rtd=<code>` pairs in the `target` string.

use std::collections::HashSet;
use std::sync::Arc;

use error_stack::Report;
use serde_json::Value;

use crate::bidders::{bidder_error, BidderAdapter};
use crate::error::RtdError;
use crate::host::HostConfig;
use crate::models::BidTarget;
use crate::signals::{MergedSignals, SIGNAL_KEY};

const SMARTADSERVER_BIDDER_CODE: &str = "smartadserver";
const TARGET_SEPARATOR: char = ';';

pub struct SmartAdServerAdapter;

#[must_use]
pub fn register() -> Arc<dyn BidderAdapter> {
    Arc::new(SmartAdServerAdapter)
}

impl BidderAdapter for SmartAdServerAdapter {
    fn bidder_code(&self) -> &'static str {
        SMARTADSERVER_BIDDER_CODE
    }

    fn apply(
        &self,
        bid: &mut BidTarget,
        signals: &MergedSignals,
        _host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>> {
        let existing = match bid.param("target") {
            None | Some(Value::Null) => "",
            Some(Value::String(existing)) => existing.as_str(),
            Some(_) => {
                return Err(Report::new(bidder_error(
                    SMARTADSERVER_BIDDER_CODE,
                    "params.target is not a string",
                )))
            }
        };
        if !bid.params_mergeable() {
            return Err(Report::new(bidder_error(
                SMARTADSERVER_BIDDER_CODE,
                "params is not an object",
            )));
        }

        // The caller's string is kept byte for byte; missing pairs go at the end.
        let present: HashSet<&str> = existing.split(TARGET_SEPARATOR).collect();
        let mut target = existing.to_string();
        for code in signals.list.iter() {
            let pair = format!("{SIGNAL_KEY}={code}");
            if present.contains(pair.as_str()) {
                continue;
            }
            if !target.is_empty() && !target.ends_with(TARGET_SEPARATOR) {
                target.push(TARGET_SEPARATOR);
            }
            target.push_str(&pair);
        }

        if let Some(params) = bid.params_mut() {
            params.insert("target".to_string(), Value::String(target));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;
    use serde_json::json;

    fn signals() -> MergedSignals {
        MergedSignals {
            list: ["IAB1", "S1"].into_iter().collect(),
            categories: vec!["IAB1".to_string()],
            segments: vec!["S1".to_string()],
        }
    }

    #[test]
    fn builds_target_string() {
        let mut bid = BidTarget::new("smartadserver").with_params(json!({ "siteId": 1 }));
        let mut host = InMemoryHost::default();

        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("should apply");

        assert_eq!(bid.params()["target"], "sd_rtd=IAB1;sd_rtd=S1");
        assert_eq!(bid.params()["siteId"], 1);
    }

    #[test]
    fn appends_to_existing_target() {
        let mut bid =
            BidTarget::new("smartadserver").with_params(json!({ "target": "section=news;" }));
        let mut host = InMemoryHost::default();

        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("should apply");

        assert_eq!(bid.params()["target"], "section=news;sd_rtd=IAB1;sd_rtd=S1");
    }

    #[test]
    fn applying_twice_does_not_duplicate_pairs() {
        let mut bid = BidTarget::new("smartadserver");
        let mut host = InMemoryHost::default();

        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("first apply");
        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("second apply");

        assert_eq!(bid.params()["target"], "sd_rtd=IAB1;sd_rtd=S1");
    }

    #[test]
    fn keeps_existing_target_byte_for_byte() {
        let mut bid =
            BidTarget::new("smartadserver").with_params(json!({ "target": "a;;sd_rtd=IAB1;b;" }));
        let mut host = InMemoryHost::default();

        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("should apply");

        assert_eq!(bid.params()["target"], "a;;sd_rtd=IAB1;b;sd_rtd=S1");
    }

    #[test]
    fn target_is_unchanged_when_every_pair_is_present() {
        let mut bid = BidTarget::new("smartadserver")
            .with_params(json!({ "target": "a;;b;sd_rtd=S1;sd_rtd=IAB1;" }));
        let mut host = InMemoryHost::default();

        SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .expect("should apply");

        assert_eq!(bid.params()["target"], "a;;b;sd_rtd=S1;sd_rtd=IAB1;");
    }

    #[test]
    fn rejects_non_string_target() {
        let mut bid = BidTarget::new("smartadserver").with_params(json!({ "target": ["a"] }));
        let mut host = InMemoryHost::default();

        assert!(SmartAdServerAdapter
            .apply(&mut bid, &signals(), &mut host)
            .is_err());
        assert_eq!(bid.params()["target"], json!(["a"]));
    }
}
