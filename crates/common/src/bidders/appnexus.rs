//! AppNexus (Xandr) adapter: keywords and user segments in bid params.

use std::sync::Arc;

use error_stack::Report;
use serde_json::Value;

use crate::bidders::{bidder_error, BidderAdapter};
use crate::error::RtdError;
use crate::host::HostConfig;
use crate::models::{object_at_path, BidTarget};
use crate::signals::{MergedSignals, SIGNAL_KEY};

const APPNEXUS_BIDDER_CODE: &str = "appnexus";

pub struct AppNexusAdapter;

impl AppNexusAdapter {
    fn error(message: impl Into<String>) -> RtdError {
        bidder_error(APPNEXUS_BIDDER_CODE, message)
    }

    fn check_shapes(bid: &BidTarget) -> Result<(), Report<RtdError>> {
        if !bid.params_mergeable() {
            return Err(Report::new(Self::error("params is not an object")));
        }
        match bid.param("keywords") {
            None | Some(Value::Object(_)) => {}
            Some(_) => {
                return Err(Report::new(Self::error(
                    "params.keywords is not an object",
                )))
            }
        }
        match bid.param("user") {
            None => {}
            Some(Value::Object(user)) => match user.get("segments") {
                None | Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(Report::new(Self::error(
                        "params.user.segments is not an array",
                    )))
                }
            },
            Some(_) => return Err(Report::new(Self::error("params.user is not an object"))),
        }
        Ok(())
    }
}

#[must_use]
pub fn register() -> Arc<dyn BidderAdapter> {
    Arc::new(AppNexusAdapter)
}

impl BidderAdapter for AppNexusAdapter {
    fn bidder_code(&self) -> &'static str {
        APPNEXUS_BIDDER_CODE
    }

    fn apply(
        &self,
        bid: &mut BidTarget,
        signals: &MergedSignals,
        _host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>> {
        Self::check_shapes(bid)?;

        let list: Vec<Value> = signals.list.iter().cloned().map(Value::String).collect();

        let params = bid
            .params_mut()
            .ok_or_else(|| Report::new(Self::error("params is not an object")))?;

        let keywords = object_at_path(params, &["keywords"])
            .ok_or_else(|| Report::new(Self::error("params.keywords is not an object")))?;
        keywords.insert(SIGNAL_KEY.to_string(), Value::Array(list.clone()));

        let user = object_at_path(params, &["user"])
            .ok_or_else(|| Report::new(Self::error("params.user is not an object")))?;
        match user.get_mut("segments") {
            Some(Value::Array(existing)) => {
                for code in list {
                    if !existing.contains(&code) {
                        existing.push(code);
                    }
                }
            }
            _ => {
                user.insert("segments".to_string(), Value::Array(list));
            }
        }

        Ok(())
    }
}
