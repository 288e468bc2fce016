//! Index Exchange adapter: `ix.firstPartyData` in the host configuration.

use std::sync::Arc;

use error_stack::Report;
use serde_json::{json, Map, Value};

use crate::bidders::{bidder_error, BidderAdapter};
use crate::error::RtdError;
use crate::host::HostConfig;
use crate::models::BidTarget;
use crate::signals::{MergedSignals, SIGNAL_KEY};

const IX_BIDDER_CODE: &str = "ix";
const FIRST_PARTY_DATA_PATH: &str = "ix.firstPartyData";

pub struct IxAdapter;

#[must_use]
pub fn register() -> Arc<dyn BidderAdapter> {
    Arc::new(IxAdapter)
}

impl BidderAdapter for IxAdapter {
    fn bidder_code(&self) -> &'static str {
        IX_BIDDER_CODE
    }

    fn apply(
        &self,
        _bid: &mut BidTarget,
        signals: &MergedSignals,
        host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>> {
        let mut first_party_data = match host.get_config(FIRST_PARTY_DATA_PATH) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(existing)) => existing,
            Some(_) => {
                return Err(Report::new(bidder_error(
                    IX_BIDDER_CODE,
                    format!("{FIRST_PARTY_DATA_PATH} is not an object"),
                )))
            }
        };

        first_party_data.insert(
            SIGNAL_KEY.to_string(),
            Value::Array(signals.list.iter().cloned().map(Value::String).collect()),
        );

        host.set_config(json!({ "ix": { "firstPartyData": first_party_data } }));
        Ok(())
    }
}
