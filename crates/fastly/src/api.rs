//! JSON surface of the edge service.
//!
//! A caller posts its ad units, consent and host state; the provider runs
//! against in-memory host objects and the mutated state is returned.

use std::collections::BTreeMap;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sirdata_rtd_common::consent::ConsentContext;
use sirdata_rtd_common::error::RtdError;
use sirdata_rtd_common::host::{InMemoryHost, InMemoryTagLibrary, TagLibrary};
use sirdata_rtd_common::models::AdUnit;
use sirdata_rtd_common::provider::{BidRequestContext, OutcomeSummary, RtdOutcome, RtdSubmodule};
use sirdata_rtd_common::signals::SIGNAL_KEY;
use sirdata_rtd_common::transport::SignalTransport;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequestData {
    #[serde(default)]
    pub ad_units: Vec<AdUnit>,
    #[serde(default)]
    pub user_consent: ConsentContext,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub host_version: Option<String>,
    #[serde(default)]
    pub host_config: Map<String, Value>,
    /// GPT slot ids on the page. `None` means the page has no tag library.
    #[serde(default)]
    pub gpt_slots: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequestDataResponse {
    pub outcome: OutcomeSummary,
    pub ad_units: Vec<AdUnit>,
    pub host_config: Map<String, Value>,
    pub bidder_config: BTreeMap<String, Value>,
    /// Slot id to `sd_rtd` values, only for slots that received targeting.
    pub gpt_targeting: BTreeMap<String, Vec<String>>,
}

/// Decode the request body.
pub fn parse_bid_request_data(body: &[u8]) -> Result<BidRequestData, Report<RtdError>> {
    serde_json::from_slice(body).change_context(RtdError::InvalidRequest {
        message: "body is not a valid bid request data document".to_string(),
    })
}

/// Run `submodule` for one decoded request.
///
/// When `init` declines, nothing is fetched and the host state comes back as
/// posted.
pub async fn handle_bid_request_data(
    submodule: &dyn RtdSubmodule,
    transport: &dyn SignalTransport,
    request: BidRequestData,
) -> BidRequestDataResponse {
    let BidRequestData {
        mut ad_units,
        user_consent,
        page_url,
        host_version,
        host_config,
        gpt_slots,
    } = request;

    let mut host = InMemoryHost {
        version: host_version,
        config: host_config,
        bidder_config: BTreeMap::new(),
    };
    let mut tags = gpt_slots.map(InMemoryTagLibrary::with_slots);

    let outcome = if submodule.init(&user_consent) {
        submodule
            .get_bid_request_data(
                BidRequestContext {
                    ad_units: &mut ad_units,
                    consent: &user_consent,
                    page_url: page_url.as_deref(),
                    host: &mut host,
                    tags: tags.as_mut().map(|t| t as &mut dyn TagLibrary),
                },
                transport,
                Box::new(|outcome: &RtdOutcome| {
                    log::info!("bid request data done: {:?}", outcome.summary());
                }),
            )
            .await
            .summary()
    } else {
        log::info!("{} declined the request at init", submodule.name());
        OutcomeSummary::Disabled
    };

    let gpt_targeting = tags
        .map(|tags| {
            tags.slots
                .into_iter()
                .filter_map(|mut slot| {
                    slot.targeting
                        .remove(SIGNAL_KEY)
                        .map(|values| (slot.id, values))
                })
                .collect()
        })
        .unwrap_or_default();

    BidRequestDataResponse {
        outcome,
        ad_units,
        host_config: host.config,
        bidder_config: host.bidder_config,
        gpt_targeting,
    }
}
