//! The Sirdata real-time data submodule.
//!
//! [`SirdataRtdProvider`] ties the pieces together for one auction:
//!
//! 1. resolve consent into endpoint, credentials and consent parameters
//! 2. fetch segments and categories through a [`SignalTransport`]
//! 3. merge them into a flat signal list
//! 4. distribute the list to ad units, bidders and GPT slots
//!
//! The completion callback runs exactly once whatever happens on the way.
//! Failures never abort the auction; they are logged and the ad units are
//! left as they were.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use http::StatusCode;
use serde::Serialize;

use crate::bidders::BidderRegistry;
use crate::consent::{resolve, ConsentContext};
use crate::distribute::{
    distribute, CustomHandlers, DistributionContext, DistributionFilter, DistributionReport,
    DistributionSummary,
};
use crate::error::RtdError;
use crate::host::{HostConfig, TagLibrary};
use crate::models::AdUnit;
use crate::payload::FetchedPayload;
use crate::settings::{Settings, Sirdata};
use crate::signals::merge;
use crate::transport::{build_signal_request, SignalRequest, SignalTransport};

/// Name of the host module this submodule plugs into.
pub const MODULE_NAME: &str = "realTimeData";

/// Name this submodule registers under.
pub const SUBMODULE_NAME: &str = "SirdataRTDModule";

/// Everything the host hands over for one bid request.
pub struct BidRequestContext<'a> {
    pub ad_units: &'a mut [AdUnit],
    pub consent: &'a ConsentContext,
    /// Current page URL, sent for contextual classification when known.
    pub page_url: Option<&'a str>,
    pub host: &'a mut dyn HostConfig,
    pub tags: Option<&'a mut dyn TagLibrary>,
}

/// How a call to `get_bid_request_data` ended.
#[derive(Debug)]
pub enum RtdOutcome {
    /// Signals were distributed.
    Enriched(DistributionReport),
    /// The service answered 204.
    NoContent,
    /// The payload parsed but nothing passed the merge.
    NoSignals,
    /// The service answered with a status other than 200 or 204.
    UnexpectedStatus(u16),
    /// No response was received.
    TransportFailed(Report<RtdError>),
    /// The response body could not be used.
    ParseFailed(Report<RtdError>),
    /// The request could not be built from the configuration.
    RequestFailed(Report<RtdError>),
}

/// Serializable view of an [`RtdOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Enriched { distribution: DistributionSummary },
    NoContent,
    NoSignals,
    UnexpectedStatus { code: u16 },
    TransportFailed { message: String },
    ParseFailed { message: String },
    RequestFailed { message: String },
    /// `init` declined the request, so no data was fetched.
    Disabled,
}

impl RtdOutcome {
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        matches!(self, Self::Enriched(_))
    }

    #[must_use]
    pub fn summary(&self) -> OutcomeSummary {
        match self {
            Self::Enriched(report) => OutcomeSummary::Enriched {
                distribution: report.summary(),
            },
            Self::NoContent => OutcomeSummary::NoContent,
            Self::NoSignals => OutcomeSummary::NoSignals,
            Self::UnexpectedStatus(code) => OutcomeSummary::UnexpectedStatus { code: *code },
            Self::TransportFailed(report) => OutcomeSummary::TransportFailed {
                message: report.current_context().to_string(),
            },
            Self::ParseFailed(report) => OutcomeSummary::ParseFailed {
                message: report.current_context().to_string(),
            },
            Self::RequestFailed(report) => OutcomeSummary::RequestFailed {
                message: report.current_context().to_string(),
            },
        }
    }
}

/// Callback fired once when a submodule is done with a bid request.
pub type CompletionCallback<'a> = Box<dyn FnOnce(&RtdOutcome) + 'a>;

/// A real-time data submodule as seen by the host module.
#[async_trait(?Send)]
pub trait RtdSubmodule {
    fn name(&self) -> &'static str;

    /// Called once at registration. Returning `false` disables the submodule.
    fn init(&self, consent: &ConsentContext) -> bool;

    async fn get_bid_request_data(
        &self,
        ctx: BidRequestContext<'_>,
        transport: &dyn SignalTransport,
        on_done: CompletionCallback<'_>,
    ) -> RtdOutcome;
}

/// Submodules known to the host, keyed by name.
#[derive(Default)]
pub struct SubmoduleRegistry {
    submodules: BTreeMap<&'static str, Arc<dyn RtdSubmodule>>,
}

impl SubmoduleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a submodule, replacing any previous one with the same name.
    pub fn register(&mut self, submodule: Arc<dyn RtdSubmodule>) {
        log::info!("registering {} submodule {}", MODULE_NAME, submodule.name());
        self.submodules.insert(submodule.name(), submodule);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn RtdSubmodule>> {
        self.submodules.get(name).cloned()
    }

    /// Run `init` on every submodule and return those that accepted.
    #[must_use]
    pub fn initialized(&self, consent: &ConsentContext) -> Vec<Arc<dyn RtdSubmodule>> {
        self.submodules
            .values()
            .filter(|submodule| submodule.init(consent))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.submodules.keys().copied().collect()
    }
}

/// Sirdata segments and contextual categories for Prebid-style auctions.
#[derive(Debug, Clone)]
pub struct SirdataRtdProvider {
    config: Sirdata,
    registry: BidderRegistry,
    custom_handlers: CustomHandlers,
}

impl SirdataRtdProvider {
    #[must_use]
    pub fn new(config: Sirdata) -> Self {
        Self {
            config,
            registry: BidderRegistry::builtin(),
            custom_handlers: CustomHandlers::new(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.sirdata.clone())
    }

    #[must_use]
    pub fn with_custom_handlers(mut self, custom_handlers: CustomHandlers) -> Self {
        self.custom_handlers = custom_handlers;
        self
    }

    /// Always accepts. Consent is evaluated per request, not at registration.
    #[must_use]
    pub fn init(&self, consent: &ConsentContext) -> bool {
        log::info!(
            "{SUBMODULE_NAME} init: partner {} key {}, gdpr applies {:?}",
            self.config.partner_id,
            self.config.key,
            consent.gdpr_applies()
        );
        true
    }

    /// Build the request for the given consent state and page.
    ///
    /// # Errors
    ///
    /// Returns [`RtdError::Configuration`] when the endpoint URL cannot be built.
    pub fn signal_request(
        &self,
        consent: &ConsentContext,
        page_url: Option<&str>,
    ) -> Result<SignalRequest, Report<RtdError>> {
        let resolved = resolve(consent);
        log::debug!("resolved consent: {resolved:?}");
        build_signal_request(&self.config, &resolved, page_url)
    }

    /// Fetch, merge and distribute signals, then call `on_done` exactly once.
    pub async fn get_bid_request_data<F>(
        &self,
        ctx: BidRequestContext<'_>,
        transport: &dyn SignalTransport,
        on_done: F,
    ) -> RtdOutcome
    where
        F: FnOnce(&RtdOutcome),
    {
        let outcome = self.fetch_and_apply(ctx, transport).await;
        on_done(&outcome);
        outcome
    }

    async fn fetch_and_apply(
        &self,
        ctx: BidRequestContext<'_>,
        transport: &dyn SignalTransport,
    ) -> RtdOutcome {
        let request = match self.signal_request(ctx.consent, ctx.page_url) {
            Ok(request) => request,
            Err(error) => {
                log::error!("cannot build Sirdata request: {error:?}");
                return RtdOutcome::RequestFailed(error);
            }
        };

        log::debug!(
            "fetching {} (credentials: {})",
            request.url,
            request.with_credentials
        );
        let response = match transport.fetch(&request).await {
            Ok(response) => response,
            Err(error) => {
                log::error!("Sirdata request failed: {error:?}");
                return RtdOutcome::TransportFailed(error);
            }
        };

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT => {
                log::debug!("Sirdata returned no content");
                return RtdOutcome::NoContent;
            }
            status => {
                log::error!("unexpected Sirdata response status {status}");
                return RtdOutcome::UnexpectedStatus(status.as_u16());
            }
        }

        let payload = match FetchedPayload::parse(response.body(), self.config.payload_schema) {
            Ok(payload) => payload,
            Err(error) => {
                log::error!("unusable Sirdata response: {error:?}");
                return RtdOutcome::ParseFailed(error);
            }
        };

        self.apply_payload(&payload, ctx)
    }

    /// Merge `payload` and distribute it over the context's ad units.
    #[must_use]
    pub fn apply_payload(&self, payload: &FetchedPayload, ctx: BidRequestContext<'_>) -> RtdOutcome {
        let signals = merge(payload, self.config.contextual_min_relevancy_score);
        if signals.list.is_empty() {
            log::debug!("no Sirdata signals passed the merge");
            return RtdOutcome::NoSignals;
        }

        let filter = DistributionFilter::from_config(&self.config);
        let distribution = DistributionContext {
            registry: &self.registry,
            custom_handlers: &self.custom_handlers,
            filter: &filter,
            set_gpt_key_values: self.config.set_gpt_key_values,
        };

        RtdOutcome::Enriched(distribute(
            &signals,
            payload,
            ctx.ad_units,
            &distribution,
            ctx.host,
            ctx.tags,
        ))
    }
}

#[async_trait(?Send)]
impl RtdSubmodule for SirdataRtdProvider {
    fn name(&self) -> &'static str {
        SUBMODULE_NAME
    }

    fn init(&self, consent: &ConsentContext) -> bool {
        SirdataRtdProvider::init(self, consent)
    }

    async fn get_bid_request_data(
        &self,
        ctx: BidRequestContext<'_>,
        transport: &dyn SignalTransport,
        on_done: CompletionCallback<'_>,
    ) -> RtdOutcome {
        SirdataRtdProvider::get_bid_request_data(self, ctx, transport, on_done).await
    }
}
