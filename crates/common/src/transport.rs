//! Outbound request to the classification service.
//!
//! [`build_signal_request`] turns settings and resolved consent into the
//! endpoint URL. Sending it is left to a [`SignalTransport`] supplied by the
//! runtime, so this crate has no dependency on a particular HTTP client.

use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use http::Response;
use url::Url;

use crate::consent::{EndpointDomain, ResolvedRequest};
use crate::error::RtdError;
use crate::settings::Sirdata;

/// A prepared call to the classification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    pub url: Url,
    /// Whether cookies may travel with the request.
    pub with_credentials: bool,
}

/// Runtime hook that performs the HTTP exchange.
///
/// Implementations return the raw response whatever its status; status
/// handling belongs to the provider. An `Err` means no response was received.
#[async_trait(?Send)]
pub trait SignalTransport {
    async fn fetch(&self, request: &SignalRequest) -> Result<Response<Vec<u8>>, Report<RtdError>>;
}

/// Host name used for a given endpoint domain.
#[must_use]
pub fn endpoint_host(config: &Sirdata, domain: EndpointDomain) -> String {
    let base = match domain {
        EndpointDomain::Standard => &config.standard_domain,
        EndpointDomain::PrivacyRestricted => &config.restricted_domain,
    };
    format!("kvt.{base}")
}

/// Build the request for the current page and consent state.
///
/// `https://kvt.<domain>/api/v1/public/p/<partnerId>/d/<key>/s?gdpr=..&gdpr_consent=..[&url=..]`
///
/// # Errors
///
/// Returns [`RtdError::Configuration`] if the configured domain does not form
/// a valid URL.
pub fn build_signal_request(
    config: &Sirdata,
    resolved: &ResolvedRequest,
    page_url: Option<&str>,
) -> Result<SignalRequest, Report<RtdError>> {
    let base = format!(
        "https://{}/api/v1/public/p/{}/d/{}/s",
        endpoint_host(config, resolved.domain),
        config.partner_id,
        config.key
    );
    let mut url = Url::parse(&base).change_context(RtdError::Configuration {
        message: format!("invalid endpoint URL {base}"),
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("gdpr", resolved.gdpr_applies.query_value());
        query.append_pair("gdpr_consent", &resolved.consent_string);
        if let Some(page_url) = page_url.filter(|page| !page.is_empty()) {
            query.append_pair("url", page_url);
        }
    }

    Ok(SignalRequest {
        url,
        with_credentials: resolved.send_credentials,
    })
}
