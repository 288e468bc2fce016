//! Consent resolution for the Sirdata endpoint.
//!
//! The host hands over whatever consent signals it collected (COPPA, the IAB
//! US Privacy string and the TCF v2 GDPR data). [`resolve`] turns them into
//! the endpoint domain, the credentials flag and the consent parameters sent
//! to the classification service.
//!
//! Resolution is total: every input yields a [`ResolvedRequest`]. Missing or
//! malformed sub-fields are read as "not present" when deserializing, so the
//! resolver itself never has to deal with bad shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// IAB Global Vendor List id of Sirdata.
pub const SIRDATA_VENDOR_ID: u32 = 53;

/// TCF purpose 1: store and/or access information on a device.
pub const PURPOSE_STORE_ACCESS: u32 = 1;

/// TCF purpose 3: create a personalised ads profile.
pub const PURPOSE_PERSONALISED_ADS_PROFILE: u32 = 3;

/// Tri-state GDPR applicability as reported by the consent management platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GdprApplies {
    Applies,
    DoesNotApply,
    #[default]
    Unknown,
}

impl GdprApplies {
    /// Value of the `gdpr` query parameter.
    #[must_use]
    pub fn query_value(self) -> &'static str {
        match self {
            Self::Applies => "true",
            Self::DoesNotApply => "false",
            Self::Unknown => "",
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(true) => Self::Applies,
            Value::Bool(false) => Self::DoesNotApply,
            Value::Number(n) => {
                if n.as_f64().is_some_and(|f| f != 0.0) {
                    Self::Applies
                } else {
                    Self::DoesNotApply
                }
            }
            Value::String(s) => match s.trim() {
                "" | "null" | "undefined" => Self::Unknown,
                "0" | "false" => Self::DoesNotApply,
                _ => Self::Applies,
            },
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for GdprApplies {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

/// A `consents` map keyed by vendor or purpose id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConsentFlags {
    #[serde(default, deserialize_with = "lenient_map")]
    pub consents: Map<String, Value>,
}

impl ConsentFlags {
    /// True when `id` is present and set to a truthy value.
    #[must_use]
    pub fn granted(&self, id: u32) -> bool {
        self.consents.get(&id.to_string()).is_some_and(is_truthy)
    }
}

/// The subset of the TCF `vendorData` object the resolver reads.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VendorData {
    #[serde(default, deserialize_with = "lenient")]
    pub vendor: Option<ConsentFlags>,
    #[serde(default, deserialize_with = "lenient")]
    pub purpose: Option<ConsentFlags>,
}

impl VendorData {
    fn purpose_granted(&self, id: u32) -> bool {
        self.purpose.as_ref().is_some_and(|p| p.granted(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprConsent {
    #[serde(default)]
    pub gdpr_applies: GdprApplies,
    #[serde(default, deserialize_with = "lenient")]
    pub consent_string: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub vendor_data: Option<VendorData>,
}

/// Consent signals collected by the host for the current auction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConsentContext {
    #[serde(default, deserialize_with = "truthy")]
    pub coppa: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub usp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub gdpr: Option<GdprConsent>,
}

impl ConsentContext {
    /// GDPR applicability, [`GdprApplies::Unknown`] without GDPR data.
    #[must_use]
    pub fn gdpr_applies(&self) -> GdprApplies {
        self.gdpr.as_ref().map(|g| g.gdpr_applies).unwrap_or_default()
    }

    fn consent_string(&self) -> String {
        self.gdpr
            .as_ref()
            .and_then(|g| g.consent_string.clone())
            .unwrap_or_default()
    }

    fn vendor_data(&self) -> Option<&VendorData> {
        self.gdpr.as_ref().and_then(|g| g.vendor_data.as_ref())
    }

    /// The US Privacy string when the host supplied a non-empty one.
    fn usp_signal(&self) -> Option<UspSignal<'_>> {
        self.usp
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(UspSignal)
    }
}

/// IAB US Privacy string, e.g. `1YNN`.
#[derive(Debug, Clone, Copy)]
struct UspSignal<'a>(&'a str);

impl UspSignal<'_> {
    /// Version 1, and either no notice was given or the user opted out of sale.
    fn restricts_identity(self) -> bool {
        let bytes = self.0.as_bytes();
        bytes.first() == Some(&b'1')
            && (bytes.get(1) == Some(&b'N') || bytes.get(2) == Some(&b'Y'))
    }
}

/// Which classification host the request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointDomain {
    /// Full user-centric segments, cookies allowed.
    Standard,
    /// Page-level categories only, no user identity.
    PrivacyRestricted,
}

/// Request parameters derived from a [`ConsentContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRequest {
    pub domain: EndpointDomain,
    pub send_credentials: bool,
    pub gdpr_applies: GdprApplies,
    pub consent_string: String,
}

impl ResolvedRequest {
    fn restricted(mut self) -> Self {
        self.domain = EndpointDomain::PrivacyRestricted;
        self.send_credentials = false;
        self
    }
}

/// Resolve consent signals into request parameters.
///
/// Priority order, first match wins: COPPA, US Privacy, GDPR, default.
#[must_use]
pub fn resolve(consent: &ConsentContext) -> ResolvedRequest {
    let default = ResolvedRequest {
        domain: EndpointDomain::Standard,
        send_credentials: true,
        gdpr_applies: consent.gdpr_applies(),
        consent_string: consent.consent_string(),
    };

    if consent.coppa {
        log::debug!("COPPA applies, requesting contextual data only");
        return ResolvedRequest {
            consent_string: String::new(),
            ..default.restricted()
        };
    }

    if let Some(usp) = consent.usp_signal() {
        if usp.restricts_identity() {
            log::debug!("US Privacy string {} restricts identity", usp.0);
            return ResolvedRequest {
                gdpr_applies: GdprApplies::DoesNotApply,
                ..default.restricted()
            };
        }
        return default;
    }

    if default.gdpr_applies == GdprApplies::Applies {
        if let Some(vendor_data) = consent.vendor_data() {
            if let Some(vendor) = &vendor_data.vendor {
                let allowed = vendor.granted(SIRDATA_VENDOR_ID)
                    && vendor_data.purpose_granted(PURPOSE_STORE_ACCESS)
                    && vendor_data.purpose_granted(PURPOSE_PERSONALISED_ADS_PROFILE);
                if !allowed {
                    log::debug!("TCF consent missing for vendor or purposes, restricting");
                    return default.restricted();
                }
            }
        }
    }

    default
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
