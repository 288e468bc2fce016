//! Rubicon (Magnite) adapter: ortb2 site/user data in the bidder override config.
//!
//! Bidder-specific ortb2 overrides need host library 4.3 or later. On older or
//! unknown versions the adapter does nothing and reports success.

use std::sync::Arc;

use error_stack::Report;
use serde_json::json;

use crate::bidders::BidderAdapter;
use crate::error::RtdError;
use crate::host::HostConfig;
use crate::models::BidTarget;
use crate::signals::{MergedSignals, SIGNAL_KEY};

const RUBICON_BIDDER_CODE: &str = "rubicon";
const MIN_HOST_VERSION: (u64, u64) = (4, 3);

pub struct RubiconAdapter;

#[must_use]
pub fn register() -> Arc<dyn BidderAdapter> {
    Arc::new(RubiconAdapter)
}

/// Parse `major.minor` out of versions like `v8.12.0` or `4.3.0-pre`.
fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let trimmed = version.trim().trim_start_matches(['v', 'V']);
    let mut parts = trimmed.split('.');
    let major = leading_number(parts.next()?)?;
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    Some((major, minor))
}

fn leading_number(part: &str) -> Option<u64> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn supports_bidder_ortb2(host: &dyn HostConfig) -> bool {
    host.library_version()
        .and_then(parse_major_minor)
        .is_some_and(|version| version >= MIN_HOST_VERSION)
}

impl BidderAdapter for RubiconAdapter {
    fn bidder_code(&self) -> &'static str {
        RUBICON_BIDDER_CODE
    }

    fn apply(
        &self,
        _bid: &mut BidTarget,
        signals: &MergedSignals,
        host: &mut dyn HostConfig,
    ) -> Result<(), Report<RtdError>> {
        if !supports_bidder_ortb2(host) {
            log::debug!(
                "host version {:?} does not support bidder ortb2, skipping rubicon",
                host.library_version()
            );
            return Ok(());
        }

        host.set_bidder_config(
            &[RUBICON_BIDDER_CODE.to_string()],
            json!({
                "ortb2": {
                    "site": { "ext": { "data": { SIGNAL_KEY: signals.categories } } },
                    "user": { "ext": { "data": { SIGNAL_KEY: signals.segments } } }
                }
            }),
        );
        Ok(())
    }
}
