use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use fastly::http::header;
use fastly::Request;

use sirdata_rtd_common::error::RtdError;
use sirdata_rtd_common::transport::{SignalRequest, SignalTransport};

use crate::backend::ensure_signal_backend;

/// [`SignalTransport`] sending requests through Fastly dynamic backends.
///
/// The edge has no cookie jar of its own. When credentials are allowed the
/// caller's `Cookie` header is forwarded, otherwise nothing identifying is sent.
#[derive(Debug, Default)]
pub struct FastlyTransport {
    cookie: Option<String>,
}

impl FastlyTransport {
    pub fn new(cookie: Option<String>) -> Self {
        Self { cookie }
    }

    fn outgoing_cookie(&self, request: &SignalRequest) -> Option<&str> {
        if request.with_credentials {
            self.cookie.as_deref().filter(|c| !c.is_empty())
        } else {
            None
        }
    }
}

#[async_trait(?Send)]
impl SignalTransport for FastlyTransport {
    async fn fetch(
        &self,
        request: &SignalRequest,
    ) -> Result<http::Response<Vec<u8>>, Report<RtdError>> {
        let backend = ensure_signal_backend(&request.url)?;

        let mut outgoing =
            Request::get(request.url.as_str()).with_header(header::ACCEPT, "application/json");
        if let Some(cookie) = self.outgoing_cookie(request) {
            outgoing.set_header(header::COOKIE, cookie);
        }

        let mut response = outgoing.send(&backend).map_err(|e| {
            Report::new(RtdError::Transport {
                message: format!("request to {} failed: {}", request.url, e),
            })
        })?;
        log::debug!("Sirdata responded with status {}", response.get_status());

        let status = http::StatusCode::from_u16(response.get_status().as_u16()).change_context(
            RtdError::Transport {
                message: "invalid upstream status".to_string(),
            },
        )?;
        let mut converted = http::Response::new(response.take_body_bytes());
        *converted.status_mut() = status;
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(with_credentials: bool) -> SignalRequest {
        SignalRequest {
            url: Url::parse("https://kvt.sddan.com/api/v1/public/p/1/d/1/s").expect("valid url"),
            with_credentials,
        }
    }

    #[test]
    fn forwards_cookie_only_with_credentials() {
        let transport = FastlyTransport::new(Some("sd_uid=abc".to_string()));
        assert_eq!(transport.outgoing_cookie(&request(true)), Some("sd_uid=abc"));
        assert_eq!(transport.outgoing_cookie(&request(false)), None);
    }

    #[test]
    fn empty_cookie_is_not_forwarded() {
        let transport = FastlyTransport::new(Some(String::new()));
        assert_eq!(transport.outgoing_cookie(&request(true)), None);
    }
}
