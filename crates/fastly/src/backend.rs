use std::time::Duration;

use error_stack::Report;
use fastly::backend::Backend;
use url::Url;

use sirdata_rtd_common::error::RtdError;

/// Derive a backend name from scheme, host and port.
///
/// `.` and `:` are not allowed in backend names.
fn backend_name(scheme: &str, host: &str, port: u16) -> String {
    format!("sirdata_{scheme}_{host}_{port}").replace(['.', ':'], "_")
}

/// Ensure a dynamic backend exists for the classification host of `url`.
///
/// Backends are created on first use and reused afterwards, so the restricted
/// and standard domains each get their own.
pub fn ensure_signal_backend(url: &Url) -> Result<String, Report<RtdError>> {
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
        Report::new(RtdError::Transport {
            message: format!("missing host in {url}"),
        })
    })?;
    let scheme = url.scheme();
    let port = url.port_or_known_default().unwrap_or(443);
    let name = backend_name(scheme, host, port);
    let target = format!("{host}:{port}");

    let mut builder = Backend::builder(&name, &target)
        .override_host(host)
        .connect_timeout(Duration::from_secs(1))
        .first_byte_timeout(Duration::from_secs(2))
        .between_bytes_timeout(Duration::from_secs(2));
    if scheme.eq_ignore_ascii_case("https") {
        builder = builder.enable_ssl().sni_hostname(host).check_certificate(host);
    }

    match builder.finish() {
        Ok(_) => {
            log::info!("created dynamic backend: {name} -> {target}");
            Ok(name)
        }
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("NameInUse") || msg.contains("already in use") {
                log::debug!("reusing existing dynamic backend: {name}");
                Ok(name)
            } else {
                Err(Report::new(RtdError::Transport {
                    message: format!("dynamic backend creation failed ({name} -> {target}): {msg}"),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_name_is_sanitized() {
        assert_eq!(
            backend_name("https", "kvt.sddan.com", 443),
            "sirdata_https_kvt_sddan_com_443"
        );
    }

    #[test]
    fn restricted_and_standard_hosts_get_distinct_names() {
        assert_ne!(
            backend_name("https", "kvt.sddan.com", 443),
            backend_name("https", "kvt.cookieless-data.com", 443)
        );
    }
}
