use error_stack::Report;
use fastly::http::{header, StatusCode};
use fastly::Response;
use serde_json::json;

use sirdata_rtd_common::error::RtdError;

/// Convert a report into a JSON error response.
pub fn to_error_response(report: Report<RtdError>) -> Response {
    let error = report.current_context();
    log::error!("request failed: {report:?}");

    let status = StatusCode::from_u16(error.status_code().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = json!({ "error": error.user_message() });
    Response::from_status(status)
        .with_header(header::CONTENT_TYPE, "application/json")
        .with_body(body.to_string())
}
