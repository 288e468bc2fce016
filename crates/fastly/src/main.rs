use std::str::FromStr;

use error_stack::Report;
use fastly::http::{header, Method, StatusCode};
use fastly::{Error, Request, Response};
use log_fastly::Logger;
use serde_json::json;

use sirdata_rtd_common::error::RtdError;
use sirdata_rtd_common::provider::{SirdataRtdProvider, SUBMODULE_NAME};
use sirdata_rtd_common::settings::Settings;

mod api;
mod backend;
mod error;
mod transport;

use crate::api::{handle_bid_request_data, parse_bid_request_data};
use crate::error::to_error_response;
use crate::transport::FastlyTransport;

#[fastly::main]
fn main(req: Request) -> Result<Response, Error> {
    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            init_logger(log::LevelFilter::Info);
            log::error!("Failed to load settings: {:?}", e);
            return Ok(to_error_response(e));
        }
    };
    let level =
        log::LevelFilter::from_str(&settings.service.log_level).unwrap_or(log::LevelFilter::Info);
    init_logger(level);
    log::debug!("Settings {settings:?}");

    futures::executor::block_on(route_request(&settings, req))
}

async fn route_request(settings: &Settings, req: Request) -> Result<Response, Error> {
    let path = req.get_path().to_string();
    let method = req.get_method().clone();

    let result = match (&method, path.as_str()) {
        (&Method::POST, "/rtd/bid-request-data") => handle_rtd_request(settings, req).await,
        (&Method::GET, "/health") => Ok(json_response(
            StatusCode::OK,
            &json!({ "status": "ok", "submodule": SUBMODULE_NAME }),
        )),
        _ => {
            log::info!("No route for {} {}", method, path);
            Ok(json_response(
                StatusCode::NOT_FOUND,
                &json!({ "error": "Not found" }),
            ))
        }
    };

    result.map_or_else(|e| Ok(to_error_response(e)), Ok)
}

async fn handle_rtd_request(
    settings: &Settings,
    mut req: Request,
) -> Result<Response, Report<RtdError>> {
    let cookie = req.get_header_str(header::COOKIE).map(str::to_string);
    let request = parse_bid_request_data(&req.take_body_bytes())?;

    let provider = SirdataRtdProvider::from_settings(settings);
    let transport = FastlyTransport::new(cookie);
    let response = handle_bid_request_data(&provider, &transport, request).await;

    let body = serde_json::to_value(&response).map_err(|e| {
        Report::new(RtdError::Payload {
            message: format!("Failed to serialize response: {e}"),
        })
    })?;
    Ok(json_response(StatusCode::OK, &body))
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    Response::from_status(status)
        .with_header(header::CONTENT_TYPE, "application/json")
        .with_body(body.to_string())
}

fn init_logger(level: log::LevelFilter) {
    let logger = Logger::builder()
        .default_endpoint("sirdata_rtd_log")
        .max_level(level)
        .build()
        .expect("Failed to build Logger");

    fern::Dispatch::new()
        .level(level)
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .chain(Box::new(logger) as Box<dyn log::Log>)
        .apply()
        .expect("Failed to initialize logger");
}
