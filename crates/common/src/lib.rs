//! Sirdata real-time data provider.
//!
//! This crate holds the runtime-independent part of the provider: consent
//! resolution, payload parsing, signal merging and distribution to bidders.
//! The Fastly edge service in `sirdata-rtd-fastly` supplies the HTTP
//! transport and exposes the provider over HTTP.
//!
//! # Modules
//!
//! - [`bidders`]: Built-in bidder adapters and their registry
//! - [`consent`]: Consent resolution into endpoint domain and parameters
//! - [`distribute`]: Distribution of signals to ad units, bidders and GPT slots
//! - [`error`]: Error types and error handling utilities
//! - [`host`]: Host configuration and tag library capabilities
//! - [`models`]: Ad unit and bid target shapes
//! - [`payload`]: Classification service response parsing
//! - [`provider`]: The submodule entry points
//! - [`settings`]: Configuration management and validation
//! - [`signals`]: Merging of segments and categories into one list
//! - [`test_support`]: Testing utilities and fakes
//! - [`transport`]: Outbound request building and the transport seam

pub mod bidders;
pub mod consent;
pub mod distribute;
pub mod error;
pub mod host;
pub mod models;
pub mod payload;
pub mod provider;
pub mod settings;
pub mod signals;
pub mod transport;
