// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use reqwest::{
    StatusCode,
    header::{HeaderMap, InvalidHeaderValue},
};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    claims::ClaimsError,
    oauth::DeviceFlow,
    scope::ReservedScopeError,
    telemetry::{ApiId, TelemetryContext},
};

pub mod public;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("HTTP error")]
    Http(#[from] reqwest::Error),
    #[error("Request to {0} failed with status {1}: {2}")]
    UnexpectedResponse(String, StatusCode, String),
    #[error("Device authorization was rejected with {error}")]
    DeviceAuthorization {
        error: String,
        description: Option<String>,
    },
    #[error(transparent)]
    ReservedScope(#[from] ReservedScopeError),
    #[error("Failed to merge the claims challenge with the client capabilities")]
    Claims(#[from] ClaimsError),
    #[error("Header value is not valid")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
}

/// Settings applied to each HTTP request, passed through to the client as is.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub query: Vec<(String, String)>,
}

/// A client that knows how to run the OAuth 2.0 device authorization grant
/// against one identity provider.
pub trait DeviceFlowApplication {
    fn client_capabilities(&self) -> &[String];

    fn new_correlation_id(&self) -> String;

    fn decorate_scope(&self, scopes: &[String]) -> Result<Vec<String>, ApplicationError>;

    fn build_telemetry_context(
        &self,
        api_id: ApiId,
        correlation_id: Option<&str>,
    ) -> TelemetryContext;

    /// Requests a device code. Sends exactly the given headers on top of the
    /// client's own defaults.
    async fn initiate_device_flow(
        &self,
        scope: Vec<String>,
        headers: HeaderMap,
        options: RequestOptions,
    ) -> Result<DeviceFlow, ApplicationError>;

    /// Polls the token endpoint until the flow completes, fails, or its
    /// expiration marker passes. Returns the raw body of the last attempt.
    async fn obtain_token_by_device_flow(
        &self,
        flow: &DeviceFlow,
        data: Map<String, Value>,
        headers: HeaderMap,
        options: RequestOptions,
    ) -> Result<Map<String, Value>, ApplicationError>;
}
