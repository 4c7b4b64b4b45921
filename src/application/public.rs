// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tap::TapFallible;
use tracing::instrument;

use crate::{
    application::{ApplicationError, DeviceFlowApplication, RequestOptions},
    oauth::{DeviceFlow, Expiry, GRANT_TYPE_DEVICE_CODE},
    scope::decorate_scope,
    telemetry::{ApiId, TelemetryBuffer, TelemetryContext, new_correlation_id},
};

static CLIENT_SKU: &str = env!("CARGO_PKG_NAME");
static CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const SLOW_DOWN_INCREMENT: u64 = 5;
const MAX_INTERVAL: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub device_authorization: String,
    pub token: String,
}

impl Endpoints {
    /// Derives the v2.0 endpoints of an Entra ID style authority, e.g.
    /// `https://login.microsoftonline.com/common`.
    pub fn from_authority(authority: &str) -> Self {
        let base = authority.trim_end_matches('/');
        Self {
            device_authorization: format!("{base}/oauth2/v2.0/devicecode"),
            token: format!("{base}/oauth2/v2.0/token"),
        }
    }
}

/// Public (secretless) client running the device authorization grant over
/// HTTP.
#[derive(Debug)]
pub struct PublicClientApplication {
    http: Client,
    client_id: String,
    endpoints: Endpoints,
    client_capabilities: Vec<String>,
    exclude_scopes: Vec<String>,
    default_headers: HeaderMap,
    telemetry: TelemetryBuffer,
}

impl PublicClientApplication {
    pub fn new(
        client_id: impl Into<String>,
        endpoints: Endpoints,
    ) -> Result<Self, ApplicationError> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            HeaderName::from_static("x-client-sku"),
            HeaderValue::from_static(CLIENT_SKU),
        );
        default_headers.insert(
            HeaderName::from_static("x-client-ver"),
            HeaderValue::from_static(CLIENT_VERSION),
        );
        default_headers.insert(
            HeaderName::from_static("x-client-os"),
            HeaderValue::from_static(std::env::consts::OS),
        );

        Ok(Self {
            http,
            client_id: client_id.into(),
            endpoints,
            client_capabilities: Vec::new(),
            exclude_scopes: Vec::new(),
            default_headers,
            telemetry: TelemetryBuffer::new(),
        })
    }

    pub fn with_client_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.client_capabilities = capabilities;
        self
    }

    pub fn with_exclude_scopes(mut self, exclude_scopes: Vec<String>) -> Self {
        self.exclude_scopes = exclude_scopes;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn telemetry(&self) -> &TelemetryBuffer {
        &self.telemetry
    }

    fn request_headers(&self, headers: HeaderMap) -> HeaderMap {
        let mut request_headers = self.default_headers.clone();
        request_headers.extend(headers);
        request_headers
    }

    // Identity providers answer errors with a JSON body and a 4xx status, so
    // the body is returned whatever the status is as long as it parses.
    async fn post_form(
        &self,
        url: &str,
        headers: HeaderMap,
        form: &[(String, String)],
        options: &RequestOptions,
    ) -> Result<(StatusCode, Map<String, Value>), ApplicationError> {
        let mut request = self.http.post(url).headers(headers).form(form);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.tap_err(|err| {
            tracing::error!(?err, url, "Failed to send request");
        })?;
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text().await?;

        match serde_json::from_str(&text) {
            Ok(body) => Ok((status, body)),
            Err(err) => {
                tracing::error!(?err, %url, %status, "Response body is not a JSON object");
                Err(ApplicationError::UnexpectedResponse(url, status, text))
            }
        }
    }
}

impl DeviceFlowApplication for PublicClientApplication {
    fn client_capabilities(&self) -> &[String] {
        &self.client_capabilities
    }

    fn new_correlation_id(&self) -> String {
        new_correlation_id()
    }

    fn decorate_scope(&self, scopes: &[String]) -> Result<Vec<String>, ApplicationError> {
        Ok(decorate_scope(scopes, &self.exclude_scopes)?)
    }

    fn build_telemetry_context(
        &self,
        api_id: ApiId,
        correlation_id: Option<&str>,
    ) -> TelemetryContext {
        TelemetryContext::new(self.telemetry.clone(), api_id, correlation_id)
    }

    #[instrument(skip(self, headers, options), fields(endpoint = %self.endpoints.device_authorization))]
    async fn initiate_device_flow(
        &self,
        scope: Vec<String>,
        headers: HeaderMap,
        options: RequestOptions,
    ) -> Result<DeviceFlow, ApplicationError> {
        let form = [
            ("client_id".to_string(), self.client_id.clone()),
            ("scope".to_string(), scope.join(" ")),
        ];
        let (status, mut body) = self
            .post_form(
                &self.endpoints.device_authorization,
                self.request_headers(headers),
                &form,
                &options,
            )
            .await?;

        if let Some(error) = body.remove("error") {
            let error = match error {
                Value::String(error) => error,
                error => error.to_string(),
            };
            let description = body
                .remove("error_description")
                .and_then(|description| description.as_str().map(str::to_owned));
            tracing::info!(%error, "Device authorization request was rejected");
            return Err(ApplicationError::DeviceAuthorization { error, description });
        }

        let body = Value::Object(body);
        let mut flow = DeviceFlow::deserialize(&body).map_err(|err| {
            tracing::error!(?err, %status, "Failed to parse device authorization response");
            ApplicationError::UnexpectedResponse(
                self.endpoints.device_authorization.clone(),
                status,
                body.to_string(),
            )
        })?;
        flow.expires_at = Expiry::after(flow.expires_in);

        tracing::info!(
            expires_in = flow.expires_in,
            interval = flow.interval,
            "Started device flow"
        );

        Ok(flow)
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoints.token, correlation_id = ?flow.correlation_id))]
    async fn obtain_token_by_device_flow(
        &self,
        flow: &DeviceFlow,
        mut data: Map<String, Value>,
        headers: HeaderMap,
        options: RequestOptions,
    ) -> Result<Map<String, Value>, ApplicationError> {
        data.insert("client_id".to_string(), self.client_id.clone().into());
        data.insert("device_code".to_string(), flow.device_code.clone().into());
        data.insert("grant_type".to_string(), GRANT_TYPE_DEVICE_CODE.into());
        let form = form_fields(data);
        let headers = self.request_headers(headers);

        let mut interval = flow.interval.clamp(1, MAX_INTERVAL);
        loop {
            let (_, body) = self
                .post_form(&self.endpoints.token, headers.clone(), &form, &options)
                .await?;

            let error = body.get("error").and_then(Value::as_str).map(str::to_owned);
            match error.as_deref() {
                Some("authorization_pending") => {}
                Some("slow_down") => interval = slowed_down(interval),
                _ => return Ok(body),
            }
            tracing::debug!(?error, interval, "Device flow not completed yet");

            // Wait in one second steps so an expired flow is noticed quickly.
            for _ in 0..interval {
                if flow.expires_at.is_expired() {
                    tracing::info!("Device flow expired, stopped polling");
                    return Ok(body);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

// Providers choose the interval, so it is kept within bounds instead of trusted.
fn slowed_down(interval: u64) -> u64 {
    interval
        .saturating_add(SLOW_DOWN_INCREMENT)
        .min(MAX_INTERVAL)
}

fn form_fields(data: Map<String, Value>) -> Vec<(String, String)> {
    data.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(value) => Some((key, value)),
            value => Some((key, value.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_endpoints_from_authority() {
        let endpoints = Endpoints::from_authority("https://login.microsoftonline.com/common/");

        assert_eq!(
            endpoints.device_authorization,
            "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode"
        );
        assert_eq!(
            endpoints.token,
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_default_headers_overridden_by_caller() {
        let client = PublicClientApplication::new(
            "client-id",
            Endpoints::from_authority("https://login.example.com/tenant"),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-client-os", HeaderValue::from_static("Windows"));
        headers.insert("user-agent", HeaderValue::from_static("agent/1.0"));

        let merged = client.request_headers(headers);

        assert_eq!(merged.get("x-client-os").unwrap(), "Windows");
        assert_eq!(merged.get("user-agent").unwrap(), "agent/1.0");
        assert_eq!(merged.get("x-client-sku").unwrap(), CLIENT_SKU);
    }

    #[test]
    fn test_slowed_down_interval() {
        assert_eq!(slowed_down(1), 6);
        assert_eq!(slowed_down(58), MAX_INTERVAL);
        assert_eq!(slowed_down(u64::MAX), MAX_INTERVAL);
    }

    #[test]
    fn test_form_fields() {
        let Value::Object(data) = json!({
            "code": "abc",
            "claims": null,
            "max_age": 30,
        }) else {
            unreachable!()
        };

        let mut fields = form_fields(data);
        fields.sort();

        assert_eq!(
            fields,
            vec![
                ("code".to_string(), "abc".to_string()),
                ("max_age".to_string(), "30".to_string()),
            ]
        );
    }
}
