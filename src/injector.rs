// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use tap::TapFallible;
use tracing::instrument;

use crate::{
    application::{ApplicationError, DeviceFlowApplication, RequestOptions},
    claims::merge_claims_challenge_and_capabilities,
    oauth::{DeviceFlow, TokenResponse, clean_up},
    telemetry::{ApiId, CLIENT_REQUEST_ID},
};

#[derive(Clone, Debug, Default)]
pub struct InitiateOptions {
    /// Extra headers for the device authorization request, e.g. a
    /// `User-Agent` identifying the platform.
    pub headers: HeaderMap,
    pub request: RequestOptions,
}

#[derive(Clone, Debug, Default)]
pub struct AcquireOptions {
    /// Extra headers sent with every poll of the token endpoint.
    pub headers: HeaderMap,
    /// Extra form fields sent with every poll of the token endpoint.
    pub data: Map<String, Value>,
    pub request: RequestOptions,
}

/// Runs the device flow of an underlying application while letting callers
/// attach their own headers to both legs of the handshake.
///
/// Caller headers are kept except where they collide with the correlation and
/// telemetry headers, which always carry the values computed here.
#[derive(Debug)]
pub struct HeaderInjectingClient<A> {
    application: A,
}

impl<A> HeaderInjectingClient<A>
where
    A: DeviceFlowApplication,
{
    pub fn new(application: A) -> Self {
        Self { application }
    }

    pub fn application(&self) -> &A {
        &self.application
    }

    /// Starts a device flow. The returned flow carries the correlation id sent
    /// with the request so the matching acquisition can reuse it.
    #[instrument(skip(self, options))]
    pub async fn initiate_device_flow(
        &self,
        scopes: &[String],
        options: InitiateOptions,
    ) -> Result<DeviceFlow, ApplicationError> {
        let correlation_id = self.application.new_correlation_id();

        let mut headers = options.headers;
        headers.insert(
            HeaderName::from_static(CLIENT_REQUEST_ID),
            HeaderValue::from_str(&correlation_id)?,
        );

        let scope = self.application.decorate_scope(scopes)?;
        let mut flow = self
            .application
            .initiate_device_flow(scope, headers, options.request)
            .await
            .tap_err(|err| {
                tracing::error!(?err, %correlation_id, "Failed to initiate device flow");
            })?;
        flow.correlation_id = Some(correlation_id);

        Ok(flow)
    }

    /// Polls for a token on a flow started by
    /// [`HeaderInjectingClient::initiate_device_flow`].
    ///
    /// Returns once the user completed or declined the sign-in, the device
    /// code expired, or the flow's `expires_at` was moved into the past.
    /// Protocol errors are reported in the returned response, not as `Err`.
    #[instrument(skip_all, fields(correlation_id = ?flow.correlation_id))]
    pub async fn acquire_token_by_device_flow(
        &self,
        flow: &DeviceFlow,
        claims_challenge: Option<&str>,
        options: AcquireOptions,
    ) -> Result<TokenResponse, ApplicationError> {
        if flow.correlation_id.is_none() {
            tracing::warn!("Device flow carries no correlation id, a new one will be used");
        }
        let telemetry = self.application.build_telemetry_context(
            ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
            flow.correlation_id.as_deref(),
        );

        let mut headers = options.headers;
        headers.extend(telemetry.generate_headers()?);

        let mut data = options.data;
        // Both names are accepted by identity providers, some still want `code`.
        data.insert("device_code".to_string(), flow.device_code.clone().into());
        data.insert("code".to_string(), flow.device_code.clone().into());
        match merge_claims_challenge_and_capabilities(
            self.application.client_capabilities(),
            claims_challenge,
        )? {
            Some(claims) => data.insert("claims".to_string(), claims.into()),
            None => data.remove("claims"),
        };

        let response = clean_up(
            self.application
                .obtain_token_by_device_flow(flow, data, headers, options.request)
                .await?,
        );
        telemetry.update_telemetry(&response);

        match response.error() {
            Some(error) => tracing::info!(error, "Device flow finished with an error"),
            None => tracing::info!("Device flow completed"),
        }

        Ok(response)
    }
}
