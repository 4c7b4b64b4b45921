// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue, USER_AGENT,
};
use thiserror::Error;

use crate::{
    application::{
        ApplicationError, RequestOptions,
        public::{Endpoints, PublicClientApplication},
    },
    injector::{AcquireOptions, HeaderInjectingClient, InitiateOptions},
    settings::Settings,
};

#[derive(Debug, Error)]
pub enum ContextBuildError {
    #[error("Failed to construct client")]
    ClientConstruction(#[from] ApplicationError),
    #[error("Both device_authorization_endpoint and token_endpoint must be configured")]
    PartialEndpoints,
    #[error("Header name {0} is not valid")]
    InvalidHeaderName(String, #[source] InvalidHeaderName),
    #[error("Value of header {0} is not valid")]
    InvalidHeaderValue(String, #[source] InvalidHeaderValue),
}

#[derive(Debug)]
pub struct Context {
    pub settings: Settings,
    pub client: HeaderInjectingClient<PublicClientApplication>,
    /// Identification headers sent with every request of the device flow.
    pub headers: HeaderMap,
}

impl Context {
    pub fn new(settings: Settings) -> Result<Self, ContextBuildError> {
        let endpoints = match (
            &settings.device_authorization_endpoint,
            &settings.token_endpoint,
        ) {
            (Some(device_authorization), Some(token)) => Endpoints {
                device_authorization: device_authorization.clone(),
                token: token.clone(),
            },
            (None, None) => Endpoints::from_authority(&settings.authority),
            _ => return Err(ContextBuildError::PartialEndpoints),
        };

        let application = PublicClientApplication::new(settings.client_id.clone(), endpoints)?
            .with_client_capabilities(settings.client_capabilities.clone())
            .with_exclude_scopes(settings.exclude_scopes.clone());

        Ok(Context {
            client: HeaderInjectingClient::new(application),
            headers: request_headers(&settings)?,
            settings,
        })
    }

    pub fn initiate_options(&self) -> InitiateOptions {
        InitiateOptions {
            headers: self.headers.clone(),
            request: self.request_options(),
        }
    }

    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            headers: self.headers.clone(),
            request: self.request_options(),
            ..Default::default()
        }
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.settings.timeout_seconds.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

fn request_headers(settings: &Settings) -> Result<HeaderMap, ContextBuildError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        headers.insert(
            HeaderName::try_from(name.as_str())
                .map_err(|e| ContextBuildError::InvalidHeaderName(name.clone(), e))?,
            HeaderValue::try_from(value.as_str())
                .map_err(|e| ContextBuildError::InvalidHeaderValue(name.clone(), e))?,
        );
    }

    // The dedicated setting wins over a User-Agent given in `headers`.
    if let Some(user_agent) = &settings.user_agent {
        headers.insert(
            USER_AGENT,
            HeaderValue::try_from(user_agent.as_str())
                .map_err(|e| ContextBuildError::InvalidHeaderValue(USER_AGENT.to_string(), e))?,
        );
    }

    Ok(headers)
}
