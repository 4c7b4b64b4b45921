// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{
    collections::VecDeque,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard},
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use uuid::Uuid;

use crate::oauth::TokenResponse;

pub static CLIENT_REQUEST_ID: &str = "client-request-id";
pub static CLIENT_CURRENT_TELEMETRY: &str = "x-client-current-telemetry";
pub static CLIENT_LAST_TELEMETRY: &str = "x-client-last-telemetry";

static SCHEMA_VERSION: &str = "4";
const NON_SILENT_CALL: u8 = 0;
const MAX_RECORDED_FAILURES: usize = 50;

/// Identifies the public operation a request was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApiId(u16);

impl ApiId {
    pub const ACQUIRE_TOKEN_BY_DEVICE_FLOW: ApiId = ApiId(622);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }
}

impl Display for ApiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Default)]
struct Failures {
    requests: VecDeque<(ApiId, String)>,
    errors: VecDeque<String>,
}

/// Failures that have not yet been reported to the identity provider.
///
/// Shared by every [`TelemetryContext`] built from the same client, so the
/// next request can report what went wrong in the previous ones.
#[derive(Clone, Debug, Default)]
pub struct TelemetryBuffer {
    failures: Arc<Mutex<Failures>>,
}

impl TelemetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_failures(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> MutexGuard<'_, Failures> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Telemetry scoped to one call and one correlation id.
#[derive(Debug)]
pub struct TelemetryContext {
    buffer: TelemetryBuffer,
    api_id: ApiId,
    correlation_id: String,
}

impl TelemetryContext {
    /// Builds a context, minting a fresh correlation id when none is given.
    pub fn new(buffer: TelemetryBuffer, api_id: ApiId, correlation_id: Option<&str>) -> Self {
        Self {
            buffer,
            api_id,
            correlation_id: correlation_id
                .map(str::to_owned)
                .unwrap_or_else(new_correlation_id),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn generate_headers(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let current = format!("{SCHEMA_VERSION}|{},{NON_SILENT_CALL}|", self.api_id);
        let last = {
            let failures = self.buffer.lock();
            let requests = failures
                .requests
                .iter()
                .map(|(api_id, correlation_id)| format!("{api_id},{correlation_id}"))
                .collect::<Vec<_>>()
                .join(",");
            let errors = failures
                .errors
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(",");
            format!("{SCHEMA_VERSION}|0|{requests}|{errors}|")
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(CLIENT_REQUEST_ID),
            HeaderValue::from_str(&self.correlation_id)?,
        );
        headers.insert(
            HeaderName::from_static(CLIENT_CURRENT_TELEMETRY),
            HeaderValue::from_str(&current)?,
        );
        headers.insert(
            HeaderName::from_static(CLIENT_LAST_TELEMETRY),
            HeaderValue::from_str(&last)?,
        );
        Ok(headers)
    }

    /// Records the outcome of the call. Errors are buffered for the next
    /// request, a success means the buffer was delivered and clears it.
    pub fn update_telemetry(&self, response: &TokenResponse) {
        if response.is_empty() {
            return;
        }

        let mut failures = self.buffer.lock();
        if !response.is_error() {
            failures.requests.clear();
            failures.errors.clear();
            return;
        }

        if failures.requests.len() == MAX_RECORDED_FAILURES {
            failures.requests.pop_front();
            failures.errors.pop_front();
        }
        failures
            .requests
            .push_back((self.api_id, self.correlation_id.clone()));
        failures.errors.push_back(
            response
                .error()
                .map(sanitize)
                .unwrap_or_else(|| "unknown".to_string()),
        );
    }
}

// Errors are joined with `,` and `|` inside a header value.
fn sanitize(error: &str) -> String {
    error
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != ',' && *c != '|')
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(value: serde_json::Value) -> TokenResponse {
        serde_json::from_value(value).unwrap()
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }

    #[test]
    fn test_context_mints_missing_correlation_id() {
        let context = TelemetryContext::new(
            TelemetryBuffer::new(),
            ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
            None,
        );
        assert!(Uuid::parse_str(context.correlation_id()).is_ok());
    }

    #[test]
    fn test_generate_headers() {
        let context = TelemetryContext::new(
            TelemetryBuffer::new(),
            ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
            Some("corr-1"),
        );

        let headers = context.generate_headers().unwrap();

        assert_eq!(header(&headers, CLIENT_REQUEST_ID), "corr-1");
        assert_eq!(header(&headers, CLIENT_CURRENT_TELEMETRY), "4|622,0|");
        assert_eq!(header(&headers, CLIENT_LAST_TELEMETRY), "4|0|||");
    }

    #[test]
    fn test_failures_reported_until_success() {
        let buffer = TelemetryBuffer::new();
        let first = TelemetryContext::new(
            buffer.clone(),
            ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
            Some("corr-1"),
        );
        first.update_telemetry(&response(json!({ "error": "expired_token" })));

        let second = TelemetryContext::new(
            buffer.clone(),
            ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
            Some("corr-2"),
        );
        let headers = second.generate_headers().unwrap();
        assert_eq!(
            header(&headers, CLIENT_LAST_TELEMETRY),
            "4|0|622,corr-1|expired_token|"
        );

        second.update_telemetry(&response(json!({ "access_token": "at" })));
        assert_eq!(buffer.pending_failures(), 0);
    }

    #[test]
    fn test_empty_response_is_ignored() {
        let buffer = TelemetryBuffer::new();
        let context =
            TelemetryContext::new(buffer.clone(), ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW, None);
        context.update_telemetry(&response(json!({ "error": "access_denied" })));
        context.update_telemetry(&TokenResponse::default());
        assert_eq!(buffer.pending_failures(), 1);
    }

    #[test]
    fn test_failure_buffer_is_bounded() {
        let buffer = TelemetryBuffer::new();
        for n in 0..(MAX_RECORDED_FAILURES + 5) {
            TelemetryContext::new(
                buffer.clone(),
                ApiId::ACQUIRE_TOKEN_BY_DEVICE_FLOW,
                Some(&format!("corr-{n}")),
            )
            .update_telemetry(&response(json!({ "error": "access_denied" })));
        }
        assert_eq!(buffer.pending_failures(), MAX_RECORDED_FAILURES);
    }

    #[test]
    fn test_error_codes_are_sanitized() {
        assert_eq!(sanitize("bad,error|code\n"), "baderrorcode");
    }
}
