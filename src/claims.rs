// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("Claims challenge is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Claims challenge must be a JSON object")]
    NotAnObject,
    #[error("Claims for {0} must be a JSON object")]
    InvalidTarget(String),
}

/// Merges the client capabilities into a claims challenge.
///
/// Capabilities are expressed as `{"access_token": {"xms_cc": {"values": [..]}}}`
/// and added to whatever the challenge already requests. Without capabilities
/// the challenge is passed through untouched.
pub fn merge_claims_challenge_and_capabilities(
    capabilities: &[String],
    claims_challenge: Option<&str>,
) -> Result<Option<String>, ClaimsError> {
    if capabilities.is_empty() {
        return Ok(claims_challenge.map(str::to_owned));
    }

    let mut claims = match claims_challenge {
        Some(challenge) if !challenge.trim().is_empty() => {
            match serde_json::from_str::<Value>(challenge).map_err(ClaimsError::InvalidJson)? {
                Value::Object(claims) => claims,
                _ => return Err(ClaimsError::NotAnObject),
            }
        }
        _ => Map::new(),
    };

    let target = claims
        .entry("access_token")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ClaimsError::InvalidTarget("access_token".to_string()))?;
    target.insert("xms_cc".to_string(), json!({ "values": capabilities }));

    Ok(Some(Value::Object(claims).to_string()))
}
