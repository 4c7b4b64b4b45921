// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub static GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Key under which a serialized [`DeviceFlow`] carries its correlation id.
pub static DEVICE_FLOW_CORRELATION_ID: &str = "_correlation_id";

pub const DEFAULT_INTERVAL: u64 = 5;
pub const DEFAULT_EXPIRES_IN: u64 = 1800;

/// Expiration marker of a device flow, in seconds since the Unix epoch.
///
/// Clones share the same marker. Holding a clone lets a caller stop an
/// in-progress acquisition by calling [`Expiry::expire`]; the polling loop
/// observes it before its next wait step.
#[derive(Clone, Debug, Default)]
pub struct Expiry(Arc<AtomicI64>);

impl Expiry {
    pub fn at(timestamp: i64) -> Self {
        Self(Arc::new(AtomicI64::new(timestamp)))
    }

    pub fn after(seconds: u64) -> Self {
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self::at(Utc::now().timestamp().saturating_add(seconds))
    }

    pub fn timestamp(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, timestamp: i64) {
        self.0.store(timestamp, Ordering::SeqCst);
    }

    pub fn expire(&self) {
        self.set(0);
    }

    pub fn is_expired(&self) -> bool {
        self.timestamp() < Utc::now().timestamp()
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.timestamp())
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Expiry::at)
    }
}

/// A device flow started by the device authorization endpoint.
///
/// Produced by initiation and handed back to acquisition. Apart from the
/// correlation id, which is filled in once right after initiation, callers
/// only ever touch `expires_at`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceFlow {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "default_expires_in", deserialize_with = "lenient_u64")]
    pub expires_in: u64,
    #[serde(default = "default_interval", deserialize_with = "lenient_u64")]
    pub interval: u64,
    #[serde(default)]
    pub expires_at: Expiry,
    #[serde(
        rename = "_correlation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL
}

// Some identity providers send numbers as strings.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(u64),
        Text(String),
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Number(value) => Ok(value),
        Lenient::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// JSON body returned by the token endpoint once polling has finished.
///
/// A successful response carries `access_token`, an error response carries
/// `error` and usually `error_description`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TokenResponse(Map<String, Value>);

impl TokenResponse {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.str_field("access_token")
    }

    pub fn error(&self) -> Option<&str> {
        self.str_field("error")
    }

    pub fn error_description(&self) -> Option<&str> {
        self.str_field("error_description")
    }

    pub fn is_error(&self) -> bool {
        self.0.contains_key("error")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for TokenResponse {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Normalizes a raw token endpoint body before it is handed to callers.
///
/// `refresh_in` is consumed by the client itself and keys starting with `_`
/// are internal bookkeeping.
pub fn clean_up(raw: Map<String, Value>) -> TokenResponse {
    TokenResponse(
        raw.into_iter()
            .filter(|(key, _)| key != "refresh_in" && !key.starts_with('_'))
            .collect(),
    )
}
