// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub client_id: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    pub device_authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub exclude_scopes: Vec<String>,
    #[serde(default)]
    pub client_capabilities: Vec<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub claims_challenge: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub log_directory: Option<String>,
}

fn default_authority() -> String {
    "https://login.microsoftonline.com/common".to_string()
}

impl Settings {
    pub fn new(config_sources: Option<Vec<String>>) -> Result<Self, ConfigError> {
        let mut config =
            Config::builder().add_source(File::with_name("settings.toml").required(false));

        for source in config_sources.unwrap_or_default() {
            config = config.add_source(File::with_name(&source).required(false));
        }

        config.build()?.try_deserialize()
    }
}
