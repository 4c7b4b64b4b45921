// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OAuth 2.0 device authorization grant with caller-supplied request headers.
//!
//! [`HeaderInjectingClient`] wraps a [`DeviceFlowApplication`] so that both
//! the device authorization request and every token poll carry the caller's
//! identification headers (typically a `User-Agent` naming the platform)
//! alongside the correlation and telemetry headers the identity provider
//! expects.

pub mod application;
pub mod claims;
pub mod context;
pub mod injector;
pub mod oauth;
pub mod scope;
pub mod settings;
pub mod telemetry;

pub use application::{
    ApplicationError, DeviceFlowApplication, RequestOptions,
    public::{Endpoints, PublicClientApplication},
};
pub use injector::{AcquireOptions, HeaderInjectingClient, InitiateOptions};
pub use oauth::{DeviceFlow, Expiry, TokenResponse};
