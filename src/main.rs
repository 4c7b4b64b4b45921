// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use device_login::{context::Context, settings::Settings};
use tap::TapFallible;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let mut args = std::env::args();
    let _ = args.next();
    let config_path = args.next();
    let settings = Settings::new(config_path.map(|path| vec![path]))?;

    // stdout is reserved for the token response
    let (writer, _guard) = if let Some(log_directory) = &settings.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_directory, "device-login.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        NonBlocking::new(std::io::stderr())
    };

    let _subscriber = tracing_subscriber::fmt()
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .json()
        .init();

    let context = Context::new(settings)?;

    tracing::info!("Constructed context");

    let flow = context
        .client
        .initiate_device_flow(&context.settings.scopes, context.initiate_options())
        .await
        .tap_err(|err| {
            tracing::error!(error = ?err, "Failed to start device flow");
        })?;

    eprintln!(
        "{}",
        flow.message.clone().unwrap_or_else(|| format!(
            "To sign in, open {} and enter the code {}",
            flow.verification_uri, flow.user_code
        ))
    );

    // Ctrl-C expires the flow, which ends polling at its next step.
    let expiry = flow.expires_at.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, abandoning device flow");
            expiry.expire();
        }
    });

    let response = context
        .client
        .acquire_token_by_device_flow(
            &flow,
            context.settings.claims_challenge.as_deref(),
            context.acquire_options(),
        )
        .await
        .tap_err(|err| {
            tracing::error!(error = ?err, "Failed to acquire token");
        })?;

    if let Some(error) = response.error() {
        anyhow::bail!(
            "Sign-in failed with {error}: {}",
            response.error_description().unwrap_or_default()
        );
    }

    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
