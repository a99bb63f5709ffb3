// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `particlehub` daemon.
//!
//! Usage: `particlehub [CONFIG.json]`. Without an argument the file named by
//! `PARTICLEHUB_CONFIG` is read, if set. `PARTICLEHUB_*` variables override
//! the file either way.

use std::process::ExitCode;

use particlehub::{Hub, HubConfig};
use tracing_subscriber::EnvFilter;

const ENV_CONFIG: &str = "PARTICLEHUB_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "particlehub stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> particlehub::Result<()> {
    let config = load_config()?;
    config.validate()?;

    let hub = Hub::from_config(&config)?;
    hub.start(Hub::stream_source(&config)?).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C, shutting down");
    }

    hub.shutdown().await
}

fn load_config() -> Result<HubConfig, particlehub::ConfigError> {
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(ENV_CONFIG));

    let config = match path {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };
    config.apply_env()
}
