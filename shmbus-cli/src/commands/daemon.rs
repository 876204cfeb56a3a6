// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmbus daemon` command - Run the discovery daemon.

use shmbus_core::{ConfigLoader, DiscoveryDaemon, Endpoint};

pub async fn execute(
    config_path: &str,
    socket: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ConfigLoader::load_or_default(config_path)?;
    if let Some(socket) = socket {
        config.daemon.socket_path = Endpoint::new(socket)?;
    }

    let mut daemon = DiscoveryDaemon::bind(&config.daemon)?;

    println!("Discovery daemon listening on {}", daemon.endpoint());
    println!("Press Ctrl+C to stop...");

    daemon
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!("Discovery daemon stopped.");
    Ok(())
}
