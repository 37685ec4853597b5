// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printmeter — metered print submission service
//
// Entry point. Initialises logging and backend services, runs the maintenance
// task, and waits for Ctrl-C.

use printmeter_app::services::app_services::AppServices;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("printmeter starting");

    let services = match AppServices::init() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "service initialisation failed");
            std::process::exit(1);
        }
    };

    match services.list_printers(None).await {
        Ok(printers) => {
            for printer in &printers {
                tracing::info!(name = %printer.name, uri = %printer.uri, "printer available");
            }
        }
        Err(e) => tracing::warn!(error = %e, "printer listing unavailable"),
    }

    services.start_maintenance().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
    }

    tracing::info!("printmeter shutting down");
    if let Err(e) = services.stop_maintenance().await {
        tracing::warn!(error = %e, "maintenance task did not stop cleanly");
    }
}
