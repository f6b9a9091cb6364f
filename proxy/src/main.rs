// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metadata_proxy::application::Application;
use metadata_proxy::configuration::ProxyOptions;
use metadata_proxy::constants;
use metadata_proxy::pods::PodIndex;
use metadata_proxy::retry::{self, Backoff};
use metadata_proxy::sts::StsIssuer;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // ANSI color codes are noise once logs are shipped off the node.
        .with_ansi(false)
        // the log collector adds the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from arguments and environment variables
    let options = ProxyOptions::parse();

    tracing::info!("[proxy] {:?}", &options);

    let pods = Arc::new(PodIndex::new());

    if let Some(path) = options.pods_file.clone() {
        pods.load_file(&path)
            .await
            .with_context(|| format!("loading pods from {}", path.display()))?;

        tracing::info!(
            "[proxy] refreshing pods from {} every {:#?}",
            path.display(),
            constants::REFRESH_PODS_INTERVAL
        );
        let pods = pods.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(constants::REFRESH_PODS_INTERVAL).await;
                if let Err(e) = pods.load_file(&path).await {
                    tracing::error!("[proxy] failed to refresh pods: {}", e);
                }
            }
        });
    } else {
        tracing::warn!("[proxy] no pods file, pods must be supplied by a watcher");
    }

    let issuer = Arc::new(StsIssuer::new(&options.sts).await);
    let max_elapsed_time = options.server.max_elapsed_time;
    let server_config = options.server.clone();

    let application = Application::build(options.server, pods, issuer).await?;
    let base_url = server_config.local_base_url(application.port());
    let shutdown = application.shutdown_handle();

    let credentials = application.credentials();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(constants::CACHE_SWEEP_INTERVAL).await;
            let evicted = credentials.evict_expired();
            tracing::debug!("[proxy] evicted {} expired credentials", evicted);
        }
    });

    let server = tokio::spawn(application.run_until_stopped());

    if let Err(e) = wait_until_healthy(&base_url, max_elapsed_time).await {
        tracing::error!("[proxy] metadata service unreachable: {:#}", e);
        let _ = shutdown
            .stop(Instant::now() + constants::SHUTDOWN_GRACE_PERIOD)
            .await;
        let _ = server.await;
        return Err(e);
    }

    tracing::info!("[proxy] healthy, serving credentials");

    tokio::signal::ctrl_c().await?;

    tracing::info!("[proxy] received shutdown signal");
    if let Err(e) = shutdown
        .stop(Instant::now() + constants::SHUTDOWN_GRACE_PERIOD)
        .await
    {
        tracing::warn!("[proxy] {}", e);
    }

    server.await??;

    Ok(())
}

/// Polls our own `/health` until the metadata service answers through it.
async fn wait_until_healthy(
    base_url: &str,
    max_elapsed_time: std::time::Duration,
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().no_proxy().build()?;
    let url = format!("{base_url}/health");
    let backoff = Backoff::new(max_elapsed_time);

    retry::retry(&backoff, "health", || {
        let request = client.get(&url);
        async move {
            request.send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(())
        }
    })
    .await?;

    Ok(())
}
