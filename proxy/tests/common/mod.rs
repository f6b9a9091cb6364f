// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Shared fixtures: a stub metadata service, a stub issuer and default configs.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use chrono::Utc;
use metadata_proxy::configuration::ServerConfig;
use metadata_proxy::credentials::{CredentialsIssuer, IssueError};
use metadata_proxy::models::Credentials;

/// Credentials of the node itself, which no pod may ever see.
pub const NODE_CREDENTIALS: &str = "NODE-SECRET-CREDS";
pub const NODE_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/node-role";

type IssueFn = dyn Fn(&str) -> Result<Credentials, IssueError> + Send + Sync;

/// Issuer that counts calls and answers with a fixed function.
pub struct StubIssuer {
    calls: AtomicUsize,
    delay: Duration,
    issue: Box<IssueFn>,
}

impl StubIssuer {
    pub fn new(
        issue: impl Fn(&str) -> Result<Credentials, IssueError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            issue: Box::new(issue),
        }
    }

    /// Issues credentials whose access key is `access_key_id`.
    pub fn with_access_key(access_key_id: &'static str) -> Self {
        Self::new(move |_| Ok(credentials(access_key_id)))
    }

    pub fn failing(error: IssueError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialsIssuer for StubIssuer {
    async fn issue(&self, role: &str) -> Result<Credentials, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.issue)(role)
    }
}

pub fn credentials(access_key_id: &str) -> Credentials {
    Credentials::new(
        access_key_id,
        "secret",
        "token",
        Utc::now() + chrono::Duration::hours(1),
    )
}

/// Serves a minimal metadata service on an ephemeral port and returns its base URL.
pub async fn stub_metadata(instance_id: &'static str) -> String {
    let app = Router::new()
        .route(
            "/latest/meta-data/instance-id",
            get(move || async move { instance_id }),
        )
        .route(
            "/latest/meta-data/local-ipv4",
            get(|| async { (StatusCode::OK, "10.0.0.10") }),
        )
        .route(
            NODE_CREDENTIALS_PATH,
            get(|| async { NODE_CREDENTIALS }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

/// Base URL of a port nothing listens on.
pub async fn unreachable_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn config(metadata_endpoint: String) -> ServerConfig {
    ServerConfig {
        metadata_endpoint,
        allow_ip_query: true,
        max_elapsed_time: Duration::from_secs(1),
        ..ServerConfig::default()
    }
}

pub fn issuer(stub: StubIssuer) -> Arc<StubIssuer> {
    Arc::new(stub)
}
