// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::configuration::ServerConfig;
use crate::credentials::{CredentialsCache, CredentialsIssuer};
use crate::errors::AppError;
use crate::forwarder::Forwarder;
use crate::pods::PodFinder;
use crate::retry::Backoff;
use crate::routes;

pub struct AppState {
    pub config: ServerConfig,
    pub pods: Arc<dyn PodFinder>,
    pub credentials: Arc<CredentialsCache>,
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        pods: Arc<dyn PodFinder>,
        issuer: Arc<dyn CredentialsIssuer>,
    ) -> Result<Self, AppError> {
        let forwarder = Forwarder::new(&config.metadata_endpoint)
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        let credentials = Arc::new(CredentialsCache::new(
            issuer,
            Backoff::new(config.max_elapsed_time),
        ));
        Ok(Self {
            config,
            pods,
            credentials,
            forwarder,
        })
    }
}

/// Builds the metadata router. Static paths win over the IAM patterns, which
/// win over the passthrough fallback.
pub fn create_router(state: Arc<AppState>) -> Router {
    let credentials_path = routes::SECURITY_CREDENTIALS_PATH;

    Router::new()
        .route("/ping", get(routes::ping))
        .route("/health", get(routes::health))
        .route(credentials_path, get(routes::role_name))
        .route(&format!("{credentials_path}/"), get(routes::role_name))
        .route(
            &format!("{credentials_path}/{{role}}"),
            get(routes::role_credentials),
        )
        .fallback(routes::passthrough)
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Aborted,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: Arc<AppState>,
    phase: Arc<watch::Sender<Phase>>,
    stopped: watch::Sender<bool>,
}

impl Application {
    /// Binds the listener. Failing to bind is the only error surfaced here.
    pub async fn build(
        config: ServerConfig,
        pods: Arc<dyn PodFinder>,
        issuer: Arc<dyn CredentialsIssuer>,
    ) -> Result<Self, AppError> {
        let address = format!("{}:{}", config.host, config.port);
        let state = Arc::new(AppState::new(config, pods, issuer)?);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| AppError::ConfigError(format!("unable to bind {address}: {e}")))?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            "[proxy] listening at http://{}:{}, metadata endpoint {}",
            state.config.host,
            port,
            state.forwarder.endpoint()
        );
        if state.config.allow_ip_query {
            tracing::warn!("[proxy] ip query parameter overrides are enabled");
        }

        let (phase, _) = watch::channel(Phase::Running);
        let (stopped, _) = watch::channel(false);

        Ok(Self {
            port,
            listener,
            state,
            phase: Arc::new(phase),
            stopped,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Arc<CredentialsCache> {
        self.state.credentials.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            phase: self.phase.clone(),
            stopped: self.stopped.subscribe(),
        }
    }

    /// Serves requests until a [`ShutdownHandle`] stops the server.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let Self {
            listener,
            state,
            phase,
            stopped,
            ..
        } = self;

        let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
        let draining = phase.subscribe();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            wait_for_phase(draining, |p| p != Phase::Running).await;
            tracing::info!("[proxy] shutting down, draining connections");
        });

        let result = tokio::select! {
            result = server.into_future() => result.map_err(AppError::from),
            _ = wait_for_phase(phase.subscribe(), |p| p == Phase::Aborted) => {
                tracing::warn!("[proxy] shutdown deadline passed, closing listener");
                Ok(())
            }
        };

        stopped.send_replace(true);
        tracing::info!("[proxy] stopped");

        result
    }
}

/// Stops a running [`Application`]; cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    phase: Arc<watch::Sender<Phase>>,
    stopped: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// Stops accepting connections and waits for in-flight requests until
    /// `deadline`. Past the deadline the server is told to return regardless
    /// and [`AppError::ShutdownTimedOut`] is reported.
    pub async fn stop(&self, deadline: Instant) -> Result<(), AppError> {
        self.phase.send_if_modified(|phase| {
            let running = *phase == Phase::Running;
            if running {
                *phase = Phase::Draining;
            }
            running
        });

        let mut stopped = self.stopped.clone();
        let drained = tokio::time::timeout_at(deadline, async move {
            loop {
                if *stopped.borrow_and_update() {
                    return;
                }
                if stopped.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        if drained.is_ok() {
            return Ok(());
        }

        self.phase.send_replace(Phase::Aborted);
        Err(AppError::ShutdownTimedOut)
    }
}

async fn wait_for_phase(mut phase: watch::Receiver<Phase>, done: impl Fn(Phase) -> bool) {
    loop {
        if done(*phase.borrow_and_update()) {
            return;
        }
        if phase.changed().await.is_err() {
            return;
        }
    }
}
