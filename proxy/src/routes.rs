// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers emulating the instance metadata service.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/ping` | [`ping`] | Local liveness, no dependencies |
//! | GET | `/health` | [`health`] | Upstream reachability via `instance-id` |
//! | GET | `/{version}/meta-data/iam/security-credentials[/]` | [`role_name`] | Role assigned to the calling pod |
//! | GET | `/{version}/meta-data/iam/security-credentials/{role}` | [`role_credentials`] | Credentials for the calling pod's role |
//! | any | anything else | [`passthrough`] | Relayed to the real metadata service |
//!
//! The calling pod is identified by the request's peer address only. The
//! `ip` query parameter replaces it when, and only when, the server was
//! configured with `allow_ip_query`.
//!
//! Passthrough requests whose path carries `.`/`..` segments or repeated
//! slashes are redirected to the cleaned path instead of being relayed, so
//! the cleaned path goes through the routes above like any other request.

use std::convert::Infallible;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};

use crate::application::AppState;
use crate::configuration::ServerConfig;
use crate::constants;
use crate::errors::AppError;
use crate::forwarder::Forwarded;
use crate::models::{Credentials, Pod};

pub const SECURITY_CREDENTIALS_PATH: &str = "/{version}/meta-data/iam/security-credentials";

/// The TCP peer of the request, when the server records connection info.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(peer))
    }
}

/// The `ip` query parameter, if any.
///
/// Parsing never rejects a request: an unparseable query string counts as
/// absent and only the first `ip` is kept when it is repeated.
#[derive(Debug, Default)]
pub struct IdentityQuery {
    pub ip: Option<String>,
}

impl IdentityQuery {
    pub fn from_uri(uri: &Uri) -> Self {
        let ip = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(pairs)| {
                pairs
                    .into_iter()
                    .find(|(key, _)| key == constants::IP_QUERY_PARAM)
                    .map(|(_, value)| value)
            });
        Self { ip }
    }
}

impl<S> FromRequestParts<S> for IdentityQuery
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_uri(&parts.uri))
    }
}

/// Extracts the host portion of a `host:port` peer address.
pub fn parse_client_ip(addr: &str) -> Result<String, AddrParseError> {
    let addr: SocketAddr = addr.parse()?;
    Ok(addr.ip().to_canonical().to_string())
}

/// Determines the IP address whose pod the request acts for.
pub fn client_ip(
    config: &ServerConfig,
    peer: Option<SocketAddr>,
    query: &IdentityQuery,
) -> Result<String, AppError> {
    if config.allow_ip_query
        && let Some(ip) = query.ip.as_deref().filter(|ip| !ip.is_empty())
    {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| AppError::PodNotFound(format!("invalid {} {ip:?}", constants::IP_QUERY_PARAM)))?;
        return Ok(ip.to_canonical().to_string());
    }

    peer.map(|addr| addr.ip().to_canonical().to_string())
        .ok_or_else(|| AppError::PodNotFound("unknown peer".to_string()))
}

fn resolve_pod(state: &AppState, peer: Option<SocketAddr>, query: &IdentityQuery) -> Result<Pod, AppError> {
    let ip = client_ip(&state.config, peer, query)?;
    let pod = state
        .pods
        .find_pod(&ip)?
        .ok_or_else(|| AppError::PodNotFound(ip.clone()))?;

    if !pod.has_role() {
        return Err(AppError::RoleNotAssigned(format!(
            "{}/{}",
            pod.namespace, pod.name
        )));
    }

    Ok(pod)
}

/// Liveness check. Never touches the metadata service.
pub async fn ping() -> &'static str {
    "pong"
}

/// Readiness check: relays the upstream `instance-id`.
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Forwarded, AppError> {
    let forwarded = state.forwarder.get(constants::INSTANCE_ID_PATH).await?;
    Ok(forwarded)
}

/// Returns the name of the role assigned to the calling pod as plain text.
#[tracing::instrument(skip(state))]
pub async fn role_name(
    State(state): State<Arc<AppState>>,
    PeerAddr(peer): PeerAddr,
    query: IdentityQuery,
) -> Result<String, AppError> {
    let pod = resolve_pod(&state, peer, &query)?;
    Ok(pod.role)
}

/// Returns credentials for `role`, provided it is the calling pod's role.
///
/// # Errors
///
/// - [`AppError::PodNotFound`] - No running pod is bound to the caller's IP
/// - [`AppError::RoleNotAssigned`] - The pod has no role
/// - [`AppError::RoleMismatch`] - `role` is not the pod's role
/// - [`AppError::AccessDenied`] - The upstream refused to issue for the role
/// - [`AppError::UpstreamUnavailable`] - Issuance failed after retries
#[tracing::instrument(skip(state))]
pub async fn role_credentials(
    State(state): State<Arc<AppState>>,
    Path((_version, role)): Path<(String, String)>,
    PeerAddr(peer): PeerAddr,
    query: IdentityQuery,
) -> Result<Json<Credentials>, AppError> {
    let pod = resolve_pod(&state, peer, &query)?;

    if pod.role != role {
        return Err(AppError::RoleMismatch {
            requested: role,
            assigned: pod.role,
        });
    }

    let credentials = state.credentials.credentials(&role).await?;

    tracing::debug!(
        "[proxy] issued credentials for {}/{} role {}",
        pod.namespace,
        pod.name,
        role
    );

    Ok(Json(credentials))
}

/// Resolves `.` and `..` segments, percent-encoded dots included, and collapses
/// repeated slashes. A trailing slash is kept unless the result is the root.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match segment.to_ascii_lowercase().replace("%2e", ".").as_str() {
            "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') && cleaned != "/" {
        cleaned.push('/');
    }
    cleaned
}

/// Relays any other request to the metadata service unchanged.
///
/// Only clean paths are relayed; anything else is redirected to its cleaned form.
#[tracing::instrument(skip(state, headers))]
pub async fn passthrough(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let cleaned = clean_path(uri.path());
    if cleaned != uri.path() {
        let location = match uri.query() {
            Some(query) => format!("{cleaned}?{query}"),
            None => cleaned,
        };
        tracing::debug!("[proxy] redirecting {} to {}", uri.path(), location);
        return Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response());
    }

    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let forwarded = state
        .forwarder
        .forward(method, path_and_query, &headers)
        .await?;
    Ok(forwarded.into_response())
}
