// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser};

use crate::constants;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ProxyOptions {
    #[command(flatten)]
    pub server: ServerConfig,
    #[command(flatten)]
    pub sts: StsOptions,
    /// JSON file listing the pods on this node, re-read periodically.
    #[arg(long, env("PROXY_PODS_FILE"))]
    pub pods_file: Option<PathBuf>,
}

/// Immutable settings shared by every request handler.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[arg(long, default_value = "0.0.0.0", env("PROXY_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8181", env("PROXY_HTTP_PORT"))]
    pub port: u16,
    #[arg(long, default_value = constants::DEFAULT_METADATA_ENDPOINT, env("PROXY_METADATA_ENDPOINT"))]
    pub metadata_endpoint: String,
    /// Trust the `ip` query parameter instead of the peer address.
    ///
    /// Only enable this when nothing but trusted callers can reach the proxy:
    /// any caller able to set the parameter can obtain any pod's credentials.
    #[arg(long, default_value = "false", env("PROXY_ALLOW_IP_QUERY"), action = ArgAction::SetTrue)]
    pub allow_ip_query: bool,
    #[arg(long, default_value = "10s", env("PROXY_MAX_ELAPSED_TIME"), value_parser = parse_duration)]
    pub max_elapsed_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            metadata_endpoint: constants::DEFAULT_METADATA_ENDPOINT.to_string(),
            allow_ip_query: false,
            max_elapsed_time: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Base URL for reaching this server from the same host on `port`.
    ///
    /// Wildcard binds are reached over the loopback of the same address family.
    pub fn local_base_url(&self, port: u16) -> String {
        match self.host.as_str() {
            "0.0.0.0" => format!("http://127.0.0.1:{port}"),
            "::" | "[::]" => format!("http://[::1]:{port}"),
            host if host.contains(':') && !host.starts_with('[') => {
                format!("http://[{host}]:{port}")
            }
            host => format!("http://{host}:{port}"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StsOptions {
    /// Prefix applied to bare role names, e.g. `arn:aws:iam::123456789012:role/`.
    #[arg(long, env("PROXY_ROLE_BASE_ARN"))]
    pub role_base_arn: Option<String>,
    #[arg(long, default_value = "15m", env("PROXY_SESSION_DURATION"), value_parser = parse_duration)]
    pub session_duration: Duration,
    #[arg(long, env("PROXY_AWS_REGION"))]
    pub region: Option<String>,
}

impl Default for StsOptions {
    fn default() -> Self {
        StsOptions {
            role_base_arn: None,
            session_duration: constants::DEFAULT_SESSION_DURATION,
            region: None,
        }
    }
}

/// Parses durations such as `250ms`, `10s`, `15m` or `1h`. A bare number is seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid duration: {value:?}"))?;

    let seconds = |scale: u64| {
        amount
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {value:?}"))
    };

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        _ => Err(format!("unknown duration unit {unit:?} in {value:?}")),
    }
}
