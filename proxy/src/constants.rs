// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
/// Query parameter that overrides the peer address when `allow_ip_query` is set.
pub const IP_QUERY_PARAM: &str = "ip";
/// Headers relayed to the metadata service for IMDSv2 session tokens.
pub const METADATA_TOKEN_HEADER_PREFIX: &str = "x-aws-ec2-metadata-token";

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
pub const CREDENTIAL_REFRESH_BUFFER: Duration = Duration::from_secs(300); // refresh 5m before expiry
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const REFRESH_PODS_INTERVAL: Duration = Duration::from_secs(10);
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(15 * 60);
/// STS rejects sessions shorter than 15 minutes or longer than 12 hours.
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(15 * 60);
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(12 * 60 * 60);
pub const SESSION_NAME_PREFIX: &str = "metadata-proxy";
pub const MAX_SESSION_NAME_LENGTH: usize = 64;

pub const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(50);
pub const RETRY_MAX_INTERVAL: Duration = Duration::from_secs(2);
pub const RETRY_MULTIPLIER: f64 = 1.5;
