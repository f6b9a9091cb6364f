// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};

use crate::configuration::StsOptions;
use crate::constants;
use crate::credentials::{CredentialsIssuer, IssueError};
use crate::models::Credentials;

/// Service error codes meaning STS refused this role rather than failed.
const DENIED_CODES: &[&str] = &["AccessDenied", "AccessDeniedException"];
const INVALID_ROLE_CODES: &[&str] = &["ValidationError", "MalformedPolicyDocument"];

/// Mints role credentials with `sts:AssumeRole`, using the node's own identity.
pub struct StsIssuer {
    client: aws_sdk_sts::Client,
    role_base_arn: Option<String>,
    session_duration_secs: i32,
}

impl StsIssuer {
    pub async fn new(options: &StsOptions) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let config = loader.load().await;

        Self::with_client(aws_sdk_sts::Client::new(&config), options)
    }

    pub fn with_client(client: aws_sdk_sts::Client, options: &StsOptions) -> Self {
        let duration = options
            .session_duration
            .clamp(constants::MIN_SESSION_DURATION, constants::MAX_SESSION_DURATION);
        Self {
            client,
            role_base_arn: options.role_base_arn.clone(),
            session_duration_secs: i32::try_from(duration.as_secs()).unwrap_or(i32::MAX),
        }
    }

    /// Bare role names are prefixed with the base ARN; full ARNs pass through.
    pub fn role_arn(&self, role: &str) -> String {
        match &self.role_base_arn {
            Some(base) if !role.starts_with("arn:") => {
                format!("{}{}", base, role.trim_start_matches('/'))
            }
            _ => role.to_string(),
        }
    }
}

#[async_trait]
impl CredentialsIssuer for StsIssuer {
    #[tracing::instrument(skip(self))]
    async fn issue(&self, role: &str) -> Result<Credentials, IssueError> {
        let arn = self.role_arn(role);

        let output = self
            .client
            .assume_role()
            .role_arn(&arn)
            .role_session_name(session_name(role))
            .duration_seconds(self.session_duration_secs)
            .send()
            .await
            .map_err(classify)?;

        let credentials = output.credentials().ok_or_else(|| {
            IssueError::Unavailable(format!("no credentials returned for {arn}"))
        })?;

        let expiration = SystemTime::try_from(*credentials.expiration())
            .map(DateTime::<Utc>::from)
            .map_err(|e| IssueError::Unavailable(format!("invalid expiration: {e}")))?;

        tracing::debug!("[proxy] assumed role {}, expires at {}", arn, expiration);

        Ok(Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token(),
            expiration,
        ))
    }
}

fn classify<E, R>(error: SdkError<E, R>) -> IssueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = error.as_service_error().and_then(|e| e.code());
    match code {
        Some(code) if DENIED_CODES.contains(&code) => {
            IssueError::AccessDenied(DisplayErrorContext(&error).to_string())
        }
        Some(code) if INVALID_ROLE_CODES.contains(&code) => {
            IssueError::InvalidRole(DisplayErrorContext(&error).to_string())
        }
        _ => IssueError::Unavailable(DisplayErrorContext(&error).to_string()),
    }
}

/// Session names are limited to 64 characters of `[\w+=,.@-]`.
fn session_name(role: &str) -> String {
    let role = role.rsplit('/').next().unwrap_or(role);
    let sanitized: String = format!("{}-{}", constants::SESSION_NAME_PREFIX, role)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized
        .chars()
        .take(constants::MAX_SESSION_NAME_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn issuer(base: Option<&str>) -> StsIssuer {
        let config = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        let options = StsOptions {
            role_base_arn: base.map(str::to_string),
            ..StsOptions::default()
        };
        StsIssuer::with_client(aws_sdk_sts::Client::from_conf(config), &options)
    }

    #[test]
    fn test_role_arn_prefixes_bare_names() {
        let issuer = issuer(Some("arn:aws:iam::123456789012:role/"));
        assert_eq!(
            issuer.role_arn("foo_role"),
            "arn:aws:iam::123456789012:role/foo_role"
        );
        assert_eq!(
            issuer.role_arn("/foo_role"),
            "arn:aws:iam::123456789012:role/foo_role"
        );
        assert_eq!(
            issuer.role_arn("arn:aws:iam::999999999999:role/other"),
            "arn:aws:iam::999999999999:role/other"
        );
    }

    #[test]
    fn test_role_arn_without_base_is_verbatim() {
        assert_eq!(issuer(None).role_arn("foo_role"), "foo_role");
    }

    #[test]
    fn test_session_duration_is_clamped() {
        let client = issuer(None).client;
        let short = StsOptions {
            session_duration: Duration::from_secs(60),
            ..StsOptions::default()
        };
        assert_eq!(StsIssuer::with_client(client.clone(), &short).session_duration_secs, 900);

        let long = StsOptions {
            session_duration: Duration::from_secs(24 * 60 * 60),
            ..StsOptions::default()
        };
        assert_eq!(StsIssuer::with_client(client, &long).session_duration_secs, 43200);
    }

    #[test]
    fn test_session_name_is_sanitized() {
        assert_eq!(session_name("foo_role"), "metadata-proxy-foo_role");
        assert_eq!(
            session_name("arn:aws:iam::123456789012:role/team/app"),
            "metadata-proxy-app"
        );
        assert_eq!(session_name("a b:c"), "metadata-proxy-a-b-c");
        assert_eq!(session_name(&"x".repeat(100)).len(), 64);
    }
}
