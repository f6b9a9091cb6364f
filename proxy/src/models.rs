// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Lifecycle phase of a pod as reported by the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A workload instance, keyed for resolution by its IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub phase: PodPhase,
    /// IAM role assigned to the pod. Empty when none is assigned.
    #[serde(default)]
    pub role: String,
    /// When the pod was scheduled; breaks ties between pods sharing an IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn new(namespace: impl ToString, name: impl ToString, ip: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ip: ip.to_string(),
            phase: PodPhase::Running,
            role: String::new(),
            scheduled_at: None,
        }
    }

    pub fn with_role(self, role: impl ToString) -> Self {
        Self {
            role: role.to_string(),
            ..self
        }
    }

    pub fn with_phase(self, phase: PodPhase) -> Self {
        Self { phase, ..self }
    }

    pub fn scheduled(self, at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(at),
            ..self
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    pub fn has_role(&self) -> bool {
        !self.role.is_empty()
    }
}

/// Temporary credentials for one role, serialized exactly as the instance
/// metadata service renders `iam/security-credentials/<role>`.
#[derive(Clone, PartialEq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Credentials {
    #[serde(rename = "Code")]
    pub code: String,

    #[serde(rename = "LastUpdated", with = "metadata_timestamp")]
    #[zeroize(skip)]
    pub last_updated: DateTime<Utc>,

    #[serde(rename = "Type")]
    pub kind: String,

    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "Token")]
    pub session_token: String,

    #[serde(rename = "Expiration", with = "metadata_timestamp")]
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl ToString,
        secret_access_key: impl ToString,
        session_token: impl ToString,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            code: "Success".to_string(),
            last_updated: Utc::now(),
            kind: "AWS-HMAC".to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.to_string(),
            expiration,
        }
    }

    /// True once `now + buffer` reaches the expiration time.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(buffer)
            .is_none_or(|threshold| threshold >= self.expiration)
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Second-precision UTC timestamps (`2017-05-17T15:09:54Z`).
mod metadata_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
