// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Per-role credential issuance with caching and single-flight de-duplication.
//!
//! Each role maps to one shared issuance future. While it is pending, every
//! caller for that role awaits the same future, so at most one upstream call
//! per role is ever in flight. A completed success stays in the map as the
//! cached value until it comes within [`CREDENTIAL_REFRESH_BUFFER`] of
//! expiring; a failure is removed so the next caller starts afresh.
//!
//! The map lock only guards map reads and writes and is never held across an
//! await. Issuance runs on its own task, so a caller that goes away (client
//! disconnect) does not cancel the call the other waiters depend on.
//!
//! [`CREDENTIAL_REFRESH_BUFFER`]: crate::constants::CREDENTIAL_REFRESH_BUFFER

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::constants;
use crate::models::Credentials;
use crate::retry::{self, Backoff};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IssueError {
    #[error("invalid role: {0:?}")]
    InvalidRole(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

impl IssueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Upstream capability that mints credentials for a role.
#[async_trait]
pub trait CredentialsIssuer: Send + Sync {
    async fn issue(&self, role: &str) -> Result<Credentials, IssueError>;
}

type Issuance = Shared<BoxFuture<'static, Result<Credentials, IssueError>>>;

#[derive(Clone)]
struct Entry {
    generation: u64,
    issuance: Issuance,
}

enum Lookup {
    /// Cached and fresh, or still in flight: await it.
    Usable(Entry),
    /// Missing, failed or stale: a new issuance is needed.
    Missing,
}

pub struct CredentialsCache {
    issuer: Arc<dyn CredentialsIssuer>,
    backoff: Backoff,
    refresh_buffer: Duration,
    generation: AtomicU64,
    entries: RwLock<HashMap<String, Entry>>,
}

impl CredentialsCache {
    pub fn new(issuer: Arc<dyn CredentialsIssuer>, backoff: Backoff) -> Self {
        Self {
            issuer,
            backoff,
            refresh_buffer: constants::CREDENTIAL_REFRESH_BUFFER,
            generation: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_refresh_buffer(self, refresh_buffer: Duration) -> Self {
        Self {
            refresh_buffer,
            ..self
        }
    }

    /// Returns credentials for `role`, issuing them upstream only when no fresh
    /// value is cached and no issuance is already in flight.
    #[tracing::instrument(skip(self))]
    pub async fn credentials(&self, role: &str) -> Result<Credentials, IssueError> {
        if role.is_empty() {
            return Err(IssueError::InvalidRole(role.to_string()));
        }

        let entry = self.entry(role)?;
        let result = entry.issuance.await;

        if result.is_err() {
            self.forget(role, entry.generation);
        }

        result
    }

    /// Drops entries whose credentials have expired or whose issuance failed.
    pub fn evict_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| match entry.issuance.peek() {
            None => true,
            Some(Ok(credentials)) => !credentials.expires_within(Duration::ZERO),
            Some(Err(_)) => false,
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, role: &str) -> Result<Entry, IssueError> {
        // Fast path: a fresh or in-flight entry only needs the read lock
        {
            let entries = self.entries.read().map_err(poisoned)?;
            if let Lookup::Usable(entry) = self.lookup(&entries, role) {
                return Ok(entry);
            }
        }

        let mut entries = self.entries.write().map_err(poisoned)?;

        // Double-check after acquiring write lock (another task may have started an issuance)
        if let Lookup::Usable(entry) = self.lookup(&entries, role) {
            return Ok(entry);
        }

        let entry = self.spawn_issuance(role);
        entries.insert(role.to_string(), entry.clone());
        Ok(entry)
    }

    fn lookup(&self, entries: &HashMap<String, Entry>, role: &str) -> Lookup {
        let Some(entry) = entries.get(role) else {
            return Lookup::Missing;
        };
        match entry.issuance.peek() {
            None => Lookup::Usable(entry.clone()),
            Some(Ok(credentials)) if !credentials.expires_within(self.refresh_buffer) => {
                Lookup::Usable(entry.clone())
            }
            Some(_) => Lookup::Missing,
        }
    }

    fn spawn_issuance(&self, role: &str) -> Entry {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let issuer = self.issuer.clone();
        let backoff = self.backoff.clone();
        let role = role.to_string();

        tracing::debug!("[proxy] issuing credentials for role {}", role);

        let task = tokio::spawn(async move {
            retry::retry_if(
                &backoff,
                "issue_credentials",
                || issuer.issue(&role),
                IssueError::is_transient,
            )
            .await
        });

        let issuance = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!("[proxy] credential issuance task failed: {:?}", e);
                Err(IssueError::Unavailable("issuance task failed".to_string()))
            })
        }
        .boxed()
        .shared();

        Entry {
            generation,
            issuance,
        }
    }

    fn forget(&self, role: &str, generation: u64) {
        if let Ok(mut entries) = self.entries.write()
            && entries
                .get(role)
                .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(role);
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> IssueError {
    IssueError::Unavailable("credentials cache lock poisoned".to_string())
}
