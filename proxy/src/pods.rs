// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Pod identity resolution.
//!
//! The proxy never trusts a client-supplied identity: the caller's IP address
//! is resolved to the pod currently bound to it through a [`PodFinder`].
//!
//! [`PodIndex`] is the in-memory finder. It is owned by whatever watches the
//! cluster (a pod watch, or the pods file loaded by the binary), which keeps
//! it current through [`upsert`](PodIndex::upsert), [`remove`](PodIndex::remove)
//! and [`replace_all`](PodIndex::replace_all). Lookups only take a read lock,
//! so request handlers are never locked out by each other.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;

use crate::models::Pod;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FinderError {
    #[error("pod store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid pods file: {0}")]
    InvalidPods(String),
}

/// Resolves the pod bound to an IP address.
///
/// `Ok(None)` is the routine "no such pod" outcome; `Err` is reserved for
/// failures of the finder itself.
pub trait PodFinder: Send + Sync {
    fn find_pod(&self, ip: &str) -> Result<Option<Pod>, FinderError>;
}

type PodKey = (String, String);

#[derive(Default)]
struct Pods {
    by_key: HashMap<PodKey, Pod>,
    by_ip: HashMap<String, BTreeSet<PodKey>>,
}

impl Pods {
    fn insert(&mut self, pod: Pod) {
        let key = (pod.namespace.clone(), pod.name.clone());
        self.remove(&key);
        self.by_ip
            .entry(canonical_ip(&pod.ip))
            .or_default()
            .insert(key.clone());
        self.by_key.insert(key, pod);
    }

    fn remove(&mut self, key: &PodKey) -> Option<Pod> {
        let pod = self.by_key.remove(key)?;
        let ip = canonical_ip(&pod.ip);
        if let Some(keys) = self.by_ip.get_mut(&ip) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_ip.remove(&ip);
            }
        }
        Some(pod)
    }

    /// Picks the most recently scheduled running pod bound to `ip`.
    ///
    /// Pods with no schedule time sort before any with one; remaining ties are
    /// broken by namespace and name so the answer never depends on hash order.
    fn find(&self, ip: &str) -> Option<&Pod> {
        self.by_ip
            .get(&canonical_ip(ip))?
            .iter()
            .filter_map(|key| self.by_key.get(key))
            .filter(|pod| pod.is_running())
            .max_by(|a, b| {
                a.scheduled_at
                    .cmp(&b.scheduled_at)
                    .then_with(|| b.namespace.cmp(&a.namespace))
                    .then_with(|| b.name.cmp(&a.name))
            })
    }
}

/// Thread-safe pod store indexed by IP address.
#[derive(Default)]
pub struct PodIndex {
    pods: RwLock<Pods>,
}

impl PodIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(pods: impl IntoIterator<Item = Pod>) -> Self {
        let index = Self::new();
        if let Ok(mut store) = index.pods.write() {
            pods.into_iter().for_each(|pod| store.insert(pod));
        }
        index
    }

    /// Adds the pod, replacing any previous state for the same namespace/name.
    pub fn upsert(&self, pod: Pod) -> Result<(), FinderError> {
        self.pods.write().map_err(poisoned)?.insert(pod);
        Ok(())
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Result<Option<Pod>, FinderError> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.pods.write().map_err(poisoned)?.remove(&key))
    }

    /// Swaps the whole pod set in one step; readers see either the old or the new set.
    pub fn replace_all(&self, pods: impl IntoIterator<Item = Pod>) -> Result<(), FinderError> {
        let mut fresh = Pods::default();
        pods.into_iter().for_each(|pod| fresh.insert(pod));
        *self.pods.write().map_err(poisoned)? = fresh;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pods.read().map_or(0, |pods| pods.by_key.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the index contents with the JSON pod list at `path`.
    #[tracing::instrument(skip(self))]
    pub async fn load_file(&self, path: &Path) -> Result<usize, FinderError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| FinderError::Unavailable(e.to_string()))?;
        let pods: Vec<Pod> = serde_json::from_slice(&contents)
            .map_err(|e| FinderError::InvalidPods(e.to_string()))?;
        let count = pods.len();
        self.replace_all(pods)?;

        tracing::debug!("[proxy] loaded {} pods from {}", count, path.display());

        Ok(count)
    }
}

impl PodFinder for PodIndex {
    fn find_pod(&self, ip: &str) -> Result<Option<Pod>, FinderError> {
        let pods = self.pods.read().map_err(poisoned)?;
        Ok(pods.find(ip).cloned())
    }
}

/// Normalises an address to the form peer addresses are looked up in.
/// Anything that is not an IP address is kept as is and simply never matches.
fn canonical_ip(ip: &str) -> String {
    ip.parse::<IpAddr>()
        .map_or_else(|_| ip.to_string(), |ip| ip.to_canonical().to_string())
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> FinderError {
    FinderError::Unavailable("pod index lock poisoned".to_string())
}
