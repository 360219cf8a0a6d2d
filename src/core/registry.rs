//! Process-wide index of live relay sessions, keyed by application identity.
//!
//! Each identity maps to the ordered list of instances currently relaying for
//! it. Per-identity mutation goes through the `scc` bucket lock for that key,
//! so concurrent registration/removal for the same identity cannot lose an
//! update, and enumeration never observes a half-edited list. The registry lock
//! is independent of every instance's own lifecycle lock.
use std::{collections::BTreeMap, fmt, num::ParseIntError, str::FromStr, sync::Arc};

use scc::HashMap;
use serde::{Deserialize, Serialize};

use crate::{core::relay::RelayInstance, metrics, ports::CloseReason};

/// Tenant / application identity that sessions are grouped under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(i64);

impl AppId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Registry key form of the identity.
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

impl From<i64> for AppId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AppId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

/// Concurrent identity → instances map. Cheap to clone (Arc inside); each
/// clone observes the same sessions.
#[derive(Clone, Default)]
pub struct RelayRegistry {
    sessions: Arc<HashMap<String, Vec<Arc<RelayInstance>>>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `instance` under its identity, creating the collection if needed.
    /// Registering the same instance twice is a no-op. Returns the number of
    /// instances now held for that identity.
    pub async fn register(&self, instance: Arc<RelayInstance>) -> usize {
        let app_id = instance.app_id();
        let len = {
            let mut entry = self.sessions.entry_async(app_id.key()).await.or_default();
            let list = entry.get_mut();
            if !list.iter().any(|existing| Arc::ptr_eq(existing, &instance)) {
                list.push(instance);
            }
            list.len()
        };

        tracing::debug!(app.id = %app_id, count = len, "Relay instance registered");
        metrics::set_active_sessions(self.instance_count().await);
        len
    }

    /// Remove `instance` (matched by identity of the object, not by value) from
    /// the collection for `app_id`, dropping the key once the collection is
    /// empty. Returns whether anything was removed.
    pub async fn remove(&self, app_id: AppId, instance: &RelayInstance) -> bool {
        let mut removed = false;
        let removed_ref = &mut removed;
        let _ = self
            .sessions
            .remove_if_async(&app_id.key(), |list| {
                let before = list.len();
                list.retain(|existing| !std::ptr::eq(Arc::as_ptr(existing), instance));
                *removed_ref = list.len() != before;
                list.is_empty()
            })
            .await;

        if removed {
            let remaining = self.instances(app_id).await.len();
            tracing::debug!(
                app.id = %app_id,
                remaining,
                applications = self.identity_count(),
                "Relay instance unregistered"
            );
            metrics::set_active_sessions(self.instance_count().await);
        }
        removed
    }

    /// Instances currently registered for `app_id` (empty if none).
    pub async fn instances(&self, app_id: AppId) -> Vec<Arc<RelayInstance>> {
        self.sessions
            .get_async(&app_id.key())
            .await
            .map(|entry| entry.get().clone())
            .unwrap_or_default()
    }

    /// Whether `app_id` has at least one registered instance.
    pub async fn contains(&self, app_id: AppId) -> bool {
        self.sessions.get_async(&app_id.key()).await.is_some()
    }

    /// Number of identities with at least one instance.
    pub fn identity_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total number of registered instances across all identities.
    pub async fn instance_count(&self) -> usize {
        let mut count = 0;
        let count_ref = &mut count;
        self.sessions
            .retain_async(|_, list| {
                *count_ref += list.len();
                true
            })
            .await;
        count
    }

    /// Sorted identity keys.
    pub async fn identities(&self) -> Vec<String> {
        self.snapshot().await.into_keys().collect()
    }

    /// Identity → instance count, captured one identity at a time.
    pub async fn snapshot(&self) -> BTreeMap<String, usize> {
        let mut snapshot = BTreeMap::new();
        let snapshot_ref = &mut snapshot;
        self.sessions
            .retain_async(|key, list| {
                snapshot_ref.insert(key.clone(), list.len());
                true
            })
            .await;
        snapshot
    }

    /// Every registered instance.
    pub async fn all_instances(&self) -> Vec<Arc<RelayInstance>> {
        let mut all = Vec::new();
        let all_ref = &mut all;
        self.sessions
            .retain_async(|_, list| {
                all_ref.extend(list.iter().cloned());
                true
            })
            .await;
        all
    }

    /// Close every client with "going away" and tear its instance down.
    pub async fn shutdown_all(&self) -> usize {
        let instances = self.all_instances().await;
        tracing::info!("Shutting down {} relay sessions", instances.len());
        for instance in &instances {
            instance.shutdown(CloseReason::going_away()).await;
        }
        instances.len()
    }
}

impl fmt::Debug for RelayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayRegistry")
            .field("applications", &self.identity_count())
            .finish()
    }
}
