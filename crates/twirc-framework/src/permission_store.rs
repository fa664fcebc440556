//! Shared, mutable permission state.
//!
//! The [`PermissionStore`] maps users and groups to [`PermissionList`]s. It
//! is read on every dispatch and may be written by handlers (for example a
//! permission management command), so all access goes through a lock and
//! [`resolve`](PermissionStore::resolve) hands out an owned snapshot. The
//! router checks and invokes against that snapshot, never against live
//! state.
//!
//! Group membership is expressed by `parent.<group>` tokens and is expanded
//! transitively during resolution; cycles are harmless.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use twirc_core::PermissionList;

/// Serializable contents of a [`PermissionStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSnapshot {
    /// Permissions every user holds.
    pub defaults: PermissionList,
    pub users: BTreeMap<String, PermissionList>,
    pub groups: BTreeMap<String, PermissionList>,
}

/// User and group permissions behind a read/write lock.
#[derive(Debug, Default)]
pub struct PermissionStore {
    inner: RwLock<PermissionSnapshot>,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from previously saved contents.
    pub fn from_snapshot(snapshot: PermissionSnapshot) -> Self {
        let store = Self::new();
        store.load(snapshot);
        store
    }

    /// Replaces the store contents.
    pub fn load(&self, snapshot: PermissionSnapshot) {
        let normalized = PermissionSnapshot {
            defaults: snapshot.defaults,
            users: snapshot.users.into_iter().map(|(k, v)| (key(&k), v)).collect(),
            groups: snapshot.groups.into_iter().map(|(k, v)| (key(&k), v)).collect(),
        };
        *self.inner.write() = normalized;
    }

    /// Copies the store contents for persistence.
    pub fn snapshot(&self) -> PermissionSnapshot {
        self.inner.read().clone()
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Grants `token` to `user`. Returns `false` if already held directly.
    pub fn grant(&self, user: &str, token: &str) -> bool {
        let granted = self.inner.write().users.entry(key(user)).or_default().add(token);
        if granted {
            debug!(user, token, "Permission granted");
        }
        granted
    }

    /// Revokes a directly held token. Returns `false` if it was not held.
    pub fn revoke(&self, user: &str, token: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(list) = inner.users.get_mut(&key(user)) else {
            return false;
        };
        let revoked = list.remove(token);
        if list.is_empty() {
            inner.users.remove(&key(user));
        }
        if revoked {
            debug!(user, token, "Permission revoked");
        }
        revoked
    }

    /// Replaces a user's direct permissions.
    pub fn set_user(&self, user: &str, list: PermissionList) {
        let mut inner = self.inner.write();
        if list.is_empty() {
            inner.users.remove(&key(user));
        } else {
            inner.users.insert(key(user), list);
        }
    }

    /// The user's directly held permissions, without groups or defaults.
    pub fn user(&self, user: &str) -> PermissionList {
        self.inner
            .read()
            .users
            .get(&key(user))
            .cloned()
            .unwrap_or_default()
    }

    /// Adds a token every user holds.
    pub fn grant_default(&self, token: &str) -> bool {
        self.inner.write().defaults.add(token)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Defines or replaces a group.
    pub fn set_group(&self, group: &str, list: PermissionList) {
        self.inner.write().groups.insert(key(group), list);
    }

    /// Adds a token to a group, creating it if needed.
    pub fn grant_group(&self, group: &str, token: &str) -> bool {
        self.inner.write().groups.entry(key(group)).or_default().add(token)
    }

    pub fn remove_group(&self, group: &str) -> bool {
        self.inner.write().groups.remove(&key(group)).is_some()
    }

    pub fn group(&self, group: &str) -> Option<PermissionList> {
        self.inner.read().groups.get(&key(group)).cloned()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolves the effective permissions of `user`.
    ///
    /// The result holds the user's tokens, the defaults, and the tokens of
    /// every group reachable through `parent.<group>` links. Undefined groups
    /// contribute nothing. Pass `None` for messages without a sender.
    pub fn resolve(&self, user: Option<&str>) -> PermissionList {
        let inner = self.inner.read();
        let mut resolved = inner.defaults.clone();
        if let Some(list) = user.and_then(|u| inner.users.get(&key(u))) {
            resolved.merge(list);
        }

        let mut visited = HashSet::new();
        let mut pending: Vec<String> = resolved.groups().map(str::to_string).collect();
        while let Some(group) = pending.pop() {
            if !visited.insert(group.clone()) {
                continue;
            }
            if let Some(list) = inner.groups.get(&group) {
                pending.extend(
                    list.groups()
                        .filter(|g| !visited.contains(*g))
                        .map(str::to_string),
                );
                resolved.merge(list);
            }
        }
        resolved
    }
}
