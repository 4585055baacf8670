//! Static grant store: Role → Permission and User → Role assignments.
//!
//! The static model is the coarse layer of the decision: a user's effective
//! permissions are the union of everything reachable through their valid
//! `UserRole → RolePermission` chains. A role contributes all of its
//! permissions or none; an invalid assignment grants nothing partial.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use inkstone_types::{
    Operation, Permission, PermissionId, ResourceType, Role, RoleId, RolePermission, Scope, UserId,
    UserRole,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

// ============================================================================
// Trait
// ============================================================================

/// Read interface the resolution engine consumes for static grants.
///
/// Unknown users and roles yield empty results, never errors: "no grants"
/// is a normal, evaluable state.
pub trait RoleGrantStore: Send + Sync {
    /// Role ids currently assigned to the user and valid at `at`.
    fn effective_roles(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<RoleId>>;

    /// Union of permissions reachable through the user's valid
    /// `UserRole → RolePermission` chains at `at`, each link filtered by
    /// its own validity window.
    fn effective_permissions(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Permission>>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default)]
struct GrantTables {
    roles: HashMap<RoleId, Role>,
    permissions: Vec<Permission>,
    role_permissions: Vec<RolePermission>,
    user_roles: Vec<UserRole>,
}

/// In-memory static grant store.
///
/// Backs tests and single-process deployments; a database-backed
/// implementation satisfies the same trait in production.
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    tables: RwLock<GrantTables>,
    next_role_id: AtomicU64,
    next_permission_id: AtomicU64,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a new active role.
    pub fn define_role(&self, name: &str, description: &str) -> RoleId {
        let id = RoleId::new(self.next_role_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut tables = self.tables.write().expect("grant tables poisoned");
        tables.roles.insert(
            id,
            Role {
                id,
                name: name.to_string(),
                description: description.to_string(),
                is_active: true,
            },
        );
        id
    }

    /// Defines a permission, enforcing triple uniqueness: if an identical
    /// `(resource, action, scope)` already exists, its id is returned
    /// instead of creating a duplicate.
    pub fn define_permission(
        &self,
        resource: ResourceType,
        action: Operation,
        scope: Scope,
    ) -> PermissionId {
        let mut tables = self.tables.write().expect("grant tables poisoned");
        if let Some(existing) = tables
            .permissions
            .iter()
            .find(|p| p.resource == resource && p.action == action && p.scope == scope)
        {
            return existing.id;
        }
        let id = PermissionId::new(self.next_permission_id.fetch_add(1, Ordering::Relaxed) + 1);
        tables.permissions.push(Permission {
            id,
            resource,
            action,
            scope,
        });
        id
    }

    /// Grants a permission to a role.
    ///
    /// If a row already exists for the pair, it is reactivated and its
    /// expiry replaced rather than a second row being created.
    pub fn grant_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        expires_at: Option<DateTime<Utc>>,
        granted_by: Option<UserId>,
    ) {
        let mut tables = self.tables.write().expect("grant tables poisoned");
        if let Some(existing) = tables
            .role_permissions
            .iter_mut()
            .find(|rp| rp.role_id == role_id && rp.permission_id == permission_id)
        {
            existing.is_active = true;
            existing.expires_at = expires_at;
            existing.granted_by = granted_by;
            debug!(%role_id, %permission_id, "role permission re-granted");
            return;
        }
        tables.role_permissions.push(RolePermission {
            role_id,
            permission_id,
            expires_at,
            granted_by,
            is_active: true,
        });
    }

    /// Assigns a role to a user, extending the existing assignment if one
    /// is already present for the pair.
    pub fn assign_role(&self, user_id: UserId, role_id: RoleId, expires_at: Option<DateTime<Utc>>) {
        let mut tables = self.tables.write().expect("grant tables poisoned");
        if let Some(existing) = tables
            .user_roles
            .iter_mut()
            .find(|ur| ur.user_id == user_id && ur.role_id == role_id)
        {
            existing.is_active = true;
            existing.expires_at = expires_at;
            return;
        }
        tables.user_roles.push(UserRole {
            user_id,
            role_id,
            expires_at,
            is_active: true,
        });
    }

    /// Deactivates a user's role assignment. Returns false when no active
    /// assignment exists for the pair.
    pub fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> bool {
        let mut tables = self.tables.write().expect("grant tables poisoned");
        match tables
            .user_roles
            .iter_mut()
            .find(|ur| ur.user_id == user_id && ur.role_id == role_id && ur.is_active)
        {
            Some(ur) => {
                ur.is_active = false;
                true
            }
            None => false,
        }
    }
}

impl RoleGrantStore for MemoryGrantStore {
    fn effective_roles(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<RoleId>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let tables = self.tables.read().expect("grant tables poisoned");
        Ok(tables
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id && ur.is_valid(at))
            .filter(|ur| tables.roles.get(&ur.role_id).is_some_and(|r| r.is_active))
            .map(|ur| ur.role_id)
            .collect())
    }

    fn effective_permissions(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Permission>> {
        let role_ids = self.effective_roles(user_id, at, cancel)?;
        let tables = self.tables.read().expect("grant tables poisoned");

        let mut permissions: Vec<Permission> = Vec::new();
        for rp in tables
            .role_permissions
            .iter()
            .filter(|rp| role_ids.contains(&rp.role_id) && rp.is_valid(at))
        {
            if let Some(perm) = tables
                .permissions
                .iter()
                .find(|p| p.id == rp.permission_id)
            {
                // Union semantics: the same permission through two roles
                // appears once.
                if !permissions.iter().any(|p| p.id == perm.id) {
                    permissions.push(perm.clone());
                }
            }
        }
        Ok(permissions)
    }
}

// ============================================================================
// Tests
// ============================================================================
