//! Temporary grant store: time-boxed, usage-limited permission grants.
//!
//! Temporary grants are narrowly scoped, explicit escalations: one user,
//! one concrete resource instance, one operation, a mandatory expiry, and
//! an optional usage budget. They outrank every other evidence source in
//! resolution. Usage recording re-validates and increments under a single
//! write lock, so concurrent callers can never push `used_count` past the
//! limit.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use inkstone_types::{
    GrantId, GrantType, Operation, ResourceId, ResourceType, TemporaryPermission, UserId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

// ============================================================================
// Grant specification
// ============================================================================

/// Everything a grantor supplies when issuing a temporary grant; the store
/// fills in the id, counters and creation timestamp.
#[derive(Debug, Clone)]
pub struct GrantSpec {
    pub user_id: UserId,
    pub resource_type: ResourceType,
    pub resource_id: ResourceId,
    pub operation: Operation,
    pub effective_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `0` means unlimited.
    pub usage_limit: u32,
}

// ============================================================================
// Trait
// ============================================================================

/// Interface the resolution engine and lifecycle manager consume for
/// temporary grants.
pub trait TemporaryGrantStore: Send + Sync {
    /// The most recently created grant valid at `at` for the exact tuple,
    /// or `None`.
    fn valid_grant(
        &self,
        user_id: UserId,
        resource_type: &ResourceType,
        resource_id: &ResourceId,
        operation: Operation,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<TemporaryPermission>>;

    /// Creates a grant. `delegated_from` must be `Some` iff `grant_type`
    /// is [`GrantType::Delegated`]; a mismatch fails with
    /// [`StoreError::InvalidGrant`] and nothing is stored.
    fn create(
        &self,
        spec: GrantSpec,
        grant_type: GrantType,
        delegated_from: Option<UserId>,
        now: DateTime<Utc>,
    ) -> StoreResult<TemporaryPermission>;

    /// Atomically re-checks validity at `at` and increments `used_count`.
    /// Returns false without mutating when the grant is no longer valid.
    fn record_usage(&self, grant_id: GrantId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Revokes a grant: terminal, never reactivated. Returns false when
    /// the grant is unknown or already in a terminal state.
    fn revoke(
        &self,
        grant_id: GrantId,
        revoked_by: UserId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Deactivates every grant whose expiry has passed by `now`.
    /// Idempotent; returns the number transitioned.
    fn expire_elapsed(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Grants valid at `at` whose remaining usage budget is at most
    /// `threshold`. Unlimited grants never appear.
    fn near_usage_limit(
        &self,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<TemporaryPermission>>;

    /// Hard-deletes grants that expired before `cutoff`. Reserved for
    /// cleanup jobs.
    fn purge_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory temporary grant store.
#[derive(Debug, Default)]
pub struct MemoryTemporaryStore {
    grants: RwLock<HashMap<GrantId, TemporaryPermission>>,
    next_id: AtomicU64,
}

impl MemoryTemporaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a grant by id, for tests and administrative display.
    pub fn get(&self, grant_id: GrantId) -> Option<TemporaryPermission> {
        self.grants
            .read()
            .expect("lock poisoned")
            .get(&grant_id)
            .cloned()
    }
}

impl TemporaryGrantStore for MemoryTemporaryStore {
    fn valid_grant(
        &self,
        user_id: UserId,
        resource_type: &ResourceType,
        resource_id: &ResourceId,
        operation: Operation,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<TemporaryPermission>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let grants = self.grants.read().expect("lock poisoned");
        Ok(grants
            .values()
            .filter(|g| g.matches(user_id, resource_type, resource_id, operation))
            .filter(|g| g.is_valid(at))
            .max_by_key(|g| (g.created_at, g.id))
            .cloned())
    }

    fn create(
        &self,
        spec: GrantSpec,
        grant_type: GrantType,
        delegated_from: Option<UserId>,
        now: DateTime<Utc>,
    ) -> StoreResult<TemporaryPermission> {
        if (grant_type == GrantType::Delegated) != delegated_from.is_some() {
            return Err(StoreError::InvalidGrant(
                "delegated_from must be set iff the grant is delegated".to_string(),
            ));
        }
        let id = GrantId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let grant = TemporaryPermission {
            id,
            user_id: spec.user_id,
            resource_type: spec.resource_type,
            resource_id: spec.resource_id,
            operation: spec.operation,
            effective_from: spec.effective_from,
            expires_at: spec.expires_at,
            usage_limit: spec.usage_limit,
            used_count: 0,
            grant_type,
            delegated_from,
            is_active: true,
            is_revoked: false,
            revoked_by: None,
            revoked_reason: None,
            created_at: now,
        };
        info!(
            grant = %id,
            user = %grant.user_id,
            resource = %grant.resource_type,
            operation = %grant.operation,
            delegated = grant.grant_type == GrantType::Delegated,
            "temporary grant created"
        );
        self.grants
            .write()
            .expect("lock poisoned")
            .insert(id, grant.clone());
        Ok(grant)
    }

    fn record_usage(&self, grant_id: GrantId, at: DateTime<Utc>) -> StoreResult<bool> {
        // Validity check and increment under one write lock: concurrent
        // callers serialize here, so the limit cannot be exceeded.
        let mut grants = self.grants.write().expect("lock poisoned");
        let Some(grant) = grants.get_mut(&grant_id) else {
            return Ok(false);
        };
        if !grant.is_valid(at) {
            debug!(grant = %grant_id, "usage recording refused: grant no longer valid");
            return Ok(false);
        }
        grant.used_count += 1;
        debug!(
            grant = %grant_id,
            used = grant.used_count,
            limit = grant.usage_limit,
            "usage recorded"
        );
        Ok(true)
    }

    fn revoke(
        &self,
        grant_id: GrantId,
        revoked_by: UserId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut grants = self.grants.write().expect("lock poisoned");
        let Some(grant) = grants.get_mut(&grant_id) else {
            return Ok(false);
        };
        if grant.state(at).is_terminal() {
            return Ok(false);
        }
        grant.is_revoked = true;
        grant.is_active = false;
        grant.revoked_by = Some(revoked_by);
        grant.revoked_reason = Some(reason.to_string());
        warn!(grant = %grant_id, by = %revoked_by, reason, "temporary grant revoked");
        Ok(true)
    }

    fn expire_elapsed(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut grants = self.grants.write().expect("lock poisoned");
        let mut expired = 0;
        for grant in grants
            .values_mut()
            .filter(|g| g.is_active && !g.is_revoked && now >= g.expires_at)
        {
            grant.is_active = false;
            expired += 1;
        }
        Ok(expired)
    }

    fn near_usage_limit(
        &self,
        threshold: u32,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<TemporaryPermission>> {
        let grants = self.grants.read().expect("lock poisoned");
        Ok(grants
            .values()
            .filter(|g| g.is_valid(at) && g.usage_limit != 0)
            .filter(|g| g.usage_limit - g.used_count <= threshold)
            .cloned()
            .collect())
    }

    fn purge_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut grants = self.grants.write().expect("lock poisoned");
        let before = grants.len();
        grants.retain(|_, g| g.expires_at >= cutoff);
        Ok(before - grants.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
