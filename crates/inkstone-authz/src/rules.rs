//! Data-permission rule store: attribute-based allow/deny rules.
//!
//! Rules are the fine-grained layer of the decision. Each rule targets a
//! user or a role, names a resource type and operation, optionally narrows
//! to one resource instance, and carries a priority and a validity window.
//! The store returns matches already ordered by the resolution key:
//! priority descending, then `Direct` before `Inherited`, then most
//! recently created first.

use std::cmp::Reverse;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use inkstone_types::{
    DataPermissionRule, Operation, ResourceId, ResourceType, RoleId, RuleId, RuleSource,
    RuleTarget, UserId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

// ============================================================================
// Rule specification
// ============================================================================

/// Everything an administrator supplies when authoring a rule; the store
/// fills in the id and creation timestamp.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub target: RuleTarget,
    pub resource_type: ResourceType,
    pub operation: Operation,
    pub resource_id: Option<ResourceId>,
    pub is_allowed: bool,
    pub priority: i32,
    pub source: RuleSource,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
}

// ============================================================================
// Trait
// ============================================================================

/// Interface the resolution engine and lifecycle manager consume for
/// attribute-based rules.
pub trait DataRuleStore: Send + Sync {
    /// Rules effective at `at` that match the principal/resource/operation
    /// tuple, ordered by the resolution key
    /// `(priority desc, Direct before Inherited, created_at desc)`.
    fn matching_rules(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DataPermissionRule>>;

    /// Advisory conflict check: true when two rules effective at `at`
    /// match the same tuple with different outcomes. Never blocks
    /// resolution; the ordering key still decides.
    fn has_conflicting_rule(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<bool>;

    /// Deactivates a rule. Returns false when the rule is unknown or
    /// already inactive.
    fn deactivate(&self, rule_id: RuleId) -> StoreResult<bool>;

    /// Deactivates every active rule whose window has elapsed by `now`.
    /// Idempotent; returns the number of rules transitioned.
    fn expire_elapsed(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Hard-deletes rules whose window ended before `cutoff`. Reserved for
    /// cleanup jobs; normal operation only ever deactivates.
    fn purge_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory rule store.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<Vec<DataPermissionRule>>,
    next_id: AtomicU64,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a rule authored at `now` and returns its id.
    pub fn insert(&self, spec: RuleSpec, now: DateTime<Utc>) -> RuleId {
        let id = RuleId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let rule = DataPermissionRule {
            id,
            target: spec.target,
            resource_type: spec.resource_type,
            operation: spec.operation,
            resource_id: spec.resource_id,
            is_allowed: spec.is_allowed,
            priority: spec.priority,
            source: spec.source,
            effective_from: spec.effective_from,
            effective_to: spec.effective_to,
            is_active: true,
            created_at: now,
        };
        debug!(rule = %id, allowed = rule.is_allowed, priority = rule.priority, "rule inserted");
        self.rules.write().expect("lock poisoned").push(rule);
        id
    }

    /// Rules effective at `at` that conflict on the same tuple: returned
    /// for administrator display alongside [`DataRuleStore::has_conflicting_rule`].
    pub fn conflicts_for(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DataPermissionRule>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let rules = self.rules.read().expect("lock poisoned");
        let matched: Vec<&DataPermissionRule> = rules
            .iter()
            .filter(|r| {
                r.is_effective(at)
                    && r.matches(user_id, role_ids, resource_type, operation, resource_id)
            })
            .collect();

        let has_allow = matched.iter().any(|r| r.is_allowed);
        let has_deny = matched.iter().any(|r| !r.is_allowed);
        if has_allow && has_deny {
            Ok(matched.into_iter().cloned().collect())
        } else {
            Ok(Vec::new())
        }
    }

    /// Snapshot of a rule by id, for tests and administrative display.
    pub fn get(&self, rule_id: RuleId) -> Option<DataPermissionRule> {
        self.rules
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
    }
}

/// Sorts rules by the resolution ordering key.
fn sort_by_resolution_key(rules: &mut [DataPermissionRule]) {
    rules.sort_by_key(|r| (Reverse(r.priority), r.source, Reverse(r.created_at)));
}

impl DataRuleStore for MemoryRuleStore {
    fn matching_rules(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DataPermissionRule>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let rules = self.rules.read().expect("lock poisoned");
        let mut matched: Vec<DataPermissionRule> = rules
            .iter()
            .filter(|r| {
                r.is_effective(at)
                    && r.matches(user_id, role_ids, resource_type, operation, resource_id)
            })
            .cloned()
            .collect();
        drop(rules);

        sort_by_resolution_key(&mut matched);
        Ok(matched)
    }

    fn has_conflicting_rule(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        let conflicting = !self
            .conflicts_for(
                user_id,
                role_ids,
                resource_type,
                operation,
                resource_id,
                at,
                cancel,
            )?
            .is_empty();
        if conflicting {
            warn!(
                user = %user_id,
                resource = %resource_type,
                operation = %operation,
                "conflicting data-permission rules detected"
            );
        }
        Ok(conflicting)
    }

    fn deactivate(&self, rule_id: RuleId) -> StoreResult<bool> {
        let mut rules = self.rules.write().expect("lock poisoned");
        match rules.iter_mut().find(|r| r.id == rule_id && r.is_active) {
            Some(rule) => {
                rule.is_active = false;
                debug!(rule = %rule_id, "rule deactivated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn expire_elapsed(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut rules = self.rules.write().expect("lock poisoned");
        let mut expired = 0;
        for rule in rules
            .iter_mut()
            .filter(|r| r.is_active && r.effective_to.is_some_and(|to| now >= to))
        {
            rule.is_active = false;
            expired += 1;
        }
        Ok(expired)
    }

    fn purge_expired_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut rules = self.rules.write().expect("lock poisoned");
        let before = rules.len();
        rules.retain(|r| !r.effective_to.is_some_and(|to| to < cutoff));
        Ok(before - rules.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, 12, 0, 0).unwrap()
    }

    fn spec_for_user(user: u64, allowed: bool, priority: i32) -> RuleSpec {
        RuleSpec {
            target: RuleTarget::User(UserId::new(user)),
            resource_type: ResourceType::from("Post"),
            operation: Operation::Read,
            resource_id: None,
            is_allowed: allowed,
            priority,
            source: RuleSource::Direct,
            effective_from: None,
            effective_to: None,
        }
    }

    fn matching(
        store: &MemoryRuleStore,
        user: u64,
        roles: &[RoleId],
        at: DateTime<Utc>,
    ) -> Vec<DataPermissionRule> {
        store
            .matching_rules(
                UserId::new(user),
                roles,
                &ResourceType::from("Post"),
                Operation::Read,
                None,
                at,
                &CancellationToken::new(),
            )
            .unwrap()
    }

    #[test]
    fn test_priority_orders_first() {
        let store = MemoryRuleStore::new();
        let low = store.insert(spec_for_user(1, true, 1), ts(9));
        let high = store.insert(spec_for_user(1, false, 10), ts(8));

        let rules = matching(&store, 1, &[], ts(12));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, high, "higher priority wins despite older");
        assert_eq!(rules[1].id, low);
    }

    #[test]
    fn test_direct_beats_inherited_at_equal_priority() {
        let store = MemoryRuleStore::new();
        let role = RoleId::new(7);
        let inherited = store.insert(
            RuleSpec {
                target: RuleTarget::Role(role),
                source: RuleSource::Inherited,
                ..spec_for_user(0, false, 5)
            },
            ts(10),
        );
        let direct = store.insert(spec_for_user(1, true, 5), ts(9));

        let rules = matching(&store, 1, &[role], ts(12));
        assert_eq!(rules[0].id, direct);
        assert_eq!(rules[1].id, inherited);
    }

    #[test]
    fn test_created_at_breaks_remaining_ties() {
        let store = MemoryRuleStore::new();
        let older = store.insert(spec_for_user(1, true, 5), ts(9));
        let newer = store.insert(spec_for_user(1, false, 5), ts(10));

        let rules = matching(&store, 1, &[], ts(12));
        assert_eq!(rules[0].id, newer, "more recently created wins ties");
        assert_eq!(rules[1].id, older);
    }

    #[test]
    fn test_window_filtering() {
        let store = MemoryRuleStore::new();
        store.insert(
            RuleSpec {
                effective_from: Some(ts(9)),
                effective_to: Some(ts(17)),
                ..spec_for_user(1, true, 5)
            },
            ts(8),
        );

        assert!(matching(&store, 1, &[], ts(8)).is_empty(), "not yet effective");
        assert_eq!(matching(&store, 1, &[], ts(12)).len(), 1);
        assert!(matching(&store, 1, &[], ts(17)).is_empty(), "window elapsed");
    }

    #[test]
    fn test_role_rule_matches_role_holder_only() {
        let store = MemoryRuleStore::new();
        let role = RoleId::new(3);
        store.insert(
            RuleSpec {
                target: RuleTarget::Role(role),
                source: RuleSource::Inherited,
                ..spec_for_user(0, true, 5)
            },
            ts(9),
        );

        assert_eq!(matching(&store, 99, &[role], ts(12)).len(), 1);
        assert!(matching(&store, 99, &[RoleId::new(4)], ts(12)).is_empty());
    }

    #[test]
    fn test_conflict_detection_is_advisory() {
        let store = MemoryRuleStore::new();
        store.insert(spec_for_user(1, true, 5), ts(9));

        let check = |store: &MemoryRuleStore| {
            store
                .has_conflicting_rule(
                    UserId::new(1),
                    &[],
                    &ResourceType::from("Post"),
                    Operation::Read,
                    None,
                    ts(12),
                    &CancellationToken::new(),
                )
                .unwrap()
        };
        assert!(!check(&store), "single rule cannot conflict");

        store.insert(spec_for_user(1, false, 3), ts(10));
        assert!(check(&store));

        // Resolution still proceeds: the ordering key picks a winner.
        let rules = matching(&store, 1, &[], ts(12));
        assert!(rules[0].is_allowed, "priority 5 allow outranks priority 3 deny");

        let conflicts = store
            .conflicts_for(
                UserId::new(1),
                &[],
                &ResourceType::from("Post"),
                Operation::Read,
                None,
                ts(12),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(conflicts.len(), 2);
    }

    #[test]
    fn test_cancelled_conflict_check() {
        let store = MemoryRuleStore::new();
        store.insert(spec_for_user(1, true, 5), ts(9));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.has_conflicting_rule(
            UserId::new(1),
            &[],
            &ResourceType::from("Post"),
            Operation::Read,
            None,
            ts(12),
            &cancel,
        );
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_deactivate_reports_invalid_target() {
        let store = MemoryRuleStore::new();
        let id = store.insert(spec_for_user(1, true, 5), ts(9));

        assert!(store.deactivate(id).unwrap());
        assert!(!store.deactivate(id).unwrap(), "already inactive");
        assert!(!store.deactivate(RuleId::new(999)).unwrap(), "unknown rule");
        assert!(matching(&store, 1, &[], ts(12)).is_empty());
    }

    #[test]
    fn test_expire_elapsed_is_idempotent() {
        let store = MemoryRuleStore::new();
        store.insert(
            RuleSpec {
                effective_to: Some(ts(10)),
                ..spec_for_user(1, true, 5)
            },
            ts(8),
        );
        store.insert(spec_for_user(1, true, 5), ts(8)); // open-ended

        assert_eq!(store.expire_elapsed(ts(11)).unwrap(), 1);
        assert_eq!(store.expire_elapsed(ts(11)).unwrap(), 0, "second sweep is a no-op");
        assert_eq!(matching(&store, 1, &[], ts(11)).len(), 1);
    }

    #[test]
    fn test_purge_only_removes_long_expired() {
        let store = MemoryRuleStore::new();
        // Ended on day 1: well past the cutoff.
        store.insert(
            RuleSpec {
                effective_to: Some(day(1)),
                ..spec_for_user(1, true, 5)
            },
            day(1),
        );
        // Ended on day 20: expired but recent.
        store.insert(
            RuleSpec {
                effective_to: Some(day(20)),
                ..spec_for_user(1, true, 5)
            },
            day(1),
        );
        // Open-ended: active.
        store.insert(spec_for_user(1, true, 5), day(1));

        let purged = store.purge_expired_before(day(15)).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.rules.read().unwrap().len(), 2);
    }

    #[test]
    fn test_cancelled_query() {
        let store = MemoryRuleStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.matching_rules(
            UserId::new(1),
            &[],
            &ResourceType::from("Post"),
            Operation::Read,
            None,
            ts(12),
            &cancel,
        );
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }
}
