//! Lifecycle manager: issuing, delegating, revoking and sweeping grants.
//!
//! The manager is the administrative front door to the grant and rule
//! stores. Resolution never depends on it: the sweep only makes store
//! state explicit (`is_active` flips on records whose windows already
//! elapsed), so a decision made between sweeps is identical to one made
//! right after.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use inkstone_authz::{DataRuleStore, GrantSpec, TemporaryGrantStore};
use inkstone_types::{GrantId, GrantType, RuleId, TemporaryPermission, UserId};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};

// ============================================================================
// Sweep statistics
// ============================================================================

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Rules whose validity window elapsed and were deactivated.
    pub rules_expired: usize,
    /// Grants whose expiry passed and were deactivated.
    pub grants_expired: usize,
}

/// Outcome of one retention cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Long-expired rules deleted.
    pub rules_purged: usize,
    /// Long-expired grants deleted.
    pub grants_purged: usize,
}

// ============================================================================
// Manager
// ============================================================================

/// Administrative manager for permission lifecycles.
pub struct LifecycleManager {
    rules: Arc<dyn DataRuleStore>,
    temporary: Arc<dyn TemporaryGrantStore>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        rules: Arc<dyn DataRuleStore>,
        temporary: Arc<dyn TemporaryGrantStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            rules,
            temporary,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Issuing
    // ------------------------------------------------------------------

    /// Issues a direct temporary grant.
    pub fn grant_temporary(&self, spec: GrantSpec) -> Result<TemporaryPermission> {
        Self::check_window(&spec)?;
        Ok(self.temporary.create(spec, GrantType::Direct, None, Utc::now())?)
    }

    /// Delegates a grant: the delegator must themselves hold a valid
    /// grant for the exact tuple right now. The delegated grant is then
    /// independent; revoking the delegator's grant later does not
    /// cascade.
    pub fn delegate(&self, delegator: UserId, spec: GrantSpec) -> Result<TemporaryPermission> {
        Self::check_window(&spec)?;
        let now = Utc::now();
        let held = self.temporary.valid_grant(
            delegator,
            &spec.resource_type,
            &spec.resource_id,
            spec.operation,
            now,
            &CancellationToken::new(),
        )?;
        if held.is_none() {
            warn!(%delegator, resource = %spec.resource_type, "delegation refused: no covering grant");
            return Err(Error::NotDelegable { delegator });
        }
        Ok(self
            .temporary
            .create(spec, GrantType::Delegated, Some(delegator), now)?)
    }

    fn check_window(spec: &GrantSpec) -> Result<()> {
        if spec.expires_at <= spec.effective_from {
            return Err(Error::EmptyWindow);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Revocation and usage
    // ------------------------------------------------------------------

    /// Revokes a temporary grant. Returns false when the grant is
    /// unknown or already terminal.
    pub fn revoke_grant(&self, grant_id: GrantId, revoked_by: UserId, reason: &str) -> Result<bool> {
        Ok(self.temporary.revoke(grant_id, revoked_by, reason, Utc::now())?)
    }

    /// Deactivates a data-permission rule. Returns false when the rule
    /// is unknown or already inactive.
    pub fn revoke_rule(&self, rule_id: RuleId) -> Result<bool> {
        Ok(self.rules.deactivate(rule_id)?)
    }

    /// Records one use of a usage-limited grant after an allowed
    /// operation completed. Returns false when the grant was no longer
    /// valid and nothing was recorded.
    pub fn record_usage(&self, grant_id: GrantId) -> Result<bool> {
        Ok(self.temporary.record_usage(grant_id, Utc::now())?)
    }

    /// Valid grants whose remaining usage budget is at or below the
    /// configured threshold, for operator warning.
    pub fn near_usage_limit(&self) -> Result<Vec<TemporaryPermission>> {
        let near = self
            .temporary
            .near_usage_limit(self.config.near_limit_threshold, Utc::now())?;
        for grant in &near {
            warn!(
                grant = %grant.id,
                used = grant.used_count,
                limit = grant.usage_limit,
                "grant nearing its usage limit"
            );
        }
        Ok(near)
    }

    // ------------------------------------------------------------------
    // Sweeping and cleanup
    // ------------------------------------------------------------------

    /// Deactivates every rule and grant whose window elapsed by `now`.
    /// Idempotent: a second sweep at the same instant is a no-op.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let stats = SweepStats {
            rules_expired: self.rules.expire_elapsed(now)?,
            grants_expired: self.temporary.expire_elapsed(now)?,
        };
        if stats != SweepStats::default() {
            info!(
                rules = stats.rules_expired,
                grants = stats.grants_expired,
                "expiry sweep"
            );
        }
        Ok(stats)
    }

    /// Deletes rules and grants that expired more than the configured
    /// retention period before `now`. Recently expired records stay
    /// queryable for audit until then.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupStats> {
        let cutoff = now - ChronoDuration::days(i64::from(self.config.retention_days));
        let stats = CleanupStats {
            rules_purged: self.rules.purge_expired_before(cutoff)?,
            grants_purged: self.temporary.purge_expired_before(cutoff)?,
        };
        if stats != CleanupStats::default() {
            info!(
                rules = stats.rules_purged,
                grants = stats.grants_purged,
                retention_days = self.config.retention_days,
                "retention cleanup"
            );
        }
        Ok(stats)
    }

    /// Runs periodic sweeps until the token is cancelled.
    ///
    /// Store failures are logged and the loop keeps going; a transient
    /// outage must not kill the sweeper.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick = interval(self.config.sweep_interval());

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep(Utc::now()) {
                        warn!(error = %e, "expiry sweep failed");
                    }
                    if let Err(e) = self.near_usage_limit() {
                        warn!(error = %e, "usage-limit check failed");
                    }
                }

                () = cancel.cancelled() => {
                    info!("lifecycle sweeper shutting down");
                    break;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use inkstone_authz::{MemoryRuleStore, MemoryTemporaryStore, RuleSpec};
    use inkstone_types::{LifecycleState, Operation, ResourceId, ResourceType, RuleSource, RuleTarget};

    fn hours_ago(h: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(h)
    }

    fn hours_ahead(h: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::hours(h)
    }

    fn spec(from: DateTime<Utc>, to: DateTime<Utc>) -> GrantSpec {
        GrantSpec {
            user_id: UserId::new(1),
            resource_type: ResourceType::from("Post"),
            resource_id: ResourceId::from("123"),
            operation: Operation::Delete,
            effective_from: from,
            expires_at: to,
            usage_limit: 0,
        }
    }

    struct Fixture {
        rules: Arc<MemoryRuleStore>,
        temporary: Arc<MemoryTemporaryStore>,
        manager: LifecycleManager,
    }

    impl Fixture {
        fn new(config: LifecycleConfig) -> Self {
            let rules = Arc::new(MemoryRuleStore::new());
            let temporary = Arc::new(MemoryTemporaryStore::new());
            let manager = LifecycleManager::new(
                Arc::clone(&rules) as Arc<dyn DataRuleStore>,
                Arc::clone(&temporary) as Arc<dyn TemporaryGrantStore>,
                config,
            );
            Self {
                rules,
                temporary,
                manager,
            }
        }
    }

    #[test]
    fn test_grant_and_revoke() {
        let fx = Fixture::new(LifecycleConfig::default());
        let grant = fx
            .manager
            .grant_temporary(spec(hours_ago(1), hours_ahead(1)))
            .unwrap();
        assert_eq!(grant.grant_type, GrantType::Direct);

        assert!(fx.manager.revoke_grant(grant.id, UserId::new(9), "done").unwrap());
        assert_eq!(
            fx.temporary.get(grant.id).unwrap().state(Utc::now()),
            LifecycleState::Revoked
        );
    }

    #[test]
    fn test_empty_window_rejected() {
        let fx = Fixture::new(LifecycleConfig::default());
        let result = fx.manager.grant_temporary(spec(hours_ahead(1), hours_ago(1)));
        assert!(matches!(result, Err(Error::EmptyWindow)));
    }

    #[test]
    fn test_delegation_requires_covering_grant() {
        let fx = Fixture::new(LifecycleConfig::default());
        let delegator = UserId::new(50);

        // Nothing held yet: refused.
        let attempt = fx.manager.delegate(
            delegator,
            spec(hours_ago(1), hours_ahead(1)),
        );
        assert!(matches!(attempt, Err(Error::NotDelegable { .. })));

        // Give the delegator their own valid grant, then delegate.
        fx.manager
            .grant_temporary(GrantSpec {
                user_id: delegator,
                ..spec(hours_ago(1), hours_ahead(2))
            })
            .unwrap();
        let delegated = fx
            .manager
            .delegate(delegator, spec(hours_ago(1), hours_ahead(1)))
            .unwrap();
        assert_eq!(delegated.grant_type, GrantType::Delegated);
        assert_eq!(delegated.delegated_from, Some(delegator));
    }

    #[test]
    fn test_record_usage_through_manager() {
        let fx = Fixture::new(LifecycleConfig::default());
        let grant = fx
            .manager
            .grant_temporary(GrantSpec {
                usage_limit: 1,
                ..spec(hours_ago(1), hours_ahead(1))
            })
            .unwrap();

        assert!(fx.manager.record_usage(grant.id).unwrap());
        assert!(!fx.manager.record_usage(grant.id).unwrap(), "budget spent");
    }

    #[test]
    fn test_sweep_expires_both_kinds() {
        let fx = Fixture::new(LifecycleConfig::default());
        fx.manager
            .grant_temporary(spec(hours_ago(3), hours_ago(1)))
            .unwrap();
        fx.rules.insert(
            RuleSpec {
                target: RuleTarget::User(UserId::new(1)),
                resource_type: ResourceType::from("Post"),
                operation: Operation::Read,
                resource_id: None,
                is_allowed: true,
                priority: 0,
                source: RuleSource::Direct,
                effective_from: None,
                effective_to: Some(hours_ago(1)),
            },
            hours_ago(3),
        );

        let stats = fx.manager.sweep(Utc::now()).unwrap();
        assert_eq!(stats.rules_expired, 1);
        assert_eq!(stats.grants_expired, 1);

        // Idempotent.
        assert_eq!(fx.manager.sweep(Utc::now()).unwrap(), SweepStats::default());
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let config = LifecycleConfig {
            retention_days: 30,
            ..LifecycleConfig::default()
        };
        let fx = Fixture::new(config);

        // Expired 40 days ago: past retention.
        let old = fx
            .manager
            .grant_temporary(spec(hours_ago(24 * 41), hours_ago(24 * 40)))
            .unwrap();
        // Expired an hour ago: still retained.
        let recent = fx
            .manager
            .grant_temporary(spec(hours_ago(3), hours_ago(1)))
            .unwrap();

        let stats = fx.manager.cleanup_expired(Utc::now()).unwrap();
        assert_eq!(stats.grants_purged, 1);
        assert!(fx.temporary.get(old.id).is_none());
        assert!(fx.temporary.get(recent.id).is_some());
    }

    #[test]
    fn test_near_usage_limit_reporting() {
        let config = LifecycleConfig {
            near_limit_threshold: 2,
            ..LifecycleConfig::default()
        };
        let fx = Fixture::new(config);
        let grant = fx
            .manager
            .grant_temporary(GrantSpec {
                usage_limit: 3,
                ..spec(hours_ago(1), hours_ahead(1))
            })
            .unwrap();
        fx.manager.record_usage(grant.id).unwrap();

        let near = fx.manager.near_usage_limit().unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, grant.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_until_cancelled() {
        let config = LifecycleConfig {
            sweep_interval_minutes: 1,
            ..LifecycleConfig::default()
        };
        let fx = Fixture::new(config);
        let grant = fx
            .manager
            .grant_temporary(spec(hours_ago(3), hours_ago(1)))
            .unwrap();

        let manager = Arc::new(fx.manager);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            async move { manager.run(cancel).await }
        });

        // The first interval tick fires immediately; let it run.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(!fx.temporary.get(grant.id).unwrap().is_active);
    }
}
