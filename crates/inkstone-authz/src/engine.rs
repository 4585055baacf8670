//! Resolution engine: merges static grants, data rules and temporary
//! grants into one allow/deny decision.
//!
//! The precedence order is deliberate and must be preserved exactly:
//! explicit time-boxed exceptions beat explicit fine-grained rules, which
//! beat coarse role defaults, which beat nothing (default deny). Changing
//! it silently changes authorization outcomes for the whole platform.
//!
//! The engine holds no mutable state of its own: a decision is a pure
//! function of store contents at call time, composed from three
//! independent reads. No locking happens on the engine's behalf.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use inkstone_types::{
    GrantId, Operation, PermissionId, ResourceId, ResourceType, RuleId, Scope, UserId,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AuthzError, AuthzResult};
use crate::grants::RoleGrantStore;
use crate::rules::DataRuleStore;
use crate::temporary::TemporaryGrantStore;

// ============================================================================
// Request
// ============================================================================

/// A single authorization question: may this user perform this operation
/// on this resource?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub user_id: UserId,
    pub resource_type: ResourceType,
    pub operation: Operation,
    /// Concrete instance, when the question is about one. Temporary
    /// grants are instance-scoped, so a request without an instance never
    /// consults them.
    pub resource_id: Option<ResourceId>,
    /// Breadth the caller determined this request needs. Scope comparison
    /// against the principal's relationship to the resource happens above
    /// this engine; here it is only an ordering check.
    pub required_scope: Scope,
}

impl DecisionRequest {
    pub fn new(user_id: UserId, resource_type: ResourceType, operation: Operation) -> Self {
        Self {
            user_id,
            resource_type,
            operation,
            resource_id: None,
            required_scope: Scope::Own,
        }
    }

    pub fn on_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn requiring_scope(mut self, scope: Scope) -> Self {
        self.required_scope = scope;
        self
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Which evidence layer produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionSource {
    /// A valid temporary grant for the exact tuple.
    Temporary,
    /// The highest-ordered matching data-permission rule.
    DataRule,
    /// Static role-based permissions (including their absence).
    RoleBased,
}

/// Why the decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionReason {
    /// A valid temporary grant allowed the request.
    TemporaryGrant,
    /// The winning rule allowed the request.
    RuleAllowed,
    /// The winning rule denied the request.
    RuleDenied,
    /// A covering static permission allowed the request.
    RoleGranted,
    /// No evidence covered the request: default deny.
    NoGrant,
}

/// Provenance of the winning evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Evidence {
    TemporaryGrant(GrantId),
    DataRule(RuleId),
    RolePermission(PermissionId),
}

/// The outcome of a decision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub source: DecisionSource,
    /// The winning grant/rule/permission, absent on default deny.
    pub matched: Option<Evidence>,
}

// ============================================================================
// Audit event
// ============================================================================

/// Event emitted to the audit collaborator after every decision. The
/// engine never persists these itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub user_id: UserId,
    pub resource_type: ResourceType,
    pub operation: Operation,
    pub resource_id: Option<ResourceId>,
    pub allowed: bool,
    pub source: DecisionSource,
    pub matched: Option<Evidence>,
    pub timestamp: DateTime<Utc>,
}

/// Audit collaborator seam. Implementations persist or forward events;
/// recording must not fail the decision, so the method is infallible.
pub trait DecisionSink: Send + Sync {
    fn record(&self, event: &DecisionEvent);
}

// ============================================================================
// Engine
// ============================================================================

/// The resolution engine.
pub struct DecisionEngine {
    grants: Arc<dyn RoleGrantStore>,
    rules: Arc<dyn DataRuleStore>,
    temporary: Arc<dyn TemporaryGrantStore>,
    sink: Option<Arc<dyn DecisionSink>>,
    audit_enabled: bool,
}

impl DecisionEngine {
    pub fn new(
        grants: Arc<dyn RoleGrantStore>,
        rules: Arc<dyn DataRuleStore>,
        temporary: Arc<dyn TemporaryGrantStore>,
    ) -> Self {
        Self {
            grants,
            rules,
            temporary,
            sink: None,
            audit_enabled: true,
        }
    }

    /// Attaches an audit sink; every decision emits a [`DecisionEvent`].
    pub fn with_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Disables decision logging (for tests).
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    /// Decides the request against store contents as of the wall clock.
    pub fn decide(
        &self,
        request: &DecisionRequest,
        cancel: &CancellationToken,
    ) -> AuthzResult<Decision> {
        self.decide_at(request, Utc::now(), cancel)
    }

    /// Decides the request against store contents as of `at`.
    ///
    /// Cancellation yields `Err(AuthzError::Cancelled)`: no decision, and
    /// explicitly not a deny; store failure yields
    /// `Err(AuthzError::Store(_))`. Everything else is a `Decision`.
    pub fn decide_at(
        &self,
        request: &DecisionRequest,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AuthzResult<Decision> {
        if cancel.is_cancelled() {
            return Err(AuthzError::Cancelled);
        }

        // 1. Temporary grants outrank everything, but only exist for
        //    concrete resource instances.
        if let Some(resource_id) = &request.resource_id {
            if let Some(grant) = self.temporary.valid_grant(
                request.user_id,
                &request.resource_type,
                resource_id,
                request.operation,
                at,
                cancel,
            )? {
                return Ok(self.finish(
                    request,
                    at,
                    Decision {
                        allowed: true,
                        reason: DecisionReason::TemporaryGrant,
                        source: DecisionSource::Temporary,
                        matched: Some(Evidence::TemporaryGrant(grant.id)),
                    },
                ));
            }
        }

        // 2. Highest-ordered matching data rule decides.
        let role_ids = self.grants.effective_roles(request.user_id, at, cancel)?;
        let matched_rules = self.rules.matching_rules(
            request.user_id,
            &role_ids,
            &request.resource_type,
            request.operation,
            request.resource_id.as_ref(),
            at,
            cancel,
        )?;
        if let Some(winner) = matched_rules.first() {
            return Ok(self.finish(
                request,
                at,
                Decision {
                    allowed: winner.is_allowed,
                    reason: if winner.is_allowed {
                        DecisionReason::RuleAllowed
                    } else {
                        DecisionReason::RuleDenied
                    },
                    source: DecisionSource::DataRule,
                    matched: Some(Evidence::DataRule(winner.id)),
                },
            ));
        }

        // 3. Fall back to static role permissions.
        let permissions = self
            .grants
            .effective_permissions(request.user_id, at, cancel)?;
        if let Some(covering) = permissions.iter().find(|p| {
            p.covers(
                &request.resource_type,
                request.operation,
                request.required_scope,
            )
        }) {
            return Ok(self.finish(
                request,
                at,
                Decision {
                    allowed: true,
                    reason: DecisionReason::RoleGranted,
                    source: DecisionSource::RoleBased,
                    matched: Some(Evidence::RolePermission(covering.id)),
                },
            ));
        }

        // 4. No evidence at all: default deny.
        Ok(self.finish(
            request,
            at,
            Decision {
                allowed: false,
                reason: DecisionReason::NoGrant,
                source: DecisionSource::RoleBased,
                matched: None,
            },
        ))
    }

    /// Logs the decision and emits the audit event.
    fn finish(&self, request: &DecisionRequest, at: DateTime<Utc>, decision: Decision) -> Decision {
        if self.audit_enabled {
            if decision.allowed {
                info!(
                    user = %request.user_id,
                    resource = %request.resource_type,
                    operation = %request.operation,
                    source = ?decision.source,
                    "access allowed"
                );
            } else {
                warn!(
                    user = %request.user_id,
                    resource = %request.resource_type,
                    operation = %request.operation,
                    reason = ?decision.reason,
                    "access denied"
                );
            }
        }
        if let Some(sink) = &self.sink {
            sink.record(&DecisionEvent {
                user_id: request.user_id,
                resource_type: request.resource_type.clone(),
                operation: request.operation,
                resource_id: request.resource_id.clone(),
                allowed: decision.allowed,
                source: decision.source,
                matched: decision.matched,
                timestamp: at,
            });
        }
        decision
    }
}

// ============================================================================
// Tests
// ============================================================================
