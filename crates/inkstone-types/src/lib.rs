//! # inkstone-types: Core authorization types for Inkstone
//!
//! This crate contains the shared types used across the Inkstone
//! authorization engine:
//! - Entity IDs ([`UserId`], [`RoleId`], [`PermissionId`], [`RuleId`], [`GrantId`])
//! - The static grant model ([`Role`], [`Permission`], [`RolePermission`], [`UserRole`])
//! - Attribute-based rules ([`DataPermissionRule`], [`RuleTarget`], [`RuleSource`])
//! - Temporary grants ([`TemporaryPermission`], [`GrantType`])
//! - Permission breadth ([`Scope`]) and operations ([`Operation`])
//! - The derived lifecycle state machine ([`LifecycleState`])
//!
//! Validity is always evaluated against an explicit `at` timestamp rather
//! than the wall clock, so stores and tests share one notion of "now".

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type! {
    /// Unique identifier for a platform user (the principal in a decision).
    UserId
}

id_type! {
    /// Unique identifier for a role.
    RoleId
}

id_type! {
    /// Unique identifier for a permission definition.
    PermissionId
}

id_type! {
    /// Unique identifier for a data-permission rule.
    RuleId
}

id_type! {
    /// Unique identifier for a temporary permission grant.
    GrantId
}

// ============================================================================
// Resource identity
// ============================================================================

/// The kind of resource a grant or rule applies to (e.g. `"Post"`,
/// `"Comment"`, `"Category"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a concrete resource instance (a specific post, comment,
/// etc.). Kept opaque: the engine only ever compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Operation
// ============================================================================

/// Operation a principal may perform on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new resource instance.
    Create,
    /// Read a resource instance.
    Read,
    /// Update an existing resource instance.
    Update,
    /// Delete a resource instance.
    Delete,
    /// List resource instances.
    List,
    /// Export data outside the platform.
    Export,
    /// Approve content awaiting moderation.
    Approve,
    /// Publish a draft.
    Publish,
    /// Archive a resource instance.
    Archive,
    /// Administer the resource type itself.
    Manage,
}

impl Operation {
    /// Returns whether this operation mutates state.
    ///
    /// Used for audit-severity classification; read-only operations still
    /// produce decision events but at a lower log level.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Read | Operation::List | Operation::Export)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Create => "Create",
            Operation::Read => "Read",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::List => "List",
            Operation::Export => "Export",
            Operation::Approve => "Approve",
            Operation::Publish => "Publish",
            Operation::Archive => "Archive",
            Operation::Manage => "Manage",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Scope - breadth of data a permission covers
// ============================================================================

/// Breadth of data a permission covers, ordered by increasing breadth:
/// `None < Own < Department < Organization < Public < Global`.
///
/// The derived `Ord` carries the coverage relation: a permission with scope
/// `S` covers a request that requires scope `R` iff `S >= R` (and `S` is not
/// [`Scope::None`], which covers nothing).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Scope {
    /// Covers nothing. Exists so a permission row can be parked without
    /// being deleted.
    #[default]
    None,
    /// The principal's own resources.
    Own,
    /// Resources belonging to the principal's department.
    Department,
    /// Resources anywhere in the organization.
    Organization,
    /// Publicly visible resources.
    Public,
    /// Everything, including unpublished and cross-tenant data.
    Global,
}

impl Scope {
    /// Returns whether a permission at this scope satisfies a request that
    /// requires at least `required` breadth.
    pub fn covers(&self, required: Scope) -> bool {
        *self != Scope::None && *self >= required
    }
}

// ============================================================================
// Lifecycle state - derived, never stored
// ============================================================================

/// Derived lifecycle state of a rule or temporary grant.
///
/// `Pending → Active → {Expired | Revoked}`; the two right-hand states are
/// terminal. The state is computed from flags and the validity window at a
/// given instant; it is never stored, so nothing can write an entry back
/// out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// `effective_from` is still in the future.
    Pending,
    /// Currently in its validity window and not deactivated.
    Active,
    /// The validity window has elapsed.
    Expired,
    /// Explicitly revoked or deactivated before the window elapsed.
    Revoked,
}

impl LifecycleState {
    /// Returns whether this state is terminal (no transition leaves it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Expired | LifecycleState::Revoked)
    }
}

// ============================================================================
// Static grant model
// ============================================================================

/// An administrative role. Roles are permanent once active; they carry no
/// validity window of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

/// A permission definition: the `(resource, action, scope)` triple.
///
/// The triple is unique among active permissions; the store enforces this
/// on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub resource: ResourceType,
    pub action: Operation,
    pub scope: Scope,
}

impl Permission {
    /// Returns whether this permission covers a request for `operation` on
    /// `resource_type` needing at least `required_scope` breadth.
    pub fn covers(
        &self,
        resource_type: &ResourceType,
        operation: Operation,
        required_scope: Scope,
    ) -> bool {
        self.resource == *resource_type
            && self.action == operation
            && self.scope.covers(required_scope)
    }
}

/// Assignment of a [`Permission`] to a [`Role`], with optional expiry and
/// grant provenance.
///
/// At most one valid (active, non-expired) row exists per
/// `(role, permission)` pair; a second grant reactivates or extends the
/// existing row instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<UserId>,
    pub is_active: bool,
}

impl RolePermission {
    /// Returns whether this assignment is valid at `at`.
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| at < exp)
    }
}

/// Assignment of a [`Role`] to a user, with optional expiry.
///
/// A user's effective roles are the assignments that are active and not
/// expired. An invalid assignment contributes none of its role's
/// permissions; there are no partial grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UserRole {
    /// Returns whether this assignment is valid at `at`.
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| at < exp)
    }
}

// ============================================================================
// Data permission rules
// ============================================================================

/// The principal a [`DataPermissionRule`] targets: exactly one of a user
/// or a role, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleTarget {
    /// Rule applies to a single user.
    User(UserId),
    /// Rule applies to every holder of a role.
    Role(RoleId),
}

impl RuleTarget {
    /// Returns whether this target matches the given principal, described
    /// by their user id and effective role ids.
    pub fn matches(&self, user_id: UserId, role_ids: &[RoleId]) -> bool {
        match self {
            RuleTarget::User(uid) => *uid == user_id,
            RuleTarget::Role(rid) => role_ids.contains(rid),
        }
    }
}

/// Whether a rule was authored directly for a user or inherited from a
/// role-level provisioning process.
///
/// Ordered so that `Direct` sorts before `Inherited`: direct rules win ties
/// at equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleSource {
    /// Authored for a specific user.
    Direct,
    /// Propagated from a role-level rule.
    Inherited,
}

/// An attribute-based allow/deny rule for a specific principal, resource
/// type and operation, optionally narrowed to one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPermissionRule {
    pub id: RuleId,
    pub target: RuleTarget,
    pub resource_type: ResourceType,
    pub operation: Operation,
    /// `None` applies the rule to every instance of the resource type.
    pub resource_id: Option<ResourceId>,
    /// The outcome when this rule wins resolution.
    pub is_allowed: bool,
    /// Higher priority wins.
    pub priority: i32,
    pub source: RuleSource,
    /// Start of the validity window; `None` is open-ended.
    pub effective_from: Option<DateTime<Utc>>,
    /// End of the validity window (exclusive); `None` is open-ended.
    pub effective_to: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DataPermissionRule {
    /// Returns whether the rule is effective at `at`: active and inside
    /// its `[effective_from, effective_to)` window, open-ended on either
    /// side when the bound is absent.
    pub fn is_effective(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_from.is_none_or(|from| at >= from)
            && self.effective_to.is_none_or(|to| at < to)
    }

    /// Returns whether the rule matches a decision request, ignoring the
    /// validity window (see [`Self::is_effective`]).
    ///
    /// A rule without a `resource_id` matches any instance; a rule with one
    /// matches only that instance.
    pub fn matches(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        resource_type: &ResourceType,
        operation: Operation,
        resource_id: Option<&ResourceId>,
    ) -> bool {
        self.target.matches(user_id, role_ids)
            && self.resource_type == *resource_type
            && self.operation == operation
            && match &self.resource_id {
                None => true,
                Some(rid) => resource_id == Some(rid),
            }
    }

    /// Derived lifecycle state at `at`.
    ///
    /// A rule has no revocation record of its own, so deactivation while
    /// the window was still open reads as `Revoked` and deactivation after
    /// (or by) window elapse reads as `Expired`.
    pub fn state(&self, at: DateTime<Utc>) -> LifecycleState {
        let window_elapsed = self.effective_to.is_some_and(|to| at >= to);
        if window_elapsed {
            return LifecycleState::Expired;
        }
        if !self.is_active {
            return LifecycleState::Revoked;
        }
        if self.effective_from.is_some_and(|from| at < from) {
            LifecycleState::Pending
        } else {
            LifecycleState::Active
        }
    }
}

// ============================================================================
// Temporary permissions
// ============================================================================

/// How a temporary grant came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    /// Granted directly by an administrator or provisioning process.
    Direct,
    /// Delegated by another user; `delegated_from` names the delegator.
    Delegated,
}

/// A time-boxed, optionally usage-limited permission grant for one user on
/// one concrete resource instance.
///
/// Unlike [`DataPermissionRule`], the expiry is mandatory and the grant is
/// always instance-scoped. Once expired or revoked a grant is permanently
/// invalid; `used_count` only ever increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryPermission {
    pub id: GrantId,
    pub user_id: UserId,
    pub resource_type: ResourceType,
    pub resource_id: ResourceId,
    pub operation: Operation,
    pub effective_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Maximum number of recorded usages; `0` means unlimited.
    pub usage_limit: u32,
    pub used_count: u32,
    pub grant_type: GrantType,
    /// Set iff `grant_type` is [`GrantType::Delegated`].
    pub delegated_from: Option<UserId>,
    pub is_active: bool,
    pub is_revoked: bool,
    pub revoked_by: Option<UserId>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TemporaryPermission {
    /// Returns whether the usage budget is spent.
    pub fn usage_exhausted(&self) -> bool {
        self.usage_limit != 0 && self.used_count >= self.usage_limit
    }

    /// Returns whether the grant is valid at `at`:
    /// active, not revoked, inside `[effective_from, expires_at)`, and with
    /// usage budget remaining.
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && !self.is_revoked
            && at >= self.effective_from
            && at < self.expires_at
            && !self.usage_exhausted()
    }

    /// Derived lifecycle state at `at`. Revocation takes precedence over
    /// expiry so audit trails report what actually ended the grant.
    pub fn state(&self, at: DateTime<Utc>) -> LifecycleState {
        if self.is_revoked {
            return LifecycleState::Revoked;
        }
        if at >= self.expires_at {
            return LifecycleState::Expired;
        }
        if !self.is_active {
            // Deactivated by a sweep that ran ahead of the wall clock read;
            // treated as expired since sweeps only ever expire.
            return LifecycleState::Expired;
        }
        if at < self.effective_from {
            LifecycleState::Pending
        } else {
            LifecycleState::Active
        }
    }

    /// Returns whether the grant matches the exact decision tuple.
    pub fn matches(
        &self,
        user_id: UserId,
        resource_type: &ResourceType,
        resource_id: &ResourceId,
        operation: Operation,
    ) -> bool {
        self.user_id == user_id
            && self.resource_type == *resource_type
            && self.resource_id == *resource_id
            && self.operation == operation
    }
}

// ============================================================================
// Tests
// ============================================================================
