//! Authorization decision engine.
//!
//! Answers one question deterministically: may this user perform this
//! operation on this resource right now? Three evidence layers feed the
//! answer, consulted in strict precedence order:
//!
//! 1. **Temporary grants** ([`temporary`]): time-boxed, usage-limited,
//!    instance-scoped escalations. Highest precedence.
//! 2. **Data-permission rules** ([`rules`]): attribute-based allow/deny
//!    rules with priorities and validity windows.
//! 3. **Static role grants** ([`grants`]): the coarse RBAC layer,
//!    `User → Role → Permission` chains.
//!
//! When no layer produces evidence, the answer is deny. The engine
//! ([`engine`]) composes the three stores behind traits, so the in-memory
//! implementations here and database-backed ones in production are
//! interchangeable.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use inkstone_authz::{
//!     DecisionEngine, DecisionRequest, MemoryGrantStore, MemoryRuleStore,
//!     MemoryTemporaryStore,
//! };
//! use inkstone_types::{Operation, ResourceType, Scope, UserId};
//! use tokio_util::sync::CancellationToken;
//!
//! let grants = Arc::new(MemoryGrantStore::new());
//! let role = grants.define_role("author", "writes posts");
//! let perm = grants.define_permission(ResourceType::from("Post"), Operation::Read, Scope::Own);
//! grants.grant_permission(role, perm, None, None);
//! grants.assign_role(UserId::new(1), role, None);
//!
//! let engine = DecisionEngine::new(
//!     grants,
//!     Arc::new(MemoryRuleStore::new()),
//!     Arc::new(MemoryTemporaryStore::new()),
//! );
//! let request = DecisionRequest::new(UserId::new(1), ResourceType::from("Post"), Operation::Read);
//! let decision = engine.decide(&request, &CancellationToken::new()).unwrap();
//! assert!(decision.allowed);
//! ```

pub mod engine;
pub mod error;
pub mod grants;
pub mod rules;
pub mod temporary;

pub use engine::{
    Decision, DecisionEngine, DecisionEvent, DecisionReason, DecisionRequest, DecisionSink,
    DecisionSource, Evidence,
};
pub use error::{AuthzError, AuthzResult, StoreError, StoreResult};
pub use grants::{MemoryGrantStore, RoleGrantStore};
pub use rules::{DataRuleStore, MemoryRuleStore, RuleSpec};
pub use temporary::{GrantSpec, MemoryTemporaryStore, TemporaryGrantStore};
