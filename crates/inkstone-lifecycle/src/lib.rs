//! Permission lifecycle management.
//!
//! Grants and rules move through `Pending → Active → Expired | Revoked`;
//! the terminal states are absorbing. This crate provides the
//! administrative surface around those transitions:
//!
//! - [`LifecycleManager`] issues, delegates and revokes temporary grants,
//!   records usage, and runs the periodic expiry sweep.
//! - [`LifecycleConfig`] is the TOML-backed configuration for sweep
//!   cadence, usage-limit warnings and retention.
//!
//! Expiry is always derived from timestamps at evaluation time; the sweep
//! only reconciles stored `is_active` flags after the fact, so resolution
//! correctness never depends on the sweeper being alive.

pub mod config;
pub mod error;
pub mod manager;

pub use config::LifecycleConfig;
pub use error::{Error, Result};
pub use manager::{CleanupStats, LifecycleManager, SweepStats};
