//! Operator library for the NSX container plugin workloads
//!
//! This crate provides the core functionality for:
//! - Drift detection and recreation of the managed workloads
//! - Crash-loop remediation of node agent pods
//! - A deduplicating work queue and controller runtime
//! - Health checks, operator status and observability

pub mod controller;
pub mod desired;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod ownership;
pub mod reconcile;
pub mod status;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ErrorKind, OwnershipError, ReconcileError, TableError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OperatorMetrics, StructuredLogger};
