//! Controller runtime
//!
//! Producers push object keys into a deduplicating [`WorkQueue`]; a pool of
//! workers hands each key to a [`Reconciler`] and schedules the next visit
//! from its result.

mod queue;
mod runner;
mod sources;

pub use queue::{RateLimit, WorkQueue};
pub use runner::{Controller, ControllerBuilder, ControllerConfig, Reconciler};
pub use sources::{object_key, ResyncProducer, WatchProducer};
