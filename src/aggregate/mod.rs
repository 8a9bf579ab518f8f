//! Thread-safe aggregation of classified results into a run summary
//!
//! The [`Aggregator`] is seeded with every slot in the sweep matrix up front
//! and filled in by worker threads as jobs resolve, in any order. A
//! [`RunSummary`] snapshot is only produced once every slot holds a result,
//! so cancelled runs record their unresolved items explicitly before
//! snapshotting.

mod aggregator;
mod summary;

pub use aggregator::{AggregateError, Aggregator};
pub use summary::{
    ConfigSummary, ModuleResult, RunSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION,
};
