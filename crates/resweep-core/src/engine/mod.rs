//! # Engine Module
//!
//! The stateful pieces of the coverage-driven scheduler. One round of a run selects crop
//! centres, cuts crops around them, runs one batch per device in parallel, and merges
//! the results back in device order.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Scheduling parameters and their builder
//! - **Coverage** ([`coverage`]) - Visit counts, running aggregates and centre selection
//! - **Neighbours** ([`neighbors`]) - Static neighbour lists used to spread centres apart
//! - **Crops** ([`crop`]) - Grouping centres into per-device batches of nearest-residue crops
//! - **Dispatch** ([`dispatch`]) - Inference traits, device specs and the scoped device pool
//! - **Aggregation** ([`aggregate`]) - Folding worker output into the aggregate
//! - **Monitoring** ([`monitor`]) - Progress accounting and abort signals
//! - **Results** ([`results`]) - Final per-residue results and CSV export
//! - **Backend** ([`backend`]) - A density-centroid reference model
//! - **Progress Reporting** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - Engine error taxonomy

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod coverage;
pub mod crop;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod neighbors;
pub mod progress;
pub mod results;
