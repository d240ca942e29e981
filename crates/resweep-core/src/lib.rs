//! # resweep Core Library
//!
//! Coverage-driven iterative inference for per-residue predictions on a density map.
//! Many overlapping crops, each centred on a randomly chosen under-visited residue, are
//! pushed through an inference engine until every residue has been covered by a
//! configured number of independent passes.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Structure`, `Residue`,
//!   `AminoAcid`), the volumetric `FieldGrid`, and readers/writers for structure and
//!   map files.
//!
//! - **[`engine`]: The Logic Core.** The stateful scheduling pieces: coverage tracking and
//!   selection, the static neighbour index, crop building, the scoped multi-device
//!   inference pool, result aggregation, progress monitoring and abort signals.
//!
//! - **[`workflows`]: The Public API.** [`workflows::refine::run`] composes the engine into
//!   the round loop that drives a structure to full coverage.

pub mod core;
pub mod engine;
pub mod workflows;
