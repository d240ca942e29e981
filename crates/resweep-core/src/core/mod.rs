//! # Core Module
//!
//! Fundamental building blocks shared by the scheduling engine.
//!
//! ## Architecture
//!
//! - **Structure Representation** ([`models`]) - Residues, amino-acid types and the
//!   residue-indexed `Structure` that inference refines in place
//! - **Volumetric Data** ([`grid`]) - The normalized density field and its MRC loader
//! - **File I/O** ([`io`]) - Structure readers and writers selected by file extension

pub mod grid;
pub mod io;
pub mod models;
