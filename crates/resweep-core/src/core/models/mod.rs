//! # Core Models Module
//!
//! Data structures describing the structure being refined.
//!
//! - [`amino_acid`] - The twenty standard amino-acid types and their three-letter codes
//! - [`residue`] - One addressable unit of work: a residue with its current estimate
//! - [`structure`] - The ordered, index-addressed collection of residues
//!
//! Residues are addressed by their position in [`structure::Structure`]; that index is
//! the stable entity id used by every engine component.

pub mod amino_acid;
pub mod residue;
pub mod structure;
