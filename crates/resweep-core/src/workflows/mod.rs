//! High-level entry points composing the engine.
//!
//! - [`refine`] - Drive a structure to full coverage over a density map

pub mod refine;
