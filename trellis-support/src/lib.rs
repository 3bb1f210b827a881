//! # Trellis Support
//!
//! Shared utilities for the Trellis dependency graph engine.
//!
//! This crate provides:
//! - Text rendering for diagnostics (cycles, key lists, short type names)
//! - Edit-distance based "did you mean?" suggestions

pub mod rendering;
