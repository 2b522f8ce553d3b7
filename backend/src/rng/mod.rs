//! Deterministic random number generation
//!
//! Uses the xorshift64* algorithm. Every random draw in the engine (DataSource
//! sampling in particular) goes through [`SeededRng`] so that the same scenario
//! and seed always replay to the same activity log.

mod xorshift;

pub use xorshift::SeededRng;
