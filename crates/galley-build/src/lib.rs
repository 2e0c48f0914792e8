//! Build driver for galley tutorials.
//!
//! Runs every chapter under a docs directory through the execution engine
//! and writes the finished markdown once all of them succeeded.

pub mod builder;

pub use builder::{BuildConfig, BuildError, BuildResult, Builder};
