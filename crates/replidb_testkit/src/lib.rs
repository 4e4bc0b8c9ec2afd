//! # RepliDB Testkit
//!
//! Test utilities shared across the workspace:
//! - deterministic fixtures (seeded users, the `nums` dataset)
//! - proptest generators for documents, change batches, and timestamps

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;
