//! # linkdb Testkit
//!
//! Test utilities for linkdb.
//!
//! This crate provides:
//! - Test fixtures and engine helpers
//! - Property-based test generators using proptest
//! - A reference model of link collections for differential tests
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use linkdb_testkit::prelude::*;
//!
//! with_temp_engine(|engine| {
//!     let people = engine.create_segment("Person", false).unwrap();
//!     let owner = engine.transaction(|tx| tx.create_record(people)).unwrap();
//!     assert!(engine.record_meta(owner).is_some());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use model::*;
pub use stress::*;
