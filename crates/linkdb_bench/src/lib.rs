//! Benchmark support for linkdb.

#![warn(missing_docs)]

pub mod utils;
