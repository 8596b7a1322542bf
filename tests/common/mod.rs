//! Common test utilities for bulk-dl scenario tests

#[allow(dead_code)]
pub mod executors;
#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use executors::*;
#[allow(unused_imports)]
pub use fixtures::*;
