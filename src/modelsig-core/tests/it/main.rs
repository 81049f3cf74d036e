//! Consolidated integration tests for modelsig-core.
//!
//! One test binary keeps proptest suites from running as separate
//! processes in parallel.
//! See: https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod cache;
mod policy;
mod retry;
