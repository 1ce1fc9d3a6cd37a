//! Index Worker: the per-task pipeline plus the
//! package-manifest repo-metadata supplement.

pub mod manifest;
pub mod worker;

pub use worker::{ExistingFileStat, IndexWorker, WorkResult};
