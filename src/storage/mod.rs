//! Storage: schema, the single-writer thread and the external engine
//! adapter.

pub mod db;
pub mod engine;
pub mod schema;
pub mod writer;

pub use db::{open_reader, open_writer, WriteLock};
pub use engine::{EngineAdapter, NullEngine};
pub use writer::{merge_staging, DbWriter, WriteOp, WriteSubmitter, WriteTask, WriterCounters};
