//! Persistence layer — async `Database` trait and the libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, DailyTaskList, EntryStatus, ListPlan, ListWrite, RotationRecord, TaskEntry};
