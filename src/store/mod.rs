//! Persistence layer: definition stores and the execution log.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlLogStore;
pub use memory::{MemoryDefinitionStore, MemoryLogStore, MemoryRuleStore};
pub use traits::{DefinitionStore, ExecutionLogStore, RuleStore};
