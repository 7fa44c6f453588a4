//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_run_history;
mod postgres_run_history;

pub use in_memory_run_history::InMemoryRunHistory;
pub use postgres_run_history::PostgresRunHistory;
