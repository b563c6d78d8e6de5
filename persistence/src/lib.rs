//! Durable storage for the coordination kernel: a SQLite-backed
//! implementation of `marcus_core::collaborators::Persistence`.

mod common;
mod sqlite;

pub use sqlite::SqlitePersistence;
