//! Database module for the status board.
//!
//! Outage persistence behind the [`OutageStore`] repository trait, with a
//! SQLite implementation and an in-memory one that records its writes.

mod memory;
mod models;
mod sqlite;
mod store;

pub use memory::*;
pub use models::*;
pub use sqlite::*;
pub use store::*;
