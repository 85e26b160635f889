//! SQLite-backed run store.

mod rows;
pub mod schema;
pub mod store;

pub use store::Store;
