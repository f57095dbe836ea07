//! Persistence layer
//!
//! The store trait is the only seam between the core and durable state:
//! - `PostgresStore` (in `adapters`) for production
//! - `MemoryStore` for dry runs and tests

pub mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{PersistenceStore, UnresolvedThread};
