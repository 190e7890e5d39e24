// Implementations for the automod system.

pub mod in_memory;
pub mod seed_file;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryAutomodStore;
pub use sqlite_store::SqliteAutomodStore;
