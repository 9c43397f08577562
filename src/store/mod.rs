//! Persistence: the append-only journal and the user registry.

pub mod journal;
pub(crate) mod migrations;
pub mod registry;

pub use journal::{EntryKind, FileJournal, JournalEntry, JournalStore, MemoryJournal};
pub use registry::{LibSqlRegistry, MemoryRegistry, UserRegistration, UserRegistry};
