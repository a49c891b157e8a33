//! Credential record management: stores, lifecycle, and attempt history

pub mod manager;
pub mod memory;
pub mod store;

pub use manager::{DueCredentials, RecordManager};
pub use memory::MemoryRecordStore;
pub use store::{DueCursor, RecordStore};
