//! Chronicle Event Store — in-memory storage backends.
//!
//! Process-local implementations of the `EventStore`, `SnapshotStore`,
//! `HandlerRecordStore` and `PublishedVersionStore` boundaries defined in
//! `chronicle-core`, built on a striped lock table.

pub mod memory_event_store;
pub mod memory_handler_record_store;
pub mod memory_published_version_store;
pub mod memory_snapshot_store;
pub mod striped;

pub use memory_event_store::InMemoryEventStore;
pub use memory_handler_record_store::InMemoryHandlerRecordStore;
pub use memory_published_version_store::InMemoryPublishedVersionStore;
pub use memory_snapshot_store::InMemorySnapshotStore;
