//! [`KeyValueStore`](crate::traits::KeyValueStore) implementations.

pub mod file;
pub mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;
