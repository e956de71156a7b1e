mod in_memory;
mod kv;
mod task_store;

pub use in_memory::InMemoryTaskStore;
pub use kv::{KeyValueBackend, KvTaskStore, MemoryKvBackend};
pub use task_store::TaskStore;
