pub mod local;
pub mod memory;
pub mod notify;
pub mod traits;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use notify::{NotificationTopic, ObjectCreated, FILE_CREATED_TOPIC};
pub use traits::{validate_key, ObjectStore, StorageError};
