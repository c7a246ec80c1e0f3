pub mod kv;
pub mod state;

pub use kv::{JsonFileKvStore, KvStore, MemoryKvStore, FEATURES_KEY, LOGS_KEY, PERMISSIONS_KEY};
pub use state::{ExtensionState, StateOptions};
