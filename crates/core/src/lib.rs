pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Request, Response};
pub use paths::Paths;
pub use types::{
    FeatureKey, FeatureSet, LogEntry, LogLevel, PermissionName, PermissionSet,
};
