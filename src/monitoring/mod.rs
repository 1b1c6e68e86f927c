pub mod logger;
pub mod snapshot;
