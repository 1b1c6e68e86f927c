pub mod provider;
pub mod storage;
pub mod types;
