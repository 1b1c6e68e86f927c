pub mod executor;
pub mod ledger;
pub mod risk;
pub mod types;
