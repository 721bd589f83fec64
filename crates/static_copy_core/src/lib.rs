pub mod config;
pub mod error;
pub mod fetch;
pub mod homepage;
pub mod ledger;
pub mod normalize;
pub mod progress;
pub mod reconcile;
pub mod references;
pub mod request;
pub mod runtime;
