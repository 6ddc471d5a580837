//! Cached, page-aware client for managing Linodes.

pub mod cache;
pub mod config;
pub mod error;
pub mod error_set;
pub mod linode;
pub mod logging;
pub mod transport;

pub use error::ApiError;
pub use error_set::ErrorSet;
