pub mod api_types;
pub mod cache;
pub mod client;
pub mod types;

pub use api_types::{ConfigUpdate, NewLinode};
pub use client::{BatchCreate, LinodeClient};
pub use types::{ConfigHelpers, Kernel, KernelRef, Linode, LinodeConfig, LinodeDisk};
