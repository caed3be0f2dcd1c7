//! Shared building blocks for the faucet workspace: the chain address type
//! and the logging/config helpers used by the service binary.

pub mod types;
pub mod utils;

pub use types::{Address, AddressError};
