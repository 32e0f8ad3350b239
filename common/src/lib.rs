//! Wire codec, config parsing and logging setup shared by the `node` binary.

pub mod config;
pub mod logging;
pub mod wire;
