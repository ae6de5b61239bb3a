//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod reclaim;
pub mod render;
pub mod run;
pub mod validate;
pub mod worker;
