//! n8n-doctor library crate
//!
//! Exposes the diagnostic, patching and reporting stages so integration
//! tests and benchmarks can drive them without going through CLI startup.

pub mod config;
pub mod doctor;
pub mod env;
pub mod logging;
pub mod n8n;
pub mod patch;
pub mod probe;
pub mod recommend;
pub mod report;
pub mod script;
pub mod util;
pub mod validate;
pub mod verify;
