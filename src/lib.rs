#[macro_use]
extern crate tracing;

pub mod backend;
pub mod cli;
pub mod sysfs;
