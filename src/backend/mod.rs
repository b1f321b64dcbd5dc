//! Display backends.

pub mod amlogic;
