//! Shared domain types for the Verdacam project.

pub mod config;
pub mod naming;
pub mod status;

mod errors;

pub use errors::{Result, VerdacamError};
