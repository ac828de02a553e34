//! Common utilities shared between the compiler, engine, and server

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
