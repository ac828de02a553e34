//! Script compilation
//!
//! Turns a flat, prefix-tagged test script plus a set of environment
//! definitions into an ordered, fully-typed command list. The compiler
//! fails fast: it either produces the whole list or no list at all.

pub mod compile;
pub mod env;
pub mod expand;

pub use compile::{compile, CommandOverride, MAX_EXPANSION_LOOPS};
pub use env::{split_prefix, EnvSet, EnvSpec, KERNEL, SHELL};
