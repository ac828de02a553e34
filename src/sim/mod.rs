//! Simulator sessions
//!
//! The engine only ever sees the `Console` trait: a byte stream to and
//! from one live simulator plus its simulated-time clock. `ProcessConsole`
//! backs it with a real sys161 process; `ScriptedConsole` is the in-memory
//! double used by tests.

pub mod conf;
pub mod session;

pub use conf::render_conf;
pub use session::{Console, ProcessConsole, ScriptedConsole};
