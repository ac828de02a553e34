//! Run observation events
//!
//! The engine publishes onto a broadcast channel instead of calling
//! observers directly; a live progress feed or persistence hook subscribes
//! through `Run::subscribe` and can lag or disappear without ever blocking
//! the byte-stream consumer.

use uuid::Uuid;

use super::command::{CommandStatus, OutputLine};
use super::run::RunResult;

/// Capacity of each run's broadcast channel; laggards drop old events
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A completed output line was appended to a command
    OutputAppended {
        run: Uuid,
        command: Uuid,
        line: OutputLine,
    },
    /// A command reached a terminal status
    CommandCompleted {
        run: Uuid,
        command: Uuid,
        status: CommandStatus,
    },
    /// The run reached a terminal result
    RunCompleted { run: Uuid, result: RunResult },
}
