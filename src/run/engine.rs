//! The interaction engine
//!
//! Executes one run's command list against one live console session. Each
//! command's input is gated by the previous command's prompt match; output
//! bytes are reassembled into timestamped lines under the run's lock and
//! published to subscribers as they complete.
//!
//! Two clocks watch every command: a wall-clock deadline, and a
//! simulated-time progress mark reset by every received byte. The second
//! clock distinguishes a genuinely hung simulator from a slow-but-live
//! one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::sim::Console;

use super::command::{CommandStatus, OutputLine, Policy};
use super::events::RunEvent;
use super::run::{Run, RunResult};

/// How often the engine wakes to check its timeout clocks while no bytes
/// are arriving
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Drives one run against one console session
pub struct InteractionEngine {
    shutdown: Option<watch::Receiver<bool>>,
}

impl InteractionEngine {
    pub fn new() -> Self {
        Self { shutdown: None }
    }

    /// Engine that stops issuing input once the shutdown signal flips
    pub fn with_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Execute the run to a terminal result
    ///
    /// The console is always torn down on the way out; partial output
    /// produced before any failure stays on the run.
    pub async fn run(&self, run: &Run, console: &mut dyn Console) -> RunResult {
        if let Err(e) = run.begin() {
            tracing::error!(run = %run.id, error = %e, "refusing to re-execute run");
            return RunResult::Error;
        }

        let mut exec = Execution {
            run,
            console: &mut *console,
            events: run.events(),
            started: Instant::now(),
            pending: String::new(),
            pending_wall: 0.0,
            pending_sim: 0.0,
        };

        let result = match exec.drive(self.shutdown.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(run = %run.id, error = %e, "run failed");
                RunResult::Error
            }
        };

        let _ = console.close().await;
        run.finish(result);
        tracing::info!(run = %run.id, ?result, "run finished");
        result
    }
}

impl Default for InteractionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of one command, snapshotted before execution
struct CommandView {
    id: Uuid,
    input: String,
    prompt: Option<Arc<Regex>>,
    times_out: Policy,
    panics: Policy,
    timeout: f32,
}

/// What ended the wait for one command
enum Outcome {
    /// The next environment's prompt appeared
    Matched,
    /// A timeout clock expired
    TimedOut,
    /// The simulator printed a panic line
    Panicked,
    /// Clean EOF; only legal for the final command
    Eof,
}

struct Execution<'a> {
    run: &'a Run,
    console: &'a mut dyn Console,
    events: broadcast::Sender<RunEvent>,
    started: Instant,
    /// Line currently being assembled, prompt text included
    pending: String,
    pending_wall: f64,
    pending_sim: f64,
}

impl Execution<'_> {
    async fn drive(&mut self, shutdown: Option<watch::Receiver<bool>>) -> Result<RunResult> {
        let total = self.run.lock_commands().len();

        for index in 0..total {
            if let Some(rx) = &shutdown {
                if *rx.borrow() {
                    tracing::info!(run = %self.run.id, "shutdown signalled, abandoning run");
                    return Ok(RunResult::Error);
                }
            }

            let view = self.view(index);
            self.set_status(index, CommandStatus::Sent);

            match self.execute(index, &view).await? {
                Outcome::Matched => {
                    if view.panics == Policy::Yes {
                        self.complete(index, CommandStatus::Mismatched);
                        tracing::warn!(command = %view.input, "expected panic did not occur");
                        return Ok(RunResult::Error);
                    }
                    self.complete(index, CommandStatus::Matched);
                }
                Outcome::Eof => {
                    self.complete(index, CommandStatus::Matched);
                    return Ok(RunResult::Shutdown);
                }
                Outcome::TimedOut => {
                    self.complete(index, CommandStatus::TimedOut);
                    if view.times_out.tolerates() {
                        continue;
                    }
                    return Ok(RunResult::Timeout);
                }
                Outcome::Panicked => {
                    self.complete(index, CommandStatus::Panicked);
                    return Ok(if view.panics.tolerates() {
                        RunResult::Shutdown
                    } else {
                        RunResult::Crash
                    });
                }
            }
        }

        Ok(RunResult::Shutdown)
    }

    /// Send one command and wait for whatever ends it
    async fn execute(&mut self, index: usize, view: &CommandView) -> Result<Outcome> {
        let misc = self.run.conf.misc.clone();
        let monitor = self.run.conf.monitor.clone();

        let timeout = if view.timeout > 0.0 {
            view.timeout
        } else {
            monitor.command_timeout
        };
        // Clamp so a garbage configured value (negative, NaN) cannot panic
        // the duration conversion; zero times out immediately
        let timeout = timeout.min(misc.prompt_timeout).max(0.0);
        let deadline = Instant::now() + Duration::from_secs_f32(timeout);

        // The implicit boot command sends nothing; the simulator is already
        // booting toward its first prompt
        let mut awaiting_echo = false;
        let mut echo_mark = 0usize;
        let mut attempts = 0u32;
        let mut sent_at = Instant::now();

        if index > 0 {
            self.send_input(&view.input).await?;
            awaiting_echo = true;
            echo_mark = self.pending.chars().count();
        }

        let mut progress_mark = self.console.sim_time();

        loop {
            if Instant::now() >= deadline {
                tracing::debug!(command = %view.input, timeout, "command timeout");
                return Ok(Outcome::TimedOut);
            }

            let chunk = match tokio::time::timeout(POLL_INTERVAL, self.console.recv()).await {
                Ok(received) => received?,
                Err(_) => {
                    // No bytes this tick; check the progress clock
                    let stalled =
                        self.console.sim_time() - progress_mark > monitor.progress_timeout as f64;
                    if stalled {
                        tracing::debug!(command = %view.input, "progress timeout");
                        return Ok(Outcome::TimedOut);
                    }
                    // Echo characters overdue: the console dropped the input
                    if awaiting_echo
                        && sent_at.elapsed() >= Duration::from_millis(misc.character_timeout)
                    {
                        if attempts >= misc.command_retries {
                            return Err(Error::InputLost {
                                command: view.input.clone(),
                                retries: attempts,
                            });
                        }
                        attempts += 1;
                        tracing::debug!(command = %view.input, attempts, "echo overdue, resending");
                        self.send_input(&view.input).await?;
                        echo_mark = self.pending.chars().count();
                        sent_at = Instant::now();
                    }
                    continue;
                }
            };

            let Some(bytes) = chunk else {
                return if view.prompt.is_none() {
                    Ok(Outcome::Eof)
                } else {
                    Err(Error::SessionClosed)
                };
            };

            progress_mark = self.console.sim_time();
            self.run.set_sim_time(progress_mark);

            for &b in &bytes {
                let Some(line) = self.push_byte(index, b) else {
                    continue;
                };

                if awaiting_echo {
                    let echoed: String = line.chars().skip(echo_mark).collect();
                    if echoed.trim() == view.input {
                        awaiting_echo = false;
                    } else if attempts < misc.command_retries
                        && echo_retryable(&view.input, &echoed, &misc.retry_characters)
                    {
                        attempts += 1;
                        tracing::debug!(command = %view.input, attempts, "echo mismatch, resending");
                        self.send_input(&view.input).await?;
                        echo_mark = 0;
                        sent_at = Instant::now();
                    } else {
                        return Err(Error::InputLost {
                            command: view.input.clone(),
                            retries: attempts,
                        });
                    }
                }

                if is_panic_line(&line) {
                    return Ok(Outcome::Panicked);
                }
            }

            if !awaiting_echo {
                if let Some(prompt) = &view.prompt {
                    if prompt.is_match(&self.pending) {
                        return Ok(Outcome::Matched);
                    }
                }
            }
        }
    }

    async fn send_input(&mut self, input: &str) -> Result<()> {
        self.console.send(format!("{}\n", input).as_bytes()).await
    }

    /// Feed one byte into the pending line; returns the line it completed
    ///
    /// The first byte of a line stamps it with both clocks. Completed lines
    /// are appended to the active command under the run lock and published.
    fn push_byte(&mut self, index: usize, b: u8) -> Option<String> {
        if self.pending.is_empty() {
            self.pending_wall = self.started.elapsed().as_secs_f64();
            self.pending_sim = self.console.sim_time();
        }

        if b != b'\n' {
            self.pending.push(char::from(b));
            return None;
        }

        let text = std::mem::take(&mut self.pending);
        let text = text.trim_end_matches('\r').to_string();
        let line = OutputLine {
            walltime: self.pending_wall,
            simtime: self.pending_sim,
            line: text.clone(),
        };

        let command_id = {
            let mut commands = self.run.lock_commands();
            let command = &mut commands[index];
            command.output.push(line.clone());
            command.id
        };
        let _ = self.events.send(RunEvent::OutputAppended {
            run: self.run.id,
            command: command_id,
            line,
        });

        Some(text)
    }

    fn view(&self, index: usize) -> CommandView {
        let commands = self.run.lock_commands();
        let c = &commands[index];
        CommandView {
            id: c.id,
            input: c.input.clone(),
            prompt: c.prompt.clone(),
            times_out: c.times_out,
            panics: c.panics,
            timeout: c.timeout,
        }
    }

    fn set_status(&self, index: usize, status: CommandStatus) {
        self.run.lock_commands()[index].status = status;
    }

    fn complete(&self, index: usize, status: CommandStatus) {
        self.set_status(index, status);
        let id = self.view(index).id;
        let _ = self.events.send(RunEvent::CommandCompleted {
            run: self.run.id,
            command: id,
            status,
        });
    }
}

fn is_panic_line(line: &str) -> bool {
    line.trim_start().starts_with("panic: ")
}

/// Whether a corrupted echo is worth a resend
///
/// True when the echo is the sent line with some characters dropped and
/// every dropped character is in the allow-listed retry set.
fn echo_retryable(sent: &str, echoed: &str, retry_characters: &str) -> bool {
    let mut got = echoed.trim().chars().peekable();
    for c in sent.chars() {
        if got.peek() == Some(&c) {
            got.next();
        } else if !retry_characters.contains(c) {
            return false;
        }
    }
    got.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::RunConf;
    use crate::script::env::{KERNEL_PROMPT, SHELL_PROMPT};
    use crate::script::CommandOverride;
    use crate::sim::ScriptedConsole;

    const HALT: &str = "q\nShutting down.\nThe system is halted.\n";

    fn booted() -> ScriptedConsole {
        ScriptedConsole::new().emit(&format!(
            "sys161: System/161 release 2.0.8, compiled 2015\n{}",
            KERNEL_PROMPT
        ))
    }

    fn statuses(run: &Run) -> Vec<CommandStatus> {
        run.commands()
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.status)
            .collect()
    }

    fn fast_conf() -> RunConf {
        let mut conf = RunConf::default();
        conf.monitor.command_timeout = 0.25;
        conf
    }

    #[tokio::test]
    async fn boot_and_quit_shuts_down_cleanly() {
        let mut console = booted().on("q", HALT);
        let run = Run::new("q", RunConf::default()).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Shutdown);
        assert_eq!(run.result(), RunResult::Shutdown);
        assert_eq!(
            statuses(&run),
            vec![CommandStatus::Matched, CommandStatus::Matched]
        );
    }

    #[tokio::test]
    async fn shell_round_trip() {
        let mut console = booted()
            .on("s", &format!("s\n{}", SHELL_PROMPT))
            .on("/bin/true", &format!("/bin/true\n{}", SHELL_PROMPT))
            .on("exit", &format!("exit\n{}", KERNEL_PROMPT))
            .on("q", HALT);
        let run = Run::new("s\n$ /bin/true\n$ exit\nq", RunConf::default()).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Shutdown);
        assert!(statuses(&run)
            .iter()
            .all(|&s| s == CommandStatus::Matched));
    }

    #[tokio::test]
    async fn untolerated_timeout_terminates_the_run() {
        // Echo arrives but the next prompt never does
        let mut console = booted().on_then_hang("tt1", "tt1\n");
        let run = Run::new("tt1\nq", fast_conf()).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Timeout);
        assert_eq!(
            statuses(&run),
            vec![
                CommandStatus::Matched,
                CommandStatus::TimedOut,
                CommandStatus::None,
            ]
        );
    }

    #[tokio::test]
    async fn tolerated_timeout_continues_to_next_command() {
        let mut console = booted().on("tt1", "tt1\n").on("q", HALT);
        let mut conf = fast_conf();
        conf.overrides = vec![CommandOverride {
            name: "tt1".to_string(),
            times_out: Some(Policy::Maybe),
            ..Default::default()
        }];
        let run = Run::new("tt1\nq", conf).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Shutdown);
        assert_eq!(
            statuses(&run),
            vec![
                CommandStatus::Matched,
                CommandStatus::TimedOut,
                CommandStatus::Matched,
            ]
        );
    }

    #[tokio::test]
    async fn unexpected_panic_crashes_the_run() {
        let mut console = booted().on(
            "panictest",
            "panictest\npanic: I can't handle this... I think I'll just die now *mumble*\n",
        );
        let run = Run::new("panictest\nq", RunConf::default()).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Crash);
        assert_eq!(
            statuses(&run),
            vec![
                CommandStatus::Matched,
                CommandStatus::Panicked,
                CommandStatus::None,
            ]
        );
    }

    #[tokio::test]
    async fn expected_panic_is_a_clean_ending() {
        let mut console = booted().on("panictest", "panictest\npanic: expected\n");
        let mut conf = RunConf::default();
        conf.overrides = vec![CommandOverride {
            name: "panictest".to_string(),
            panics: Some(Policy::Yes),
            ..Default::default()
        }];
        let run = Run::new("panictest\nq", conf).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Shutdown);
        assert_eq!(statuses(&run)[1], CommandStatus::Panicked);
    }

    #[tokio::test]
    async fn missing_expected_panic_is_a_mismatch() {
        let mut console = booted().on("tt1", &format!("tt1\n{}", KERNEL_PROMPT));
        let mut conf = RunConf::default();
        conf.overrides = vec![CommandOverride {
            name: "tt1".to_string(),
            panics: Some(Policy::Yes),
            ..Default::default()
        }];
        let run = Run::new("tt1\nq", conf).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Error);
        assert_eq!(statuses(&run)[1], CommandStatus::Mismatched);
    }

    #[tokio::test]
    async fn dropped_space_in_echo_is_retried() {
        // First echo loses the space; second send echoes correctly
        let mut console = booted()
            .on("tt1 5", "tt15\n")
            .on("tt1 5", &format!("tt1 5\n{}", KERNEL_PROMPT))
            .on("q", HALT);
        let mut conf = RunConf::default();
        conf.misc.retry_characters = " ".to_string();
        let run = Run::new("tt1 5\nq", conf).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Shutdown);
        // The corrupted echo line is retained as output
        let commands = run.commands();
        let commands = commands.lock().unwrap();
        let lines: Vec<String> = commands[1].output.iter().map(|l| l.line.clone()).collect();
        assert!(lines.iter().any(|l| l.ends_with("tt15")));
    }

    #[tokio::test]
    async fn unretryable_echo_loss_is_fatal() {
        // The dropped character is not in the retry set
        let mut console = booted().on("tt1", "t1\n");
        let mut conf = fast_conf();
        conf.misc.retry_characters = " ".to_string();
        let run = Run::new("tt1\nq", conf).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Error);
    }

    #[tokio::test]
    async fn partial_output_is_retained_on_failure() {
        let mut console = booted().on_then_hang("tt1", "tt1\nsome progress output\n");
        let run = Run::new("tt1\nq", fast_conf()).unwrap();

        let result = InteractionEngine::new().run(&run, &mut console).await;

        assert_eq!(result, RunResult::Timeout);
        let commands = run.commands();
        let commands = commands.lock().unwrap();
        assert!(commands[1]
            .output
            .iter()
            .any(|l| l.line == "some progress output"));
    }

    #[tokio::test]
    async fn boot_is_sent_while_its_prompt_is_awaited() {
        // A console that never produces the first prompt
        let mut console = ScriptedConsole::new().on("never", "never\n");
        let mut conf = RunConf::default();
        conf.monitor.command_timeout = 0.6;
        let run = Arc::new(Run::new("q", conf).unwrap());

        let handle = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { InteractionEngine::new().run(&run, &mut console).await })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        {
            let commands = run.commands();
            let commands = commands.lock().unwrap();
            assert_eq!(commands[0].status, CommandStatus::Sent);
        }

        assert_eq!(handle.await.unwrap(), RunResult::Timeout);
    }

    #[tokio::test]
    async fn negative_configured_timeout_is_clamped() {
        let mut conf = RunConf::default();
        conf.monitor.command_timeout = -1.0;
        let mut console = ScriptedConsole::new().on("never", "never\n");
        let run = Run::new("q", conf).unwrap();

        // Clamped to an immediate timeout rather than a panic
        let result = InteractionEngine::new().run(&run, &mut console).await;
        assert_eq!(result, RunResult::Timeout);
        assert_eq!(statuses(&run)[0], CommandStatus::TimedOut);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_before_any_input() {
        let (tx, rx) = watch::channel(true);
        let mut console = booted().on("q", HALT);
        let run = Run::new("q", RunConf::default()).unwrap();

        let result = InteractionEngine::with_shutdown(rx).run(&run, &mut console).await;
        drop(tx);

        assert_eq!(result, RunResult::Error);
        assert!(statuses(&run).iter().all(|&s| s == CommandStatus::None));
    }

    #[tokio::test]
    async fn output_events_are_published() {
        let mut console = booted().on("q", HALT);
        let run = Run::new("q", RunConf::default()).unwrap();
        let mut events = run.subscribe();

        let result = InteractionEngine::new().run(&run, &mut console).await;
        assert_eq!(result, RunResult::Shutdown);

        let mut appended = 0;
        let mut completed = 0;
        let mut run_completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                RunEvent::OutputAppended { .. } => appended += 1,
                RunEvent::CommandCompleted { .. } => completed += 1,
                RunEvent::RunCompleted { result, .. } => {
                    run_completed += 1;
                    assert_eq!(result, RunResult::Shutdown);
                }
            }
        }
        assert!(appended >= 3);
        assert_eq!(completed, 2);
        assert_eq!(run_completed, 1);
    }

    #[test]
    fn echo_retry_rules() {
        assert!(echo_retryable("tt1 5", "tt15", " "));
        assert!(echo_retryable("a b c", "abc", " "));
        assert!(!echo_retryable("tt1", "t1", " "));
        // Garbage beyond the sent line is never retryable
        assert!(!echo_retryable("tt1", "tt1x", " "));
        assert!(!echo_retryable("q", "", " "));
    }

    #[test]
    fn panic_lines_are_recognized() {
        assert!(is_panic_line("panic: out of memory"));
        assert!(is_panic_line("  panic: deep trouble"));
        assert!(!is_panic_line("no panic here"));
    }
}
