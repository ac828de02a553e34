//! Console transports
//!
//! `ProcessConsole` spawns a sys161 process in a prepared session
//! directory and exposes its stdio as the console byte stream.
//! `ScriptedConsole` replays a canned conversation for tests.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::common::config::SimConf;
use crate::common::{Error, Result};

use super::conf::render_conf;

/// Byte-stream transport to one live simulator session
#[async_trait]
pub trait Console: Send {
    /// Receive the next chunk of console output; `Ok(None)` on EOF
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Send bytes to the simulator's console input
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Simulated seconds as reported by the session
    fn sim_time(&self) -> f64;

    /// Tear the session down
    async fn close(&mut self) -> Result<()>;
}

/// Console backed by a live sys161 process
pub struct ProcessConsole {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    started: Instant,
    buf: Vec<u8>,
}

impl ProcessConsole {
    /// Write the session's sys161.conf and launch the simulator
    ///
    /// `workdir` must already contain the kernel image and any disk files
    /// the configuration references.
    pub async fn launch(sim: &SimConf, seed: u32, kernel: &str, workdir: &Path) -> Result<Self> {
        let conf_path = workdir.join("sys161.conf");
        tokio::fs::write(&conf_path, render_conf(sim, seed))
            .await
            .map_err(|e| Error::file_read(&conf_path, e))?;

        let mut cmd = Command::new(&sim.path);
        cmd.arg("-X")
            .arg(kernel)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        tracing::info!(
            path = %sim.path.display(),
            kernel,
            workdir = %workdir.display(),
            "launching simulator"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Config(format!("failed to start {}: {}", sim.path.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("failed to get simulator stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("failed to get simulator stdout".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            started: Instant::now(),
            buf: vec![0u8; 4096],
        })
    }
}

#[async_trait]
impl Console for ProcessConsole {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let n = self.stdout.read(&mut self.buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(self.buf[..n].to_vec()))
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Wall-clock time since launch stands in for the simulated clock when
    /// no stat feed is attached; sys161 runs close to real time here
    fn sim_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.child.kill().await;
        Ok(())
    }
}

impl Drop for ProcessConsole {
    fn drop(&mut self) {
        // Best effort; close() is the real teardown path
        let _ = self.child.start_kill();
    }
}

/// One scripted exchange: output released when the expected input arrives
struct Step {
    /// Input line that releases this step; None releases it immediately
    expect: Option<String>,
    output: Vec<u8>,
    /// After this step the console hangs instead of reaching EOF
    hold: bool,
}

/// In-memory console replaying a canned conversation
///
/// Built by chaining `emit` (unprompted output) and `on` (output released
/// by an input line). EOF is reached once every step has been consumed and
/// delivered, unless a `hold` step leaves the console hanging.
pub struct ScriptedConsole {
    steps: VecDeque<Step>,
    pending: VecDeque<Vec<u8>>,
    input: String,
    started: Instant,
    /// Simulated seconds advanced per wall-clock second
    sim_rate: f64,
    hanging: bool,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            pending: VecDeque::new(),
            input: String::new(),
            started: Instant::now(),
            sim_rate: 1.0,
            hanging: false,
        }
    }

    /// Output delivered without waiting for any input
    pub fn emit(mut self, output: &str) -> Self {
        self.pending.push_back(output.as_bytes().to_vec());
        self
    }

    /// Output released when `expect` arrives as a full input line
    pub fn on(mut self, expect: &str, output: &str) -> Self {
        self.steps.push_back(Step {
            expect: Some(expect.to_string()),
            output: output.as_bytes().to_vec(),
            hold: false,
        });
        self
    }

    /// Like `on`, but the console hangs afterwards instead of reaching EOF
    pub fn on_then_hang(mut self, expect: &str, output: &str) -> Self {
        self.steps.push_back(Step {
            expect: Some(expect.to_string()),
            output: output.as_bytes().to_vec(),
            hold: true,
        });
        self
    }

    /// Speed up the simulated clock relative to wall time
    pub fn sim_rate(mut self, rate: f64) -> Self {
        self.sim_rate = rate;
        self
    }

    fn feed_line(&mut self, line: &str) {
        match self.steps.front() {
            Some(step) if step.expect.as_deref() == Some(line) => {
                let step = self.steps.pop_front().unwrap_or_else(|| unreachable!());
                self.pending.push_back(step.output);
                if step.hold {
                    self.hanging = true;
                }
            }
            _ => {
                // Unexpected input; the conversation stalls, which shows up
                // as a timeout in the test
                tracing::debug!(line, "scripted console ignoring input");
            }
        }
    }
}

impl Default for ScriptedConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.steps.is_empty() && !self.hanging {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            if b == b'\n' {
                let line = std::mem::take(&mut self.input);
                self.feed_line(line.trim_end_matches('\r'));
            } else {
                self.input.push(char::from(b));
            }
        }
        Ok(())
    }

    fn sim_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * self.sim_rate
    }

    async fn close(&mut self) -> Result<()> {
        self.steps.clear();
        self.pending.clear();
        self.hanging = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_console_releases_output_on_input() {
        let mut console = ScriptedConsole::new()
            .emit("prompt> ")
            .on("hello", "hello\nworld\n");

        let first = console.recv().await.unwrap().unwrap();
        assert_eq!(first, b"prompt> ");

        console.send(b"hello\n").await.unwrap();
        let second = console.recv().await.unwrap().unwrap();
        assert_eq!(second, b"hello\nworld\n");

        // Steps drained: EOF
        assert!(console.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_console_hangs_when_asked() {
        let mut console = ScriptedConsole::new().on_then_hang("q", "q\n");
        console.send(b"q\n").await.unwrap();
        assert!(console.recv().await.unwrap().is_some());

        let hang = tokio::time::timeout(Duration::from_millis(50), console.recv()).await;
        assert!(hang.is_err());
    }
}
