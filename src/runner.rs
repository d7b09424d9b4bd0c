//! The command runner: executes exactly one shell command line within a
//! session, using the sentinel-line protocol to detect completion and
//! recover the exit code.
//!
//! Each command is written to the shell as
//! `cd <cwd>;\n<command>;echo __END_OF_COMMAND_[$?]__\n`. The `cd`
//! establishes the working directory for this command only; the shell
//! process is reused, so directory state must not leak unless re-issued.
//! The sentinel is echoed by the shell itself on its own line, carrying
//! `$?`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::session::{OutputStreams, ShellSession};

static SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__END_OF_COMMAND_\[(\d+)\]__").expect("sentinel pattern"));

/// Extract the exit code if `line` is a sentinel line
fn parse_sentinel(line: &str) -> Option<i32> {
    SENTINEL.captures(line).and_then(|caps| caps[1].parse().ok())
}

/// Trim exactly one trailing newline (and its `\r`, if any). Interior blank
/// lines are preserved.
fn trim_final_newline(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

/// Write-back handle passed to interactive hooks.
///
/// Sending appends `data + "\n"` to the session's input channel, so a hook
/// can answer prompts (e.g. password entry) while the command is still
/// running.
#[derive(Clone)]
pub struct Reply {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Reply {
    pub fn send(&self, data: &str) {
        let _ = self.tx.send(Bytes::from(format!("{data}\n")));
    }
}

/// Per-line interactive hook invoked with each stdout line and a [`Reply`]
pub type InteractiveHook = Box<dyn FnMut(&str, &Reply) + Send>;

/// Borrowed form of [`InteractiveHook`] as passed down to a single run
pub type HookRef<'a> = Option<&'a mut (dyn FnMut(&str, &Reply) + Send + 'static)>;

/// Execution state of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Running,
    Completed,
}

/// The resolved outcome of one command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub cmd: String,
    pub ret_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// What ended the drive loop
enum DriveEnd {
    /// Sentinel observed; the exit code is recorded on the command
    Sentinel,
    /// Output channels closed before any sentinel
    Closed,
}

/// A single shell invocation and its execution state
pub struct Command {
    cmd: String,
    cwd: PathBuf,
    forward_logs: bool,
    deadline: Duration,
    stdout: String,
    stderr: String,
    ret_code: Option<i32>,
    state: CommandState,
}

impl Command {
    pub fn new(cmd: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: cwd.as_ref().to_path_buf(),
            forward_logs: false,
            deadline: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stdout: String::new(),
            stderr: String::new(),
            ret_code: None,
            state: CommandState::Pending,
        }
    }

    /// Mirror raw output to the host process's stdout/stderr while running
    pub fn forward_logs(mut self, forward: bool) -> Self {
        self.forward_logs = forward;
        self
    }

    /// Override the sentinel deadline
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Run this command to completion inside `session`.
    ///
    /// Takes the session's output receivers for the duration of the run and
    /// hands them back on every exit path; commands within a session are
    /// strictly serialized through the `&mut` borrow.
    ///
    /// # Errors
    ///
    /// `CommandFailure` on a non-zero exit code, `Timeout` if no sentinel is
    /// observed before the deadline, `SessionClosed` if the process died
    /// with no recoverable exit status. All three dump a diagnostic and
    /// terminate the session before propagating.
    pub async fn run(
        mut self,
        session: &mut ShellSession,
        mut hook: HookRef<'_>,
    ) -> Result<CommandResult> {
        self.state = CommandState::Running;
        let exec = format!(
            "cd {};\n{};echo __END_OF_COMMAND_[$?]__\n",
            self.cwd.display(),
            self.cmd
        );
        debug!(session = %session.id(), cmd = %self.cmd, cwd = %self.cwd.display(), "running command");

        // Subscribe before writing so the first output chunk cannot be
        // mistaken for pre-command noise and discarded.
        let mut streams = session.subscribe()?;
        let reply = Reply {
            tx: session.input_sender(),
        };

        if let Err(err) = session.write(exec) {
            session.restore(streams);
            return self.fail(session, err).await;
        }

        let deadline = self.deadline;
        let timed =
            tokio::time::timeout(deadline, self.drive(&mut streams, &reply, &mut hook)).await;
        let end = match timed {
            Ok(end) => end,
            Err(_) => {
                session.restore(streams);
                let cmd = self.cmd.clone();
                return self.fail(session, Error::timeout(cmd)).await;
            }
        };

        // Give already-buffered stderr a chance to land before resolving,
        // mirroring the one-scheduler-turn deferral of completion.
        tokio::task::yield_now().await;
        while let Ok(data) = streams.stderr.try_recv() {
            self.push_stderr(&data);
        }
        session.restore(streams);

        let ret_code = match end {
            DriveEnd::Sentinel => self.ret_code.unwrap_or(-1),
            DriveEnd::Closed => match session.wait_exit().await {
                Some(code) => code,
                None => {
                    let cmd = self.cmd.clone();
                    return self.fail(session, Error::SessionClosed { cmd }).await;
                }
            },
        };

        self.state = CommandState::Completed;
        self.ret_code = Some(ret_code);

        if ret_code != 0 {
            let cmd = self.cmd.clone();
            return self.fail(session, Error::command_failure(cmd, ret_code)).await;
        }

        debug!(session = %session.id(), cmd = %self.cmd, "command completed");
        Ok(CommandResult {
            cmd: self.cmd,
            ret_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }

    /// Consume output chunks until the sentinel is seen or the channels
    /// close. Lines are processed in arrival order per channel; only the
    /// first sentinel is honored, and lines after it in the same chunk are
    /// dropped; a new command is not issued until this one resolves, so
    /// they belong to nothing.
    async fn drive(
        &mut self,
        streams: &mut OutputStreams,
        reply: &Reply,
        hook: &mut HookRef<'_>,
    ) -> DriveEnd {
        loop {
            tokio::select! {
                chunk = streams.stdout.recv() => match chunk {
                    Some(data) => {
                        if self.scan_stdout(&data, reply, hook) {
                            return DriveEnd::Sentinel;
                        }
                    }
                    None => return DriveEnd::Closed,
                },
                chunk = streams.stderr.recv() => match chunk {
                    Some(data) => self.push_stderr(&data),
                    None => {
                        // stderr EOF alone does not end the command; keep
                        // draining stdout for the sentinel.
                        loop {
                            match streams.stdout.recv().await {
                                Some(data) => {
                                    if self.scan_stdout(&data, reply, hook) {
                                        return DriveEnd::Sentinel;
                                    }
                                }
                                None => return DriveEnd::Closed,
                            }
                        }
                    }
                },
            }
        }
    }

    /// Re-frame a stdout chunk into lines and scan for the sentinel.
    /// Returns true when the sentinel was found.
    fn scan_stdout(&mut self, data: &[u8], reply: &Reply, hook: &mut HookRef<'_>) -> bool {
        let text = String::from_utf8_lossy(data);
        let trimmed = trim_final_newline(&text);
        for raw in trimmed.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if let Some(code) = parse_sentinel(line) {
                self.ret_code = Some(code);
                return true;
            }
            if self.forward_logs {
                println!("{line}");
            }
            self.stdout.push_str(line);
            self.stdout.push('\n');
            if let Some(h) = hook.as_mut() {
                h(line, reply);
            }
        }
        false
    }

    /// Append a raw stderr chunk, without line splitting
    fn push_stderr(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        if self.forward_logs {
            eprint!("{text}");
        }
        self.stderr.push_str(&text);
    }

    /// Diagnostic dump and session teardown shared by every failure path
    async fn fail<E: Into<Error>>(
        mut self,
        session: &mut ShellSession,
        err: E,
    ) -> Result<CommandResult> {
        self.state = CommandState::Completed;
        eprintln!(
            "\n\nSHELL COMMAND FAILED!\nExecuting: {} in {}\n\nSTDOUT:\n\n{}\n\nSTDERR:\n\n{}\n",
            self.cmd,
            self.cwd.display(),
            self.stdout,
            self.stderr
        );
        session.terminate().await;
        Err(err.into())
    }
}
