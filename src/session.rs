//! The persistent shell process behind a script.
//!
//! A session owns one live shell. Its input is an unbounded byte channel
//! drained by a writer task, so `write` never blocks the caller past
//! buffering. Its stdout/stderr are pumped chunk-by-chunk into per-stream
//! channels with no message-boundary guarantee; re-framing into lines is the
//! command runner's job.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::ShellConfig;
use crate::error::Result;

const READ_CHUNK_SIZE: usize = 8192;

/// How long to wait for a dead process's exit status before giving up
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// The two output receivers handed to the active command runner.
///
/// At most one runner may hold these at a time; they are taken from the
/// session with [`ShellSession::subscribe`] and must be handed back with
/// [`ShellSession::restore`] the instant the command completes.
pub(crate) struct OutputStreams {
    pub stdout: mpsc::UnboundedReceiver<Bytes>,
    pub stderr: mpsc::UnboundedReceiver<Bytes>,
}

/// One live shell process shared sequentially across a script's commands
pub struct ShellSession {
    id: Uuid,
    child: Child,
    stdin_tx: mpsc::UnboundedSender<Bytes>,
    stdout_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    stderr_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    alive: bool,
}

impl ShellSession {
    /// Spawn the shell process described by `config`
    pub async fn spawn(config: &ShellConfig) -> Result<Self> {
        let mut cmd = ProcessCommand::new(&config.shell_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let id = Uuid::new_v4();

        let stdin = child.stdin.take().ok_or_else(stream_not_piped)?;
        let stdout = child.stdout.take().ok_or_else(stream_not_piped)?;
        let stderr = child.stderr.take().ok_or_else(stream_not_piped)?;

        let stdin_tx = spawn_writer(stdin);
        let stdout_rx = spawn_reader(stdout);
        let stderr_rx = spawn_reader(stderr);

        debug!(session = %id, shell = %config.shell_path.display(), "shell session spawned");

        Ok(Self {
            id,
            child,
            stdin_tx,
            stdout_rx: Some(stdout_rx),
            stderr_rx: Some(stderr_rx),
            alive: true,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Append `data` to the session's input channel.
    ///
    /// Never blocks past buffering; fails fast once the session is
    /// terminated or the process's stdin has closed.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        if !self.alive {
            return Err(broken_input().into());
        }
        self.stdin_tx
            .send(data.into())
            .map_err(|_| broken_input().into())
    }

    /// A cloneable handle onto the input channel, for interactive write-back
    pub(crate) fn input_sender(&self) -> mpsc::UnboundedSender<Bytes> {
        self.stdin_tx.clone()
    }

    /// Take exclusive ownership of the output receivers.
    ///
    /// Chunks that arrived while no runner was attached belong to no
    /// command and are discarded here.
    pub(crate) fn subscribe(&mut self) -> Result<OutputStreams> {
        let mut stdout = self.stdout_rx.take().ok_or_else(already_subscribed)?;
        let mut stderr = self.stderr_rx.take().ok_or_else(already_subscribed)?;
        while stdout.try_recv().is_ok() {}
        while stderr.try_recv().is_ok() {}
        Ok(OutputStreams { stdout, stderr })
    }

    /// Hand the output receivers back after a command completed
    pub(crate) fn restore(&mut self, streams: OutputStreams) {
        self.stdout_rx = Some(streams.stdout);
        self.stderr_rx = Some(streams.stderr);
    }

    /// Recover the exit status of a process whose output channels closed.
    ///
    /// Marks the session dead. Returns `None` if the process was killed by a
    /// signal or its status cannot be obtained promptly.
    pub(crate) async fn wait_exit(&mut self) -> Option<i32> {
        self.alive = false;
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    }

    /// End the underlying process. Idempotent; `write` fails fast afterwards.
    pub async fn terminate(&mut self) {
        if self.alive {
            debug!(session = %self.id, "terminating shell session");
        }
        self.alive = false;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

fn stream_not_piped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "shell process stream not piped")
}

fn broken_input() -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        "shell session input channel closed",
    )
}

fn already_subscribed() -> crate::error::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        "a command is already consuming this session's output",
    )
    .into()
}

/// Drain an input channel into the process's stdin
fn spawn_writer(
    mut stdin: tokio::process::ChildStdin,
) -> mpsc::UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if stdin.write_all(&buf).await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });
    tx
}

/// Pump one output pipe into a chunk channel until EOF
fn spawn_reader<R>(mut reader: R) -> mpsc::UnboundedReceiver<Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_round_trip() {
        let config = ShellConfig::default();
        let mut session = ShellSession::spawn(&config).await.unwrap();
        let mut streams = session.subscribe().unwrap();

        session.write(Bytes::from_static(b"echo ping\n")).unwrap();
        let chunk = streams.stdout.recv().await.expect("output chunk");
        assert!(String::from_utf8_lossy(&chunk).contains("ping"));

        session.restore(streams);
        session.terminate().await;
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_write_fails_fast() {
        let config = ShellConfig::default();
        let mut session = ShellSession::spawn(&config).await.unwrap();
        session.terminate().await;
        session.terminate().await;
        assert!(!session.is_alive());
        assert!(session.write(Bytes::from_static(b"echo nope\n")).is_err());
    }

    #[tokio::test]
    async fn subscribe_discards_chunks_buffered_while_detached() {
        let config = ShellConfig::default();
        let mut session = ShellSession::spawn(&config).await.unwrap();

        // Output produced with no subscriber attached belongs to no command.
        session.write(Bytes::from_static(b"echo stale\n")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut streams = session.subscribe().unwrap();
        session.write(Bytes::from_static(b"echo fresh\n")).unwrap();
        let chunk = streams.stdout.recv().await.expect("output chunk");
        let text = String::from_utf8_lossy(&chunk).to_string();
        assert!(text.contains("fresh"));
        assert!(!text.contains("stale"));

        session.restore(streams);
        session.terminate().await;
    }

    #[tokio::test]
    async fn exit_status_is_recoverable_after_closure() {
        let config = ShellConfig::default();
        let mut session = ShellSession::spawn(&config).await.unwrap();
        let mut streams = session.subscribe().unwrap();

        session.write(Bytes::from_static(b"exit 7\n")).unwrap();
        while streams.stdout.recv().await.is_some() {}

        session.restore(streams);
        assert_eq!(session.wait_exit().await, Some(7));
        assert!(!session.is_alive());
    }
}
