//! Subprocess supervision.
//!
//! [`spawn_process`] starts a child with piped stdout and stderr and forwards
//! whatever it writes as [`ProcessEvent::Chunk`]s, followed by exactly one
//! [`ProcessEvent::Exited`]. Every chunk names the pipe it came from; the
//! session splits each pipe into lines separately, so a half-written stdout
//! line is never joined to a stderr line.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::surface::SurfaceId;

/// Read buffer size per pipe.
const READ_CHUNK: usize = 8192;

/// Pipe a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Output of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Chunk {
        surface: SurfaceId,
        stream: OutputStream,
        bytes: Vec<u8>,
    },
    /// `code` is `None` when the process was killed by a signal.
    Exited {
        surface: SurfaceId,
        code: Option<i32>,
    },
}

/// A running child process.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// OS process id, if still known at spawn time.
    pub pid: Option<u32>,
    /// Forwarding task; finishes after the exit event is sent.
    pub task: JoinHandle<()>,
}

impl SpawnedProcess {
    /// Handle recorded on the session binding.
    #[must_use]
    pub fn handle(&self) -> u64 {
        u64::from(self.pid.unwrap_or(0))
    }
}

/// Spawn `command` and forward its output to `tx`.
///
/// The child is killed if the forwarding task is dropped, or if the receiver
/// goes away before the child exits.
pub fn spawn_process<T>(
    command: &[String],
    surface: SurfaceId,
    tx: mpsc::Sender<T>,
) -> Result<SpawnedProcess, SourceError>
where
    T: From<ProcessEvent> + Send + 'static,
{
    let (program, args) = command.split_first().ok_or(SourceError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SourceError::Spawn {
            command: command.join(" "),
            source,
        })?;

    let pid = child.id();
    debug!(%surface, ?pid, program = %program, "Spawned process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let task = tokio::spawn(async move {
        if !forward_output(surface, stdout, stderr, &tx).await {
            debug!(%surface, "Receiver closed, abandoning process");
            return;
        }

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(%surface, error = %err, "Failed to wait for process");
                None
            }
        };
        let _ = tx.send(ProcessEvent::Exited { surface, code }.into()).await;
    });

    Ok(SpawnedProcess { pid, task })
}

/// Forward both pipes until they close. Returns `false` if the receiver hung up.
async fn forward_output<T, O, E>(
    surface: SurfaceId,
    stdout: Option<O>,
    stderr: Option<E>,
    tx: &mpsc::Sender<T>,
) -> bool
where
    T: From<ProcessEvent>,
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_open = stdout.is_some();
    let mut err_open = stderr.is_some();
    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];

    while out_open || err_open {
        let (read, stream) = tokio::select! {
            r = read_some(&mut stdout, &mut out_buf), if out_open => (r, OutputStream::Stdout),
            r = read_some(&mut stderr, &mut err_buf), if err_open => (r, OutputStream::Stderr),
        };

        let n = read.unwrap_or_else(|err| {
            debug!(%surface, error = %err, ?stream, "Pipe read failed");
            0
        });
        if n == 0 {
            match stream {
                OutputStream::Stdout => out_open = false,
                OutputStream::Stderr => err_open = false,
            }
            continue;
        }

        let buf = match stream {
            OutputStream::Stdout => &out_buf,
            OutputStream::Stderr => &err_buf,
        };
        let event = ProcessEvent::Chunk {
            surface,
            stream,
            bytes: buf[..n].to_vec(),
        };
        if tx.send(event.into()).await.is_err() {
            return false;
        }
    }
    true
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Collected {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        code: Option<i32>,
    }

    async fn collect(mut rx: mpsc::Receiver<ProcessEvent>) -> Collected {
        let mut collected = Collected::default();
        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Chunk {
                    stream: OutputStream::Stdout,
                    bytes,
                    ..
                } => collected.stdout.extend(bytes),
                ProcessEvent::Chunk {
                    stream: OutputStream::Stderr,
                    bytes,
                    ..
                } => collected.stderr.extend(bytes),
                ProcessEvent::Exited { code, .. } => {
                    collected.code = code;
                    return collected;
                }
            }
        }
        panic!("channel closed without exit event");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn empty_command_is_rejected() {
        let (tx, _rx) = mpsc::channel::<ProcessEvent>(1);
        let err = spawn_process(&[], SurfaceId(1), tx).unwrap_err();
        assert!(matches!(err, SourceError::EmptyCommand));
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_error() {
        let (tx, _rx) = mpsc::channel::<ProcessEvent>(1);
        let err = spawn_process(
            &["tailf-definitely-not-a-binary".to_string()],
            SurfaceId(1),
            tx,
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_output_then_exit_code() {
        let (tx, rx) = mpsc::channel::<ProcessEvent>(16);
        let spawned = spawn_process(&sh("printf 'a\\nb\\n'; exit 3"), SurfaceId(2), tx)
            .expect("spawn");
        assert!(spawned.pid.is_some());

        let collected = collect(rx).await;
        assert_eq!(collected.stdout, b"a\nb\n");
        assert!(collected.stderr.is_empty());
        assert_eq!(collected.code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_forwarded_too() {
        let (tx, rx) = mpsc::channel::<ProcessEvent>(16);
        spawn_process(&sh("echo oops >&2"), SurfaceId(3), tx).expect("spawn");

        let collected = collect(rx).await;
        assert_eq!(collected.stderr, b"oops\n");
        assert!(collected.stdout.is_empty());
        assert_eq!(collected.code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chunks_are_tagged_with_their_pipe() {
        let (tx, rx) = mpsc::channel::<ProcessEvent>(16);
        let script = "printf 'stdout-part'; sleep 0.1; printf 'stderr line\\n' >&2; \
                      sleep 0.1; printf ' rest\\n'";
        spawn_process(&sh(script), SurfaceId(4), tx).expect("spawn");

        let collected = collect(rx).await;
        assert_eq!(collected.stdout, b"stdout-part rest\n");
        assert_eq!(collected.stderr, b"stderr line\n");
    }
}
