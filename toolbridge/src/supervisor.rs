//! Tool-server process lifecycle: spawning, the per-connection I/O loop,
//! and the bounded automatic-recovery policy.
//!
//! One I/O task exists per spawned process. It multiplexes the outgoing
//! write queue, the stdout protocol stream, and the stderr diagnostic
//! stream, and classifies how the connection ended: cancelled (intentional
//! stop) or crashed (anything else while not stopping).

use crate::bridge::{BridgeEvent, Connection, Shared};
use crate::error::{BridgeError, Result};
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period for collecting the exit status after stdout closes.
const EXIT_REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawn the configured tool server and wire up a new connection.
///
/// The child environment is the ambient environment overlaid with the
/// configured overrides (overrides win on key collision). Fails when the
/// executable cannot be launched or any of the three pipes cannot be
/// opened.
pub(crate) fn connect(
    shared: &Arc<Shared>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
    // Boxed: connect, run_io, and recover form an async recursion cycle;
    // returning an erased future lets the compiler prove everything is Send.
    let shared = Arc::clone(shared);
    Box::pin(async move { connect_inner(shared).await })
}

async fn connect_inner(shared: Arc<Shared>) -> Result<()> {
    let config = &shared.config;
    debug!(command = %config.command, args = ?config.args, "spawning tool server");

    let mut child = Command::new(&config.command)
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // The subprocess must not outlive the bridge, even when the owner
        // drops it without calling stop().
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Spawn(format!("{}: {e}", config.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| BridgeError::Spawn("failed to open stdin pipe".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeError::Spawn("failed to open stdout pipe".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeError::Spawn("failed to open stderr pipe".into()))?;

    *shared.child.lock().await = Some(child);

    let (writer, rx) = mpsc::channel::<String>(100);
    let cancel = CancellationToken::new();
    *shared.conn.lock().expect("connection lock poisoned") = Some(Connection {
        writer,
        cancel: cancel.clone(),
    });

    // Boxed: the I/O task, crash handling, and respawn form an async cycle.
    let io: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(run_io(
        Arc::clone(&shared),
        stdin,
        stdout,
        stderr,
        rx,
        cancel,
    ));
    tokio::spawn(io);
    Ok(())
}

/// Per-connection I/O loop.
async fn run_io(
    shared: Arc<Shared>,
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = Some(BufReader::new(stderr).lines());

    let crash_cause: Option<String> = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,

            msg = rx.recv() => match msg {
                Some(msg) => {
                    debug!("sending to tool server: {msg}");
                    if let Err(e) = write_line(&mut stdin, &msg).await {
                        error!("failed to write to tool server stdin: {e}");
                        break Some(format!("stdin write failed: {e}"));
                    }
                }
                // Connection handle dropped without cancellation.
                None => break None,
            },

            line = stdout_lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    debug!("received from tool server: {line}");
                    shared.pending.dispatch_line(&line);
                }
                Ok(None) => break Some(exit_cause(&shared).await),
                Err(e) => break Some(format!("stdout read failed: {e}")),
            },

            line = next_stderr_line(&mut stderr_lines) => match line {
                Some(line) => {
                    if !line.is_empty() {
                        debug!(target: "toolbridge::server", "{line}");
                        shared.emit(BridgeEvent::Log(line));
                    }
                }
                None => stderr_lines = None,
            },
        }
    };

    match crash_cause {
        Some(cause) if !shared.stopping.load(Ordering::SeqCst) => {
            handle_crash(shared, cause).await;
        }
        _ => {
            shared.kill_child().await;
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, msg: &str) -> std::io::Result<()> {
    stdin.write_all(msg.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Poll the diagnostic stream, or park forever once it has closed so the
/// select loop stops visiting this branch.
async fn next_stderr_line(
    lines: &mut Option<Lines<BufReader<ChildStderr>>>,
) -> Option<String> {
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Describe why the output stream closed, reaping the exit status when the
/// process has already died.
async fn exit_cause(shared: &Shared) -> String {
    let child = shared.child.lock().await.take();
    let Some(mut child) = child else {
        return "tool server closed its output stream".to_string();
    };
    match tokio::time::timeout(EXIT_REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => format!("tool server exited with {status}"),
        Ok(Err(e)) => format!("tool server wait failed: {e}"),
        Err(_) => {
            // Still alive with a closed stdout: unusable either way.
            let _ = child.kill().await;
            "tool server closed its output stream".to_string()
        }
    }
}

/// Unsolicited termination: reject everything pending, then decide whether
/// the bounded recovery policy applies.
async fn handle_crash(shared: Arc<Shared>, cause: String) {
    warn!("tool server connection lost: {cause}");
    let was_ready = shared.ready.swap(false, Ordering::SeqCst);
    shared.clear_connection();
    shared.kill_child().await;
    shared
        .pending
        .reject_all(|| BridgeError::Crashed(cause.clone()));

    if shared.stopping.load(Ordering::SeqCst) {
        return;
    }
    if shared.recovering.load(Ordering::SeqCst) {
        // A recovery loop is already driving respawns; it observes this
        // failure through its own handshake result.
        return;
    }
    if !was_ready {
        // Initial start: spawn and handshake failures surface to the
        // caller directly, with no automatic retry.
        return;
    }

    shared.recovering.store(true, Ordering::SeqCst);
    recover(shared, cause).await;
}

/// Bounded restart loop: fixed back-off, fixed retry ceiling, counter
/// reset on every successful handshake. Exhaustion emits a terminal
/// `Error` event and leaves any further recovery to an explicit start().
async fn recover(shared: Arc<Shared>, mut last_cause: String) {
    let max = shared.config.max_restarts;
    loop {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let attempt = shared.restarts.load(Ordering::SeqCst) + 1;
        if attempt > max {
            error!("giving up on tool server after {max} restart attempts: {last_cause}");
            shared.emit(BridgeEvent::Error(format!(
                "tool server unrecoverable after {max} restart attempts: {last_cause}"
            )));
            break;
        }
        shared.restarts.store(attempt, Ordering::SeqCst);

        let message = format!("tool server crashed ({last_cause}), retry {attempt}/{max}");
        warn!("{message}");
        shared.emit(BridgeEvent::Log(message));

        tokio::time::sleep(shared.config.restart_backoff).await;
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }

        let outcome = match connect(&shared).await {
            Ok(()) => shared.handshake().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                info!("tool server reconnected after {attempt} attempt(s)");
                break;
            }
            Err(e) => {
                shared.abort_connection().await;
                last_cause = e.to_string();
            }
        }
    }
    shared.recovering.store(false, Ordering::SeqCst);
}
