//! The tool bridge: one owned connection to a spawned tool server.
//!
//! A [`ToolBridge`] is an explicitly constructed, explicitly owned value;
//! cloning it is cheap and shares the same connection. Lifecycle events
//! (`Ready`, `Log`, `Error`) are delivered on a broadcast channel that the
//! caller drains via [`ToolBridge::subscribe`]; per-call outcomes are never
//! reported as events.

use crate::channel::PendingCalls;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::{protocol, supervisor};
use serde_json::{Value, json};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::protocol::ToolDescriptor;

/// Cross-cutting lifecycle events emitted by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Handshake completed; payload is the server identity reported in the
    /// `initialize` result.
    Ready(Value),
    /// One diagnostic line, from the server's stderr or from the bridge's
    /// own recovery machinery.
    Log(String),
    /// Terminal failure after the restart budget is exhausted. The bridge
    /// takes no further automatic action; call `start()` again to recover.
    Error(String),
}

/// Handle to the live connection's write side.
pub(crate) struct Connection {
    pub(crate) writer: mpsc::Sender<String>,
    pub(crate) cancel: CancellationToken,
}

/// State shared between the facade, the connection I/O task, and the
/// recovery loop. All mutable pieces are owned here so that a crashed
/// connection can be replaced without invalidating caller handles.
pub(crate) struct Shared {
    pub(crate) config: BridgeConfig,
    pub(crate) pending: PendingCalls,
    pub(crate) conn: StdMutex<Option<Connection>>,
    pub(crate) child: Mutex<Option<Child>>,
    pub(crate) ready: AtomicBool,
    pub(crate) stopping: AtomicBool,
    pub(crate) recovering: AtomicBool,
    pub(crate) restarts: AtomicU32,
    pub(crate) events: broadcast::Sender<BridgeEvent>,
}

impl Shared {
    pub(crate) fn emit(&self, event: BridgeEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn writer(&self) -> Option<mpsc::Sender<String>> {
        self.conn
            .lock()
            .expect("connection lock poisoned")
            .as_ref()
            .map(|conn| conn.writer.clone())
    }

    /// Drop the connection handle without cancelling its I/O task.
    /// Used by crash handling, where the task has already finished.
    pub(crate) fn clear_connection(&self) {
        self.conn.lock().expect("connection lock poisoned").take();
    }

    /// Cancel and drop the current connection, killing the child.
    pub(crate) async fn abort_connection(&self) {
        let conn = self.conn.lock().expect("connection lock poisoned").take();
        if let Some(conn) = conn {
            conn.cancel.cancel();
        }
        self.kill_child().await;
    }

    pub(crate) async fn kill_child(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
    }

    /// Send a correlated request and await its response.
    ///
    /// There is no channel-level timeout: an unanswered request stays
    /// pending until a matching line arrives or stop/crash rejects it.
    pub(crate) async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let writer = self.writer().ok_or(BridgeError::NotRunning)?;
        let (token, mut rx) = self.pending.register();
        let frame = protocol::request_frame(token, method, params);
        let line = serde_json::to_string(&frame)?;
        if writer.send(line).await.is_err() {
            self.pending.discard(token);
            return Err(BridgeError::NotRunning);
        }
        // Also watch the write side: a slot registered after a dying I/O
        // task already ran its en-masse rejection would otherwise never
        // resolve.
        tokio::select! {
            reply = &mut rx => match reply {
                Ok(reply) => reply,
                Err(_) => Err(BridgeError::ChannelClosed),
            },
            _ = writer.closed() => {
                self.pending.discard(token);
                match rx.try_recv() {
                    Ok(reply) => reply,
                    Err(_) => Err(BridgeError::ChannelClosed),
                }
            }
        }
    }

    /// Send a fire-and-forget notification. Silently dropped when the
    /// stream is not writable.
    pub(crate) async fn notify(&self, method: &str, params: Value) {
        let Some(writer) = self.writer() else {
            return;
        };
        let frame = protocol::notification_frame(method, params);
        if let Ok(line) = serde_json::to_string(&frame) {
            let _ = writer.send(line).await;
        }
    }

    /// Run the two-step session handshake, then mark the bridge ready.
    ///
    /// Re-run verbatim after every automatic restart.
    pub(crate) async fn handshake(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            },
        });
        let result = self.request(protocol::METHOD_INITIALIZE, params).await?;
        self.notify(protocol::NOTIFICATION_INITIALIZED, json!({})).await;

        self.ready.store(true, Ordering::SeqCst);
        self.restarts.store(0, Ordering::SeqCst);

        let identity = result.get("serverInfo").cloned().unwrap_or(result);
        info!(server = %identity, "tool server handshake complete");
        self.emit(BridgeEvent::Ready(identity));
        Ok(())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
            && !self.stopping.load(Ordering::SeqCst)
            && self.conn.lock().expect("connection lock poisoned").is_some()
    }
}

/// Bridge to one spawned tool server.
///
/// # Example
///
/// ```rust,no_run
/// use toolbridge::{BridgeConfig, ToolBridge};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let bridge = ToolBridge::new(BridgeConfig::new("my-tool-server"));
///     bridge.start().await?;
///     for tool in bridge.list_tools().await? {
///         println!("{}", tool.name);
///     }
///     bridge.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ToolBridge {
    shared: Arc<Shared>,
}

impl ToolBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            shared: Arc::new(Shared {
                config,
                pending: PendingCalls::default(),
                conn: StdMutex::new(None),
                child: Mutex::new(None),
                ready: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
                restarts: AtomicU32::new(0),
                events,
            }),
        }
    }

    /// Subscribe to lifecycle events. Each receiver sees every event
    /// emitted after the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    /// Spawn the tool server and complete the session handshake.
    ///
    /// Spawn or handshake failures surface here directly; automatic
    /// restarts apply only to crashes after the bridge was ready.
    pub async fn start(&self) -> Result<()> {
        if self
            .shared
            .conn
            .lock()
            .expect("connection lock poisoned")
            .is_some()
        {
            return Err(BridgeError::AlreadyRunning);
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.restarts.store(0, Ordering::SeqCst);

        supervisor::connect(&self.shared).await?;
        match self.shared.handshake().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.abort_connection().await;
                Err(e)
            }
        }
    }

    /// Stop the bridge: reject all pending calls, close the channel, and
    /// kill the tool server. Safe to call any number of times.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.ready.store(false, Ordering::SeqCst);
        self.shared.pending.reject_all(|| BridgeError::Stopped);
        let conn = self
            .shared
            .conn
            .lock()
            .expect("connection lock poisoned")
            .take();
        if let Some(conn) = conn {
            conn.cancel.cancel();
        }
        self.shared.kill_child().await;
    }

    /// True only while the process is alive, the handshake has completed,
    /// and no stop has been requested.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Query the server's advertised tools. Never cached: every call
    /// re-queries the server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready()?;
        let result = self
            .shared
            .request(protocol::METHOD_TOOLS_LIST, json!({}))
            .await?;
        match result.get("tools") {
            Some(tools) => Ok(serde_json::from_value(tools.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// Invoke one tool by name.
    ///
    /// A result flagged `isError` fails with the concatenated text of its
    /// content blocks; otherwise the raw result value is returned untouched
    /// for the caller to interpret.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_ready()?;
        let params = json!({"name": name, "arguments": arguments});
        let result = self
            .shared
            .request(protocol::METHOD_TOOLS_CALL, params)
            .await?;

        let failed = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if failed {
            let message = protocol::error_text(&result)
                .unwrap_or_else(|| format!("tool '{name}' reported an error"));
            return Err(BridgeError::ToolFailed(message));
        }
        Ok(result)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self
            .shared
            .conn
            .lock()
            .expect("connection lock poisoned")
            .is_none()
        {
            return Err(BridgeError::NotRunning);
        }
        if !self.shared.is_ready() {
            return Err(BridgeError::NotReady);
        }
        Ok(())
    }
}
