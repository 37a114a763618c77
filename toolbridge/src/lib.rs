//! # Toolbridge
//!
//! A process bridge for stdio tool servers: spawn an external
//! tool-providing program, speak newline-delimited JSON-RPC 2.0 with it
//! over stdin/stdout, and expose its tools through a small call/response
//! facade.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ToolBridge (bridge)                                         │
//! │  - start / stop / is_ready                                   │
//! │  - list_tools / call_tool                                    │
//! │  - session handshake (initialize → notifications/initialized)│
//! │  - lifecycle events: Ready / Log / Error                     │
//! └──────────────────────────────────────────────────────────────┘
//!                │                          │
//!                ▼                          ▼
//! ┌───────────────────────────┐ ┌────────────────────────────────┐
//! │  PendingCalls (channel)   │ │  Supervisor                    │
//! │  - correlation tokens     │ │  - spawn with env overlay      │
//! │  - one slot per request   │ │  - per-connection I/O loop     │
//! │  - en-masse rejection     │ │  - crash detection + bounded   │
//! │                           │ │    automatic restart (3 × 1 s) │
//! └───────────────────────────┘ └────────────────────────────────┘
//! ```
//!
//! The wire protocol is line-delimited JSON-RPC: requests carry a numeric
//! correlation token, notifications carry none, and responses are matched
//! strictly by token, never by arrival order. The server's stderr is a
//! diagnostic side channel surfaced as [`BridgeEvent::Log`] events.
//!
//! ## Example
//!
//! ```rust,no_run
//! use toolbridge::{BridgeConfig, ToolBridge};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::new("my-tool-server").arg("--local");
//!     let bridge = ToolBridge::new(config);
//!     bridge.start().await?;
//!
//!     for tool in bridge.list_tools().await? {
//!         println!("tool: {}", tool.name);
//!     }
//!     let result = bridge.call_tool("echo", json!({"x": 1})).await?;
//!     println!("{result}");
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;

mod channel;
mod supervisor;

pub use bridge::{BridgeEvent, ToolBridge};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use protocol::{ToolContent, ToolDescriptor};
