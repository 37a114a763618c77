//! # Toolbridge CLI
//!
//! Connect to a stdio tool server, print its advertised tools, and
//! optionally invoke one. Useful for testing and verifying tool server
//! configurations.
//!
//! ## Usage
//!
//! List tools:
//! ```bash
//! toolbridge -- /path/to/tool-server --flag value
//! ```
//!
//! Call a tool with JSON arguments:
//! ```bash
//! toolbridge --call echo --arguments '{"x": 1}' -- /path/to/tool-server
//! ```

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde_json::Value;
use toolbridge::{BridgeConfig, BridgeEvent, ToolBridge, ToolDescriptor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "toolbridge", version, about = "Bridge to a stdio tool server")]
struct Args {
    /// KEY=VALUE environment overrides for the tool server process.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Name of a tool to invoke instead of listing tools.
    #[arg(long)]
    call: Option<String>,

    /// JSON arguments object for --call.
    #[arg(long, default_value = "{}")]
    arguments: String,

    /// Output machine-readable JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Tool server command and arguments (after --).
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let bridge = ToolBridge::new(config);

    // Surface server diagnostics and lifecycle failures on stderr.
    let mut events = bridge.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BridgeEvent::Log(line) => tracing::info!(target: "tool_server", "{line}"),
                BridgeEvent::Error(message) => tracing::error!("{message}"),
                BridgeEvent::Ready(identity) => {
                    tracing::debug!(server = %identity, "tool server ready")
                }
            }
        }
    });

    bridge.start().await.context("failed to start tool server")?;

    let outcome = run(&bridge, &args).await;
    bridge.stop().await;
    outcome
}

async fn run(bridge: &ToolBridge, args: &Args) -> Result<()> {
    match &args.call {
        Some(name) => {
            let arguments: Value = serde_json::from_str(&args.arguments)
                .context("--arguments must be a JSON object")?;
            let result = bridge.call_tool(name, arguments).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let texts = toolbridge::protocol::text_blocks(&result);
                if texts.is_empty() {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    for text in texts {
                        println!("{text}");
                    }
                }
            }
        }
        None => {
            let tools = bridge.list_tools().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                print_tools(&tools);
            }
        }
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<BridgeConfig> {
    let (command, server_args) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("no tool server command given (pass it after --)"))?;

    let mut config = BridgeConfig::new(command);
    for arg in server_args {
        config = config.arg(arg);
    }
    for pair in &args.env {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --env '{pair}', expected KEY=VALUE"))?;
        config = config.env(key, value);
    }
    Ok(config)
}

fn print_tools(tools: &[ToolDescriptor]) {
    println!("Total tools: {}", tools.len());
    println!();
    for tool in tools {
        println!("Tool: {}", tool.name);
        if let Some(description) = &tool.description {
            println!("  Description: {description}");
        }
        if let Some(schema) = &tool.input_schema
            && let Some(properties) = schema.get("properties").and_then(Value::as_object)
        {
            println!("  Parameters:");
            for (name, prop) in properties {
                let kind = prop.get("type").and_then(Value::as_str).unwrap_or("any");
                println!("    - {name} ({kind})");
            }
        }
        println!();
    }
}
