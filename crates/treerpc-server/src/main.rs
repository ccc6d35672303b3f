//! treerpc - serve the demo function tree, or call a running server.

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use treerpc::config::ServerConfig;
use treerpc::{BridgeClient, BridgeServer, SchemaContract, Value};

#[derive(Parser, Debug)]
#[command(name = "treerpc")]
#[command(about = "Serve or call a treerpc function tree")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo tree
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
        host: String,

        /// Schema JSON file (defaults to the bundled demo schema)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Delay between items of the `st` stream, in milliseconds
        #[arg(long, default_value = "500")]
        stream_interval_ms: u64,
    },

    /// Call a path on a running server and print the result as JSON
    Call {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        host: String,

        /// `/`-separated call path, e.g. `a/it`
        path: String,

        /// Positional arguments; each is parsed as JSON, or taken as a string
        args: Vec<String>,

        /// Print each streamed result on its own line
        #[arg(long)]
        stream: bool,
    },

    /// Print a server's schema
    Schema {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries results and the bound port.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            port,
            host,
            schema,
            stream_interval_ms,
        } => serve(&host, port, schema, Duration::from_millis(stream_interval_ms)).await,
        Command::Call {
            host,
            path,
            args,
            stream,
        } => call(&host, &path, &args, stream).await,
        Command::Schema { host } => {
            let client = BridgeClient::new(&host)?;
            let schema = client.schema().await?;
            println!("{}", schema.to_json()?);
            Ok(())
        }
    }
}

fn load_schema(path: Option<PathBuf>) -> Result<SchemaContract> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading schema {}", path.display()))?;
            SchemaContract::from_json(&json)
                .with_context(|| format!("parsing schema {}", path.display()))
        }
        None => Ok(demo::schema()?),
    }
}

async fn serve(host: &str, port: u16, schema: Option<PathBuf>, stream_interval: Duration) -> Result<()> {
    info!("Starting treerpc server");

    let schema = load_schema(schema)?;
    let server = BridgeServer::new(schema, &demo::tree(stream_interval))
        .context("binding demo tree to schema")?;
    let mut handle = server.start(host, port).await?;

    // Read by scripts and tests to discover an auto-assigned port
    println!("RPC_PORT={}", handle.addr().port());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight calls");
    handle.shutdown();
    handle.wait().await;
    Ok(())
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

async fn call(host: &str, path: &str, raw_args: &[String], stream: bool) -> Result<()> {
    let client = BridgeClient::new(host)?;
    let args = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    let handle = client.call(path, args);

    if stream {
        let mut handle = handle;
        while let Some(item) = handle.next().await {
            println!("{}", serde_json::Value::from(item?));
        }
    } else {
        println!("{}", serde_json::Value::from(handle.await?));
    }
    Ok(())
}
