//! # WireRPC CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start a server exposing the demo EchoService
//! wirerpc serve -b 127.0.0.1:7000
//!
//! # Call it (outputs raw JSON)
//! wirerpc call --instance 127.0.0.1:7000 EchoService echo -a '["hello"]'
//!
//! # Built-in endpoints work under any service name
//! wirerpc call --instance 127.0.0.1:7000 EchoService _metrics
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use argh::FromArgs;
use wirerpc_client::{type_descriptor_of, CallOptions, ClientConfig, RpcClient};
use wirerpc_cli::args::{instances_for, parse_call_args};
use wirerpc_cli::demo;
use wirerpc_registry::{InMemoryRegistry, RoundRobinSelector};
use wirerpc_server::{RpcServer, ServerConfig, ServiceDirectory};

#[derive(FromArgs)]
/// WireRPC - correlated request/response RPC over TCP
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for running a server.
///
/// # Example
///
/// ```bash
/// wirerpc serve -b 0.0.0.0:7000 --advertise-host 10.0.0.5 --id echo-1
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run a server exposing the demo EchoService
struct ServeArgs {
    /// address to listen on
    ///
    /// Defaults to "127.0.0.1:7000".
    #[argh(option, short = 'b', default = "\"127.0.0.1:7000\".into()")]
    bind: String,

    /// instance id to publish; defaults to host:port
    #[argh(option, long = "id")]
    instance_id: Option<String>,

    /// host to publish instead of the bound address
    #[argh(option, long = "advertise-host")]
    advertise_host: Option<String>,
}

/// Arguments for making a single call.
///
/// Outputs raw JSON (no pretty-printing) to stdout. Errors go to stderr
/// with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a service
struct CallArgs {
    /// instance of the service as host:port; repeat to round-robin
    #[argh(option, long = "instance")]
    instances: Vec<String>,

    /// name of the service
    #[argh(positional)]
    service: String,

    /// name of the method
    #[argh(positional)]
    method: String,

    /// JSON array of arguments; any other JSON value is a single argument
    ///
    /// Defaults to `[]`.
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// metadata entry as key=value; repeatable
    #[argh(option, long = "meta")]
    metadata: Vec<String>,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "5000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // `call` keeps stdout clean for piping into other tools
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let directory = Arc::new(ServiceDirectory::new());
    directory.register(demo::SERVICE_NAME, demo::echo_service());

    let mut config = ServerConfig::new(args.bind);
    if let Some(id) = args.instance_id {
        config = config.with_instance_id(id);
    }
    if let Some(host) = args.advertise_host {
        config = config.with_advertise_host(host);
    }

    let server = RpcServer::bind(config, directory).await?;
    for instance in server.instances() {
        tracing::info!(instance = %instance, "Serving");
    }
    let handle = server.serve(None).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");
    handle.shutdown().await;

    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    if args.instances.is_empty() {
        return Err(anyhow!("At least one --instance host:port is required"));
    }

    let parameters = parse_call_args(&args.args)?;
    let types: Vec<String> = parameters
        .iter()
        .map(|value| type_descriptor_of(value).to_string())
        .collect();

    let mut options = CallOptions::new().with_timeout(Duration::from_millis(args.timeout_ms));
    for entry in &args.metadata {
        let (key, value) = parse_metadata(entry)?;
        options = options.with_metadata(key, value);
    }

    let registry = InMemoryRegistry::with_instances(instances_for(&args.service, &args.instances)?);
    let client = RpcClient::new(
        Arc::new(registry),
        Arc::new(RoundRobinSelector::new()),
        ClientConfig::default(),
    );

    let result = client
        .invoke(&args.service, &args.method, &types, parameters, &options)
        .await;
    client.shutdown();

    println!("{}", serde_json::to_string(&result?)?);
    Ok(())
}

/// Splits `key=value`; the value is parsed as JSON, falling back to a string.
fn parse_metadata(entry: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid metadata '{}': expected key=value", entry))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
