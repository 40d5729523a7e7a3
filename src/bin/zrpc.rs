//! zrpc command-line tool: sample server and worker, one-shot calls, and an
//! in-process walkthrough.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zrpc::config::{EndpointConfig, Role};
use zrpc::handler::{FnHandler, MethodDoc};
use zrpc::{CallArgs, Client, HandlerError, Master, Server, TokioRunner, Worker, ZrpcError};

const DEMO_ADDRESS: &str = "inproc://rpc_server";

#[derive(Parser)]
#[command(name = "zrpc")]
#[command(about = "Call named functions on a remote zrpc server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sample server offering `echo` and `error`
    Serve {
        /// Address to bind, e.g. tcp://*:4242
        address: String,

        /// Connect to the address instead of binding
        #[arg(long)]
        connect: bool,
    },

    /// Call a function and print its result as JSON
    Call {
        /// Server address
        address: String,

        /// Function name
        function: String,

        /// Positional values and KEY=VALUE keyword values (JSON, else string)
        params: Vec<String>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run a sample fire-and-forget worker
    Worker {
        /// Address to bind
        address: String,

        /// Connect to the address instead of binding
        #[arg(long)]
        connect: bool,
    },

    /// Push one call to a worker without waiting for a result
    Push {
        /// Worker address
        address: String,

        /// Function name
        function: String,

        /// Positional values and KEY=VALUE keyword values
        params: Vec<String>,

        /// Bind the address instead of connecting
        #[arg(long)]
        bind: bool,
    },

    /// In-process walkthrough of the protocol (default)
    Demo,
}

fn init_logging(verbose: u8) -> Result<()> {
    let log_format = std::env::var("ZRPC_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = match verbose {
        0 => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("zrpc=info")),
        1 => EnvFilter::try_new("zrpc=debug"),
        _ => EnvFilter::try_new("zrpc=trace"),
    }
    .context("invalid log filter")?;

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

/// Parse a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// `KEY=VALUE` with a non-empty value is a keyword argument; anything else
/// is positional (the part before a trailing `=`).
fn parse_params(params: &[String]) -> CallArgs {
    params.iter().fold(CallArgs::new(), |args, param| {
        match param.split_once('=') {
            Some((key, value)) if !value.is_empty() => args.kwarg(key, parse_value(value)),
            Some((key, _)) => args.arg(parse_value(key)),
            None => args.arg(parse_value(param)),
        }
    })
}

fn lookup_foo() -> Result<Value, HandlerError> {
    Err(HandlerError::new("NameError", "name 'foo' is not defined"))
}

/// Always fails, a couple of frames deep.
async fn always_fails(_args: CallArgs) -> Result<Value, HandlerError> {
    fn times_ten() -> Result<Value, HandlerError> {
        let foo = lookup_foo()?;
        Ok(Value::from(foo.as_i64().unwrap_or_default() * 10))
    }
    times_ten()
}

/// `echo(*args, **kwargs) -> [args, kwargs]`
async fn echo_all(args: CallArgs) -> Result<Value, HandlerError> {
    Ok(Value::Array(vec![
        Value::Array(args.args),
        Value::Object(args.kwargs),
    ]))
}

async fn serve(address: String, connect: bool) -> Result<()> {
    let role = if connect { Role::Connect } else { Role::Bind };
    let mut server = Server::builder(address)
        .role(role)
        .documented(
            "echo",
            MethodDoc::new("(*args, **kwargs)", "Basic echo command."),
            FnHandler::new(echo_all),
        )
        .function("error", always_fails)
        .bind()
        .await?;

    info!(address = %server.bound_address(), "serving until kill_server");
    server.serve_forever().await?;
    Ok(())
}

async fn call(address: String, function: String, params: Vec<String>, timeout_ms: Option<u64>) -> Result<()> {
    let mut client = Client::connect(&address).await?;
    if let Some(ms) = timeout_ms {
        client = client.request_timeout(Duration::from_millis(ms));
    }

    let result = client.call(&function, parse_params(&params)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn work(address: String, connect: bool) -> Result<()> {
    let role = if connect { Role::Connect } else { Role::Bind };
    let mut worker = Worker::builder(address)
        .role(role)
        .function("echo", echo_all)
        .function("error", always_fails)
        .bind()
        .await?;

    info!(address = %worker.bound_address(), "working until kill_server");
    worker.serve_forever().await?;
    Ok(())
}

async fn push(address: String, function: String, params: Vec<String>, bind: bool) -> Result<()> {
    let config = if bind {
        EndpointConfig::push().with_role(Role::Bind)
    } else {
        EndpointConfig::push()
    };
    let mut master: Master = Master::with_config(&address, config).await?;
    master.call(&function, parse_params(&params)).await?;
    master.close().await?;
    Ok(())
}

fn section(title: &str) {
    println!("\n{}", title);
    println!("{}", "=".repeat(80));
}

async fn demo() -> Result<()> {
    let server = Server::builder(DEMO_ADDRESS)
        .documented(
            "echo",
            MethodDoc::new("(statement, foo='a', bar=None, **kwargs)", "Basic echo command."),
            FnHandler::new(|args: CallArgs| async move { args.required::<Value>(0, "statement") }),
        )
        .function("error", always_fails)
        .runner(TokioRunner)
        .bind()
        .await?;
    server.start().await?;

    let mut client = Client::connect(DEMO_ADDRESS).await?;

    section("Listing functions registered with server");
    let functions = client.list_functions().await?;
    println!("{:?}", functions);

    if let Some(last) = functions.last() {
        section(&format!("Getting documentation of a registered function: {}", last));
        println!("{}", client.documentation(last).await?);
    }

    section("Example remote call");
    println!("{}", client.echo("Hello World").await?);

    section("Call to undefined remote function");
    match client.call("spam", CallArgs::new()).await {
        Err(ZrpcError::MethodNotImplemented(name)) => println!("Caught missing method: {}", name),
        other => println!("Unexpected: {:?}", other),
    }

    section("Call causes error which is suppressed");
    let suppressed = client
        .call("error", CallArgs::new().kwarg("_suppress", true))
        .await?;
    println!("Error was ignored, got {}", suppressed);

    section("Call causes error which is reraised");
    match client.call("error", CallArgs::new()).await {
        Err(ZrpcError::Remote(failure)) => {
            println!("Caught remote failure: {}", failure);
            println!("{}", failure.trace);
        }
        other => println!("Unexpected: {:?}", other),
    }

    section("Killing server");
    client.kill_server().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command.unwrap_or(Commands::Demo) {
        Commands::Serve { address, connect } => serve(address, connect).await,
        Commands::Call {
            address,
            function,
            params,
            timeout_ms,
        } => call(address, function, params, timeout_ms).await,
        Commands::Worker { address, connect } => work(address, connect).await,
        Commands::Push {
            address,
            function,
            params,
            bind,
        } => push(address, function, params, bind).await,
        Commands::Demo => demo().await,
    }
}
